//! Build description loading and layered configuration.
//!
//! Values come from, in order of precedence: the command line or the build
//! description, `local.properties` in the project root, the process
//! environment, and finally a built-in default.

use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    HostPlatform,
    error::{Error, Result},
    linker::LinkerWrapper,
    meta::{self, PlatformEntry},
    ndk::{self, NdkInfo},
};

pub const DEFAULT_DESCRIPTION: &str = "jnilibs.toml";
pub const LOCAL_PROPERTIES: &str = "local.properties";
const TARGET_ENV_PREFIX: &str = "CARGO_JNILIBS_TARGET_";

/// Parses a Java-style `.properties` file: `key=value` or `key: value` lines,
/// `#` and `!` comments. Line continuations and escapes are not supported.
pub fn parse_properties(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let idx = line.find(['=', ':'])?;
            let (key, value) = line.split_at(idx);
            Some((key.trim().to_string(), value[1..].trim().to_string()))
        })
        .collect()
}

/// The two ambient configuration sources, captured once.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub local: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

impl ConfigLayers {
    pub fn new(local: BTreeMap<String, String>, env: BTreeMap<String, String>) -> Self {
        Self { local, env }
    }

    /// Reads `local.properties` from `project_root` (if present) and
    /// snapshots the process environment.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(LOCAL_PROPERTIES);
        let local = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            parse_properties(&contents)
        } else {
            BTreeMap::new()
        };
        Ok(Self::new(local, std::env::vars().collect()))
    }

    /// Explicit value, then `local.properties`, then the environment.
    pub fn property(&self, explicit: Option<&str>, camel: &str, snake: &str) -> Option<String> {
        explicit
            .or_else(|| self.local.get(camel).map(String::as_str))
            .or_else(|| self.env.get(snake).map(String::as_str))
            .map(String::from)
    }

    pub fn flag(
        &self,
        explicit: Option<bool>,
        camel: &str,
        snake: &str,
        default: bool,
    ) -> Result<bool> {
        if let Some(v) = explicit {
            return Ok(v);
        }
        match self.property(None, camel, snake).as_deref() {
            Some("1") | Some("true") => Ok(true),
            Some("0") | Some("false") => Ok(false),
            None | Some("") => Ok(default),
            Some(other) => Err(Error::InvalidFlag {
                camel: camel.into(),
                snake: snake.into(),
                value: other.into(),
            }),
        }
    }

    /// `CARGO_JNILIBS_TARGET_<TRIPLE>_<KEY>=V` becomes `KEY=V` for that target.
    pub fn target_passthrough(&self, entry: &PlatformEntry) -> BTreeMap<String, String> {
        let prefix = format!("{TARGET_ENV_PREFIX}{}_", entry.env_triple());
        self.env
            .iter()
            .filter_map(|(k, v)| {
                let key = k.strip_prefix(&prefix)?;
                log::debug!("Passing through environment variable '{k}' as '{key}={v}'");
                Some((key.to_string(), v.clone()))
            })
            .filter(|(k, _)| !k.is_empty())
            .collect()
    }
}

/// A cargo profile. `debug` is cargo's default and needs no flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildProfile {
    #[default]
    Debug,
    Release,
    Named(String),
}

impl BuildProfile {
    pub fn cargo_flag(&self) -> Option<String> {
        match self {
            BuildProfile::Debug => None,
            BuildProfile::Release => Some("--release".into()),
            BuildProfile::Named(name) => Some(format!("--profile={name}")),
        }
    }

    /// Name of the directory cargo writes this profile's output to.
    pub fn dir_name(&self) -> &str {
        match self {
            BuildProfile::Debug => "debug",
            BuildProfile::Release => "release",
            BuildProfile::Named(name) if name == "dev" => "debug",
            BuildProfile::Named(name) => name,
        }
    }
}

impl From<&str> for BuildProfile {
    fn from(value: &str) -> Self {
        match value {
            "debug" => BuildProfile::Debug,
            "release" => BuildProfile::Release,
            other => BuildProfile::Named(other.to_string()),
        }
    }
}

impl Display for BuildProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BuildProfile::Debug => "debug",
            BuildProfile::Release => "release",
            BuildProfile::Named(name) => name,
        })
    }
}

/// Which cargo features are enabled. Only one policy applies per build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureSelection {
    #[default]
    #[serde(skip)]
    Unset,
    All,
    DefaultAnd(Vec<String>),
    NoDefaultBut(Vec<String>),
}

/// Drops repeated names, keeping first occurrences in order.
fn uniq(names: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

impl FeatureSelection {
    fn dedup(self) -> Self {
        match self {
            FeatureSelection::DefaultAnd(f) => FeatureSelection::DefaultAnd(uniq(f)),
            FeatureSelection::NoDefaultBut(f) => FeatureSelection::NoDefaultBut(uniq(f)),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct NdkSection {
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

/// Contents of `jnilibs.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildDescription {
    pub name: Option<String>,
    pub module: Option<PathBuf>,
    pub libname: Option<String>,
    pub targets: Option<Vec<String>>,
    pub profile: Option<String>,
    pub verbose: Option<bool>,
    pub api_level: Option<u32>,
    pub api_levels: Option<BTreeMap<String, u32>>,
    pub target_directory: Option<PathBuf>,
    pub target_includes: Option<Vec<String>>,
    #[serde(default)]
    pub extra_cargo_build_arguments: Vec<String>,
    #[serde(default)]
    pub generate_build_id: bool,
    pub rustup_channel: Option<String>,
    pub cargo_command: Option<String>,
    pub rustc_command: Option<String>,
    pub python_command: Option<String>,
    pub auto_configure_clang_sys: Option<bool>,
    #[serde(default)]
    pub features: FeatureSelection,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub ndk: Option<NdkSection>,
    pub build_directory: Option<PathBuf>,
    #[serde(default)]
    pub parallel: bool,
}

impl BuildDescription {
    pub fn from_toml(path: &Path, contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|source| Error::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml(path, &contents)
    }
}

/// Values given on the command line. These win over the build description.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub targets: Vec<String>,
    pub profile: Option<String>,
    pub release: bool,
    pub all_features: bool,
    pub no_default_features: bool,
    pub features: Vec<String>,
    pub ndk: Option<PathBuf>,
    pub parallel: Option<bool>,
    pub extra_args: Vec<String>,
}

impl Overrides {
    fn profile(&self) -> Result<Option<BuildProfile>> {
        match (&self.profile, self.release) {
            (Some(p), true) if p != "release" => Err(Error::ConflictingConfiguration(format!(
                "`--release` and `--profile={p}` cannot be used together"
            ))),
            (Some(p), _) => Ok(Some(BuildProfile::from(p.as_str()))),
            (None, true) => Ok(Some(BuildProfile::Release)),
            (None, false) => Ok(None),
        }
    }

    fn features(&self) -> Result<Option<FeatureSelection>> {
        let features = self
            .features
            .iter()
            .flat_map(|f| f.split([',', ' ']))
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect::<Vec<_>>();

        if self.all_features && (self.no_default_features || !features.is_empty()) {
            return Err(Error::ConflictingConfiguration(
                "`--all-features` cannot be combined with `--features` or `--no-default-features`"
                    .into(),
            ));
        }

        Ok(if self.all_features {
            Some(FeatureSelection::All)
        } else if self.no_default_features {
            Some(FeatureSelection::NoDefaultBut(features))
        } else if !features.is_empty() {
            Some(FeatureSelection::DefaultAnd(features))
        } else {
            None
        })
    }
}

/// Settings shared, read-only, by every target of one build.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub project_root: PathBuf,
    pub module_dir: PathBuf,
    pub libname: String,
    pub profile: BuildProfile,
    pub features: FeatureSelection,
    pub rustup_channel: Option<String>,
    pub verbose: Option<bool>,
    pub extra_args: Vec<String>,
    pub auto_configure_clang_sys: bool,
    pub generate_build_id: bool,
    pub cargo_command: String,
    pub rustc_command: String,
    pub python_command: String,
    pub target_dir: PathBuf,
    pub target_includes: Option<Vec<String>>,
    /// Root of the staged output, `<build>/rustJniLibs`.
    pub output_dir: PathBuf,
    pub linker_wrapper: LinkerWrapper,
    pub ndk: Option<NdkInfo>,
    pub toolchain_dir: PathBuf,
    pub host: HostPlatform,
    pub parallel: bool,
}

#[derive(Debug, Clone)]
pub struct PlannedTarget {
    pub platform: &'static PlatformEntry,
    pub api_level: u32,
    pub env: BTreeMap<String, String>,
}

/// A validated build: nothing has been written or spawned yet.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub settings: BuildSettings,
    pub targets: Vec<PlannedTarget>,
}

impl BuildPlan {
    pub fn needs_ndk(&self) -> bool {
        self.targets.iter().any(|t| t.platform.is_android())
    }

    pub fn resolve(
        desc: &BuildDescription,
        project_root: &Path,
        layers: &ConfigLayers,
        overrides: &Overrides,
        host: HostPlatform,
    ) -> Result<Self> {
        let module = desc
            .module
            .as_ref()
            .ok_or_else(|| Error::MissingRequiredConfiguration("module".into()))?;
        let libname = desc
            .libname
            .clone()
            .ok_or_else(|| Error::MissingRequiredConfiguration("libname".into()))?;

        let project_name = desc.name.clone().or_else(|| {
            project_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        });
        let target_names = resolve_target_names(desc, layers, overrides, project_name.as_deref())?;

        // Unknown identifiers are reported before anything else is looked at.
        let platforms = target_names
            .iter()
            .map(|name| meta::lookup(name))
            .collect::<Result<Vec<_>>>()?;
        check_distinct_folders(&platforms)?;

        let api_levels = resolve_api_levels(desc, &target_names)?;

        let features = match overrides.features()? {
            Some(f) => f,
            None => desc.features.clone(),
        }
        .dedup();

        let profile = match overrides.profile()? {
            Some(p) => p,
            None => desc
                .profile
                .as_deref()
                .map(BuildProfile::from)
                .unwrap_or_default(),
        };

        if !libname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            log::warn!(
                "libname `{libname}` contains characters that are passed to the linker unescaped"
            );
        }

        let module_dir = absolute(project_root, module);
        let module_dir = dunce::canonicalize(&module_dir).map_err(|e| Error::io(&module_dir, e))?;

        let target_dir = layers
            .property(None, "rust.cargoTargetDir", "CARGO_TARGET_DIR")
            .map(PathBuf::from)
            .or_else(|| desc.target_directory.clone())
            .map(|dir| absolute(project_root, &dir))
            .unwrap_or_else(|| module_dir.join("target"));

        let toolchain_dir = layers
            .property(None, "rust.androidNdkToolchainDir", "ANDROID_NDK_TOOLCHAIN_DIR")
            .map(|dir| absolute(project_root, Path::new(&dir)))
            .unwrap_or_else(|| std::env::temp_dir().join("rust-android-ndk-toolchains"));

        let build_dir = absolute(
            project_root,
            desc.build_directory
                .as_deref()
                .unwrap_or_else(|| Path::new("build")),
        );

        let needs_ndk = platforms.iter().any(|p| p.is_android());
        let ndk = if needs_ndk {
            Some(resolve_ndk(desc, overrides, project_root)?)
        } else {
            None
        };

        let cargo_command = layers
            .property(
                desc.cargo_command.as_deref(),
                "rust.cargoCommand",
                "CARGO_JNILIBS_CARGO_COMMAND",
            )
            .unwrap_or_else(|| "cargo".into());
        let rustc_command = layers
            .property(
                desc.rustc_command.as_deref(),
                "rust.rustcCommand",
                "CARGO_JNILIBS_RUSTC_COMMAND",
            )
            .unwrap_or_else(|| "rustc".into());
        let python_command = layers
            .property(
                desc.python_command.as_deref(),
                "rust.pythonCommand",
                "CARGO_JNILIBS_PYTHON_COMMAND",
            )
            .unwrap_or_else(|| "python".into());
        let rustup_channel = layers
            .property(
                desc.rustup_channel.as_deref(),
                "rust.rustupChannel",
                "CARGO_JNILIBS_RUSTUP_CHANNEL",
            )
            .filter(|c| !c.is_empty());
        let auto_configure_clang_sys = layers.flag(
            desc.auto_configure_clang_sys,
            "rust.autoConfigureClangSys",
            "CARGO_JNILIBS_AUTO_CONFIGURE_CLANG_SYS",
            true,
        )?;

        let mut extra_args = desc.extra_cargo_build_arguments.clone();
        extra_args.extend(overrides.extra_args.iter().cloned());

        let targets = platforms
            .into_iter()
            .map(|platform| {
                let mut env = desc.env.clone();
                env.extend(layers.target_passthrough(platform));
                PlannedTarget {
                    platform,
                    api_level: api_levels[platform.name],
                    env,
                }
            })
            .collect();

        Ok(BuildPlan {
            settings: BuildSettings {
                project_root: project_root.to_path_buf(),
                module_dir,
                libname,
                profile,
                features,
                rustup_channel,
                verbose: desc.verbose,
                extra_args,
                auto_configure_clang_sys,
                generate_build_id: desc.generate_build_id,
                cargo_command,
                rustc_command,
                python_command,
                target_dir,
                target_includes: desc.target_includes.clone(),
                output_dir: build_dir.join("rustJniLibs"),
                linker_wrapper: LinkerWrapper::new(&build_dir, host),
                ndk,
                toolchain_dir,
                host,
                parallel: overrides.parallel.unwrap_or(desc.parallel),
            },
            targets,
        })
    }
}

fn absolute(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Picks the target list and removes repeats. An empty list is an error
/// wherever it came from.
fn resolve_target_names(
    desc: &BuildDescription,
    layers: &ConfigLayers,
    overrides: &Overrides,
    project_name: Option<&str>,
) -> Result<Vec<String>> {
    let targets = uniq(select_target_names(desc, layers, overrides, project_name));
    if targets.is_empty() {
        return Err(Error::MissingRequiredConfiguration("targets".into()));
    }
    Ok(targets)
}

fn select_target_names(
    desc: &BuildDescription,
    layers: &ConfigLayers,
    overrides: &Overrides,
    project_name: Option<&str>,
) -> Vec<String> {
    if !overrides.targets.is_empty() {
        return overrides.targets.clone();
    }

    // `local.properties` may narrow the targets for a local checkout.
    let local = project_name
        .and_then(|name| layers.local.get(&format!("rust.targets.{name}")))
        .or_else(|| layers.local.get("rust.targets"));
    if let Some(local) = local {
        log::debug!("Using targets from {LOCAL_PROPERTIES}: {local}");
        return local
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
    }

    desc.targets.clone().unwrap_or_default()
}

/// Two platforms staging into one folder would overwrite each other's
/// libraries.
fn check_distinct_folders(platforms: &[&'static PlatformEntry]) -> Result<()> {
    for (i, a) in platforms.iter().enumerate() {
        if let Some(b) = platforms[..i].iter().find(|b| b.folder == a.folder) {
            return Err(Error::ConflictingConfiguration(format!(
                "targets `{}` and `{}` both stage into `{}`",
                b.name, a.name, a.folder
            )));
        }
    }
    Ok(())
}

fn resolve_api_levels(
    desc: &BuildDescription,
    targets: &[String],
) -> Result<BTreeMap<String, u32>> {
    match (&desc.api_levels, desc.api_level) {
        (Some(levels), Some(_)) if !levels.is_empty() => Err(Error::ConflictingConfiguration(
            "cannot set both `api-level` and `api-levels`".into(),
        )),
        (Some(levels), _) if !levels.is_empty() => {
            let missing = targets
                .iter()
                .filter(|t| !levels.contains_key(*t))
                .cloned()
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                return Err(Error::MissingRequiredConfiguration(format!(
                    "`api-levels` missing entries for: {}",
                    missing.join(", ")
                )));
            }
            Ok(levels.clone())
        }
        (_, Some(level)) => Ok(targets.iter().map(|t| (t.clone(), level)).collect()),
        (_, None) => Err(Error::MissingRequiredConfiguration(
            "`api-level` or `api-levels`".into(),
        )),
    }
}

fn resolve_ndk(
    desc: &BuildDescription,
    overrides: &Overrides,
    project_root: &Path,
) -> Result<NdkInfo> {
    let section = desc.ndk.clone().unwrap_or_default();

    let path = match overrides.ndk.as_ref().or(section.path.as_ref()) {
        Some(path) => absolute(project_root, path),
        None => match ndk::derive_ndk_path() {
            Some((path, method)) => {
                log::info!("Using NDK at path: {} [{method}]", path.display());
                path
            }
            None => {
                return Err(Error::MissingRequiredConfiguration(
                    "an NDK installation (set ANDROID_NDK_HOME or `[ndk] path`)".into(),
                ));
            }
        },
    };

    Ok(match section.version {
        Some(version) => NdkInfo::new(path, version),
        None => NdkInfo::from_path(path),
    })
}
