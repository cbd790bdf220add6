//! Runs one cargo build per requested platform and stages the results.
//!
//! Platforms are independent: each gets its own subprocess, its own cargo
//! output directory and its own staging folder, so a failure is confined to
//! the platform it happened on.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use crate::{
    cargo::{self, TargetBuildRequest},
    config::{BuildPlan, BuildSettings, PlannedTarget},
    error::{Error, Result},
    meta::PlatformEntry,
    rustc,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub platform: &'static PlatformEntry,
    /// Public directory the artifacts were copied into.
    pub staged_dir: PathBuf,
    pub artifacts: Vec<PathBuf>,
}

/// Progress of a single platform.
#[derive(Debug)]
pub enum BuildState<'a> {
    Pending,
    Running { args: &'a [String] },
    Succeeded(&'a BuildResult),
    Failed(&'a Error),
}

#[derive(Debug)]
pub struct BuildReport {
    pub outcomes: Vec<(&'static PlatformEntry, Result<BuildResult>)>,
}

impl BuildReport {
    pub fn failed(&self) -> impl Iterator<Item = (&'static PlatformEntry, &Error)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(p, r)| r.as_ref().err().map(|e| (*p, e)))
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Fails if any platform failed, naming all of them.
    pub fn into_result(self) -> Result<Vec<BuildResult>> {
        let mut built = Vec::with_capacity(self.outcomes.len());
        let mut failed = Vec::new();
        for (platform, outcome) in self.outcomes {
            match outcome {
                Ok(result) => built.push(result),
                Err(e) => failed.push((platform.name.to_string(), e)),
            }
        }
        if failed.is_empty() {
            Ok(built)
        } else {
            Err(Error::PlatformsFailed(failed))
        }
    }
}

/// Callback for state changes; called from worker threads in parallel mode.
pub type Observer<'o> = dyn Fn(&PlatformEntry, BuildState<'_>) + Sync + 'o;

/// Builds every planned platform.
///
/// Only setup failures (installing the linker wrapper) are returned as `Err`;
/// per-platform failures end up in the report.
pub fn build_all(plan: &BuildPlan, observer: &Observer<'_>) -> Result<BuildReport> {
    let settings = &plan.settings;

    if plan.needs_ndk() {
        log::debug!(
            "Installing linker wrapper into {}",
            settings.linker_wrapper.dir().display()
        );
        settings.linker_wrapper.install()?;
    }

    for target in &plan.targets {
        observer(target.platform, BuildState::Pending);
    }

    let outcomes = if settings.parallel && plan.targets.len() > 1 {
        std::thread::scope(|scope| {
            let handles = plan
                .targets
                .iter()
                .map(|target| {
                    scope.spawn(move || (target.platform, build_target(settings, target, observer)))
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    } else {
        plan.targets
            .iter()
            .map(|target| (target.platform, build_target(settings, target, observer)))
            .collect()
    };

    Ok(BuildReport { outcomes })
}

fn build_target(
    settings: &BuildSettings,
    target: &PlannedTarget,
    observer: &Observer<'_>,
) -> Result<BuildResult> {
    let request = TargetBuildRequest {
        platform: target.platform,
        api_level: target.api_level,
        env_overrides: &target.env,
        settings,
    };

    let outcome = run_request(&request, observer);
    match &outcome {
        Ok(result) => observer(target.platform, BuildState::Succeeded(result)),
        Err(e) => observer(target.platform, BuildState::Failed(e)),
    }
    outcome
}

fn run_request(request: &TargetBuildRequest<'_>, observer: &Observer<'_>) -> Result<BuildResult> {
    let host_triple = rustc::detect_host_triple(&request.settings.rustc_command);
    let host_triple = host_triple.as_deref();

    let args = cargo::cargo_args(request, host_triple);
    observer(request.platform, BuildState::Running { args: &args });
    cargo::run(request, host_triple)?;

    let from = cargo::cargo_output_dir(request, host_triple);
    stage(request.settings, request.platform, &from)
}

/// File patterns selecting the artifacts to stage.
pub fn include_patterns(settings: &BuildSettings) -> Vec<String> {
    match &settings.target_includes {
        Some(includes) => includes.clone(),
        None => {
            let name = &settings.libname;
            vec![
                format!("lib{name}.so"),
                format!("lib{name}.dylib"),
                format!("{name}.dll"),
            ]
        }
    }
}

/// Copies matching files from cargo's output directory into
/// `<output>/<platform folder>`.
pub fn stage(
    settings: &BuildSettings,
    platform: &'static PlatformEntry,
    from: &Path,
) -> Result<BuildResult> {
    let patterns = include_patterns(settings);
    let root = glob::Pattern::escape(&from.to_string_lossy());

    let mut sources = BTreeSet::new();
    for pattern in &patterns {
        let full = format!("{root}/{pattern}");
        let paths = glob::glob(&full).map_err(|source| Error::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        for path in paths {
            match path {
                Ok(path) if path.is_file() => {
                    sources.insert(path);
                }
                Ok(_) => {}
                Err(e) => log::warn!("Skipping {}: {}", e.path().display(), e.error()),
            }
        }
    }

    if sources.is_empty() {
        return Err(Error::ArtifactStagingFailure {
            platform: platform.name.to_string(),
            dir: from.to_path_buf(),
            patterns,
        });
    }

    let into = settings.output_dir.join(platform.folder);
    std::fs::create_dir_all(&into).map_err(|e| Error::io(&into, e))?;

    let mut artifacts = Vec::with_capacity(sources.len());
    for source in sources {
        let dest = match source.strip_prefix(from) {
            Ok(relative) => into.join(relative),
            Err(_) => into.join(source.file_name().unwrap_or_default()),
        };
        log::info!("{} -> {}", source.display(), dest.display());
        copy_into_place(&source, &dest)?;
        artifacts.push(dest);
    }

    Ok(BuildResult {
        platform,
        staged_dir: into,
        artifacts,
    })
}

/// Copies to a uniquely named hidden sibling, then renames it over `dest`, so
/// a reader never sees a partial file even with concurrent writers.
fn copy_into_place(source: &Path, dest: &Path) -> Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

    let mut from = std::fs::File::open(source).map_err(|e| Error::io(source, e))?;
    let permissions = from
        .metadata()
        .map_err(|e| Error::io(source, e))?
        .permissions();

    // Dropped (and removed) on any early return.
    let mut tmp = tempfile::Builder::new()
        .prefix(".jnilibs-")
        .tempfile_in(parent)
        .map_err(|e| Error::io(parent, e))?;
    std::io::copy(&mut from, tmp.as_file_mut()).map_err(|e| Error::io(source, e))?;
    tmp.as_file()
        .set_permissions(permissions)
        .map_err(|e| Error::io(dest, e))?;
    tmp.persist(dest).map_err(|e| Error::io(dest, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        HostPlatform,
        config::{BuildProfile, FeatureSelection},
        linker::LinkerWrapper,
        meta::lookup,
    };

    fn settings(root: &Path) -> BuildSettings {
        BuildSettings {
            project_root: root.into(),
            module_dir: root.join("rust"),
            libname: "rust".into(),
            profile: BuildProfile::Release,
            features: FeatureSelection::Unset,
            rustup_channel: None,
            verbose: None,
            extra_args: vec![],
            auto_configure_clang_sys: true,
            generate_build_id: false,
            cargo_command: "cargo".into(),
            rustc_command: "rustc".into(),
            python_command: "python".into(),
            target_dir: root.join("rust/target"),
            target_includes: None,
            output_dir: root.join("build/rustJniLibs"),
            linker_wrapper: LinkerWrapper::new(&root.join("build"), HostPlatform::Linux),
            ndk: None,
            toolchain_dir: root.join("toolchains"),
            host: HostPlatform::Linux,
            parallel: false,
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"\x7fELF").unwrap();
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn default_patterns() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            include_patterns(&settings(dir.path())),
            ["librust.so", "librust.dylib", "rust.dll"]
        );
    }

    #[test]
    fn stages_only_the_library() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let from = dir.path().join("rust/target/aarch64-linux-android/release");
        touch(&from.join("librust.so"));
        touch(&from.join("librust.d"));
        touch(&from.join("librust.rlib"));
        touch(&from.join("libother.so"));
        touch(&from.join("deps/librust-0123.so"));

        let result = stage(&s, lookup("arm64").unwrap(), &from).unwrap();
        let into = dir.path().join("build/rustJniLibs/android/arm64-v8a");
        assert_eq!(result.staged_dir, into);
        assert_eq!(result.artifacts, [into.join("librust.so")]);
        assert_eq!(listing(&into), ["librust.so"]);
    }

    #[test]
    fn explicit_includes() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.target_includes = Some(vec!["*.so".into(), "lib*.so".into()]);
        let from = dir.path().join("out");
        touch(&from.join("liba.so"));
        touch(&from.join("libb.so"));
        touch(&from.join("libc.a"));

        let result = stage(&s, lookup("x86").unwrap(), &from).unwrap();
        assert_eq!(result.artifacts.len(), 2);
        assert_eq!(listing(&result.staged_dir), ["liba.so", "libb.so"]);
    }

    #[test]
    fn missing_artifact_is_a_staging_failure() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let from = dir.path().join("rust/target/release");
        touch(&from.join("librust.rlib"));

        match stage(&s, lookup("linux-x86-64").unwrap(), &from) {
            Err(Error::ArtifactStagingFailure { platform, dir: d, patterns }) => {
                assert_eq!(platform, "linux-x86-64");
                assert_eq!(d, from);
                assert_eq!(patterns.len(), 3);
            }
            other => panic!("{other:?}"),
        }
        assert!(!dir.path().join("build/rustJniLibs/desktop").exists());
    }

    #[test]
    fn restaging_replaces_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let from = dir.path().join("out");
        touch(&from.join("librust.so"));
        stage(&s, lookup("arm").unwrap(), &from).unwrap();

        std::fs::write(from.join("librust.so"), b"newer").unwrap();
        let result = stage(&s, lookup("arm").unwrap(), &from).unwrap();
        assert_eq!(std::fs::read(&result.artifacts[0]).unwrap(), b"newer");
        assert_eq!(listing(&result.staged_dir), ["librust.so"]);
    }

    #[test]
    fn concurrent_staging_into_one_folder() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let len = 4 << 20;
        let sources = [("win32-x86-64-msvc", b'a'), ("win32-x86-64-gnu", b'b')].map(
            |(name, byte)| {
                let from = dir.path().join(name);
                std::fs::create_dir_all(&from).unwrap();
                std::fs::write(from.join("rust.dll"), vec![byte; len]).unwrap();
                (lookup(name).unwrap(), from)
            },
        );

        for _ in 0..4 {
            std::thread::scope(|scope| {
                let handles = sources
                    .iter()
                    .map(|(platform, from)| {
                        let (s, platform) = (&s, *platform);
                        scope.spawn(move || stage(s, platform, from))
                    })
                    .collect::<Vec<_>>();
                for handle in handles {
                    handle.join().unwrap().unwrap();
                }
            });

            let into = dir.path().join("build/rustJniLibs/desktop/win32-x86-64");
            let staged = std::fs::read(into.join("rust.dll")).unwrap();
            assert_eq!(staged.len(), len);
            assert!(staged.iter().all(|b| *b == staged[0]));
            assert_eq!(listing(&into), ["rust.dll"]);
        }
    }

    #[test]
    fn report_aggregates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let report = BuildReport {
            outcomes: vec![
                (
                    lookup("arm64").unwrap(),
                    Ok(BuildResult {
                        platform: lookup("arm64").unwrap(),
                        staged_dir: dir.path().into(),
                        artifacts: vec![],
                    }),
                ),
                (
                    lookup("x86").unwrap(),
                    Err(Error::SubprocessFailure {
                        platform: "x86".into(),
                        program: "cargo".into(),
                        code: Some(101),
                    }),
                ),
            ],
        };
        assert!(!report.is_success());
        assert_eq!(report.failed().map(|(p, _)| p.name).collect::<Vec<_>>(), ["x86"]);
        match report.into_result() {
            Err(Error::PlatformsFailed(failed)) => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, "x86");
                assert!(matches!(
                    failed[0].1,
                    Error::SubprocessFailure { code: Some(101), .. }
                ));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn empty_plan_builds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let plan = BuildPlan {
            settings: settings(dir.path()),
            targets: vec![],
        };
        let report = build_all(&plan, &|_, _| {}).unwrap();
        assert!(report.is_success());
        assert!(report.into_result().unwrap().is_empty());
        assert!(!dir.path().join("build").exists());
    }
}
