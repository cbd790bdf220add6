use std::{
    env,
    path::{Path, PathBuf},
};

use cargo_metadata::semver::Version;

use crate::{HostPlatform, config::parse_properties};

/// An NDK installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdkInfo {
    pub path: PathBuf,
    pub version: String,
}

impl NdkInfo {
    pub fn new(path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    /// Reads the version from `source.properties`, defaulting to `0.0`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let version = read_ndk_version(&path).unwrap_or_else(|| "0.0".into());
        Self { path, version }
    }

    /// Leading component of the version, or 0 when it does not parse.
    pub fn version_major(&self) -> u32 {
        self.version
            .split('.')
            .next()
            .and_then(|major| major.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn prebuilt_dir(&self, host: HostPlatform) -> PathBuf {
        self.path
            .join("toolchains")
            .join("llvm")
            .join("prebuilt")
            .join(host.ndk_host_tag())
    }
}

fn read_ndk_version(ndk_home: &Path) -> Option<String> {
    let file = ndk_home.join("source.properties");
    let contents = match std::fs::read_to_string(&file) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("Could not read {}: {e}", file.display());
            return None;
        }
    };
    parse_properties(&contents).remove("Pkg.Revision")
}

fn highest_version_ndk_in_path(ndk_dir: &Path) -> Option<PathBuf> {
    if ndk_dir.exists() {
        std::fs::read_dir(ndk_dir)
            .ok()?
            .flat_map(Result::ok)
            .filter_map(|x| {
                let path = x.path();
                path.components()
                    .next_back()
                    .and_then(|comp| comp.as_os_str().to_str())
                    .and_then(|name| Version::parse(name).ok())
                    .map(|version| (version, path))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, path)| path)
    } else {
        None
    }
}

/// Locates an NDK from the usual environment variables, then from the
/// default Android Studio SDK location.
pub fn derive_ndk_path() -> Option<(PathBuf, &'static str)> {
    for var in ["ANDROID_NDK", "ANDROID_NDK_ROOT"] {
        if let Some(path) = env::var_os(var) {
            return Some((PathBuf::from(path), var));
        }
    }

    for var in ["ANDROID_NDK_HOME", "NDK_HOME"] {
        if let Some(path) = env::var_os(var) {
            let path = PathBuf::from(path);
            return Some((highest_version_ndk_in_path(&path).unwrap_or(path), var));
        }
    }

    if let Some(sdk_path) = env::var_os("ANDROID_SDK_HOME") {
        let ndk_path = PathBuf::from(&sdk_path).join("ndk");
        if let Some(v) = highest_version_ndk_in_path(&ndk_path) {
            return Some((v, "ANDROID_SDK_HOME"));
        }
    }

    // Android Studio installed directories
    #[cfg(windows)]
    let base_dir = dirs::data_local_dir()?;
    #[cfg(target_os = "macos")]
    let base_dir = dirs::home_dir()?.join("Library");
    #[cfg(not(any(windows, target_os = "macos")))]
    let base_dir = dirs::data_dir()?;

    let ndk_dir = base_dir.join("Android").join("sdk").join("ndk");
    log::trace!("Default NDK dir: {:?}", &ndk_dir);
    highest_version_ndk_in_path(&ndk_dir).map(|p| (p, "Android Studio"))
}
