//! Linker wrapper installation.
//!
//! Cargo has no way to pass extra raw linker flags for a single target, so
//! `CARGO_TARGET_<TRIPLE>_LINKER` points at a small shim that hands off to a
//! Python script. The script reads `CARGO_JNILIBS_CC` and
//! `CARGO_JNILIBS_CC_LINK_ARG` and runs the real NDK clang with the extra
//! arguments prepended.

use std::path::{Path, PathBuf};

use crate::{
    HostPlatform,
    error::{Error, Result},
};

const SH: &str = include_str!("linker-wrapper/linker-wrapper.sh");
const BAT: &str = include_str!("linker-wrapper/linker-wrapper.bat");
const PY: &str = include_str!("linker-wrapper/linker-wrapper.py");

/// Location of the installed wrapper, shared by every target of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkerWrapper {
    dir: PathBuf,
    host: HostPlatform,
}

impl LinkerWrapper {
    pub fn new(build_dir: &Path, host: HostPlatform) -> Self {
        Self {
            dir: build_dir.join("linker-wrapper"),
            host,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The shim cargo invokes as the linker.
    pub fn script(&self) -> PathBuf {
        self.dir
            .join(format!("linker-wrapper{}", self.host.script_ext()))
    }

    pub fn python_script(&self) -> PathBuf {
        self.dir.join("linker-wrapper.py")
    }

    /// Writes all wrapper files, replacing stale copies.
    pub fn install(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        for (name, contents) in [
            ("linker-wrapper.sh", SH),
            ("linker-wrapper.bat", BAT),
            ("linker-wrapper.py", PY),
        ] {
            let path = self.dir.join(name);
            log::trace!("Writing {}", path.display());
            std::fs::write(&path, contents).map_err(|e| Error::io(&path, e))?;
            make_executable(&path)?;
        }

        Ok(())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
