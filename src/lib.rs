pub mod cargo;
pub mod cli;
pub mod config;
pub mod error;
pub mod linker;
pub mod meta;
pub mod ndk;
pub mod orchestrator;
pub mod rustc;
pub mod shell;
pub mod toolchain;

pub use error::{Error, Result};

/// The operating system the builds are driven from.
///
/// Queried once at startup with [`HostPlatform::current`] and passed down to
/// everything that builds file names, so tests can pick any host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Linux,
    MacOs,
    Windows { x86_64: bool },
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            HostPlatform::Windows {
                x86_64: cfg!(target_arch = "x86_64"),
            }
        } else if cfg!(target_os = "macos") {
            HostPlatform::MacOs
        } else {
            HostPlatform::Linux
        }
    }

    pub fn is_windows(self) -> bool {
        matches!(self, HostPlatform::Windows { .. })
    }

    /// Directory name under `toolchains/llvm/prebuilt` in the NDK.
    pub fn ndk_host_tag(self) -> &'static str {
        match self {
            HostPlatform::Windows { x86_64: true } => "windows-x86_64",
            HostPlatform::Windows { x86_64: false } => "windows",
            HostPlatform::MacOs => "darwin-x86_64",
            HostPlatform::Linux => "linux-x86_64",
        }
    }

    /// Suffix of the NDK's clang wrapper scripts.
    pub fn clang_ext(self) -> &'static str {
        if self.is_windows() { ".cmd" } else { "" }
    }

    /// Suffix of the linker wrapper shim handed to cargo.
    pub fn script_ext(self) -> &'static str {
        if self.is_windows() { ".bat" } else { ".sh" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_tags() {
        assert_eq!(HostPlatform::Linux.ndk_host_tag(), "linux-x86_64");
        assert_eq!(HostPlatform::MacOs.ndk_host_tag(), "darwin-x86_64");
        assert_eq!(
            HostPlatform::Windows { x86_64: true }.ndk_host_tag(),
            "windows-x86_64"
        );
        assert_eq!(
            HostPlatform::Windows { x86_64: false }.ndk_host_tag(),
            "windows"
        );
    }

    #[test]
    fn windows_suffixes() {
        let win = HostPlatform::Windows { x86_64: true };
        assert_eq!(win.clang_ext(), ".cmd");
        assert_eq!(win.script_ext(), ".bat");
        assert_eq!(HostPlatform::Linux.clang_ext(), "");
        assert_eq!(HostPlatform::MacOs.script_ext(), ".sh");
    }
}
