use std::fmt::Display;

use crate::error::{Error, Result};

/// How a platform is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainKind {
    /// Built with the host's own toolchain; no cross environment is needed.
    Desktop,
    /// Cross-compiled with the NDK's prebuilt LLVM toolchain.
    ///
    /// For 32-bit ARM the compiler is prefixed with `armv7a-linux-androideabi`
    /// but the binutils are prefixed with `arm-linux-androideabi`. For every
    /// other architecture both prefixes equal the target triple.
    Android {
        compiler_triple: &'static str,
        binutils_triple: &'static str,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub struct PlatformEntry {
    pub name: &'static str,
    pub kind: ToolchainKind,
    pub triple: &'static str,
    /// Sub-directory of the staging root the artifacts land in.
    pub folder: &'static str,
}

const fn desktop(name: &'static str, triple: &'static str, folder: &'static str) -> PlatformEntry {
    PlatformEntry {
        name,
        kind: ToolchainKind::Desktop,
        triple,
        folder,
    }
}

const fn android(
    name: &'static str,
    triple: &'static str,
    compiler_triple: &'static str,
    binutils_triple: &'static str,
    folder: &'static str,
) -> PlatformEntry {
    PlatformEntry {
        name,
        kind: ToolchainKind::Android {
            compiler_triple,
            binutils_triple,
        },
        triple,
        folder,
    }
}

// See https://doc.rust-lang.org/rustc/platform-support.html
// and https://developer.android.com/ndk/guides/other_build_systems#overview
static PLATFORMS: &[PlatformEntry] = &[
    desktop(
        "linux-x86-64",
        "x86_64-unknown-linux-gnu",
        "desktop/linux-x86-64",
    ),
    // Superseded by darwin-x86-64, kept for existing build descriptions.
    desktop("darwin", "x86_64-apple-darwin", "desktop/darwin"),
    desktop(
        "darwin-x86-64",
        "x86_64-apple-darwin",
        "desktop/darwin-x86-64",
    ),
    desktop(
        "darwin-aarch64",
        "aarch64-apple-darwin",
        "desktop/darwin-aarch64",
    ),
    desktop(
        "win32-x86-64-msvc",
        "x86_64-pc-windows-msvc",
        "desktop/win32-x86-64",
    ),
    desktop(
        "win32-x86-64-gnu",
        "x86_64-pc-windows-gnu",
        "desktop/win32-x86-64",
    ),
    android(
        "arm",
        "armv7-linux-androideabi",
        "armv7a-linux-androideabi",
        "arm-linux-androideabi",
        "android/armeabi-v7a",
    ),
    android(
        "arm64",
        "aarch64-linux-android",
        "aarch64-linux-android",
        "aarch64-linux-android",
        "android/arm64-v8a",
    ),
    android(
        "x86",
        "i686-linux-android",
        "i686-linux-android",
        "i686-linux-android",
        "android/x86",
    ),
    android(
        "x86_64",
        "x86_64-linux-android",
        "x86_64-linux-android",
        "x86_64-linux-android",
        "android/x86_64",
    ),
];

pub fn platforms() -> &'static [PlatformEntry] {
    PLATFORMS
}

/// Every registered identifier, sorted.
pub fn platform_names() -> Vec<&'static str> {
    let mut names = PLATFORMS.iter().map(|p| p.name).collect::<Vec<_>>();
    names.sort_unstable();
    names
}

pub fn lookup(name: &str) -> Result<&'static PlatformEntry> {
    PLATFORMS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| Error::UnknownPlatform {
            name: name.to_string(),
            known: platform_names().into_iter().map(String::from).collect(),
        })
}

impl PlatformEntry {
    pub fn is_android(&self) -> bool {
        matches!(self.kind, ToolchainKind::Android { .. })
    }

    /// `aarch64-linux-android` -> `AARCH64_LINUX_ANDROID`
    pub fn env_triple(&self) -> String {
        self.triple.to_uppercase().replace('-', "_")
    }
}

impl Display for PlatformEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}
