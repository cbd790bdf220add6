use std::path::{Path, PathBuf};

use crate::{
    HostPlatform,
    meta::{PlatformEntry, ToolchainKind},
    ndk::NdkInfo,
};

/// First NDK release that dropped the per-triple GNU binutils.
const UNIFIED_BINUTILS_NDK: u32 = 23;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainPaths {
    pub cc: PathBuf,
    pub cxx: PathBuf,
    pub ar: PathBuf,
}

/// Computes where the C/C++ compilers and archiver of a platform live.
///
/// Nothing here touches the filesystem; a wrong path only shows up once the
/// build script of some dependency tries to run the tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolchainLayout<'a> {
    pub ndk: &'a NdkInfo,
    pub host: HostPlatform,
    /// Root of standalone toolchains, used for platforms that are not built
    /// from the NDK's prebuilt LLVM directory.
    pub standalone_dir: &'a Path,
}

impl<'a> ToolchainLayout<'a> {
    pub fn new(ndk: &'a NdkInfo, host: HostPlatform, standalone_dir: &'a Path) -> Self {
        Self {
            ndk,
            host,
            standalone_dir,
        }
    }

    /// Directory the resolved binaries are relative to.
    pub fn toolchain_dir(&self, entry: &PlatformEntry) -> PathBuf {
        match entry.kind {
            ToolchainKind::Android { .. } => self.ndk.prebuilt_dir(self.host),
            ToolchainKind::Desktop => self.standalone_dir.to_path_buf(),
        }
    }

    pub fn resolve(&self, entry: &PlatformEntry, api_level: u32) -> ToolchainPaths {
        let root = self.toolchain_dir(entry);
        let ext = self.host.clang_ext();

        let (bin_dir, clang_stem, binutils_triple) = match entry.kind {
            ToolchainKind::Android {
                compiler_triple,
                binutils_triple,
            } => (
                root.join("bin"),
                format!("{compiler_triple}{api_level}-clang"),
                binutils_triple,
            ),
            ToolchainKind::Desktop => (
                root.join(format!("{}-{api_level}", entry.name)).join("bin"),
                format!("{}-clang", entry.triple),
                entry.triple,
            ),
        };

        let ar = if self.ndk.version_major() >= UNIFIED_BINUTILS_NDK {
            root.join("bin").join("llvm-ar")
        } else {
            bin_dir.join(format!("{binutils_triple}-ar"))
        };

        ToolchainPaths {
            cc: bin_dir.join(format!("{clang_stem}{ext}")),
            cxx: bin_dir.join(format!("{clang_stem}++{ext}")),
            ar,
        }
    }
}
