use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::PathBuf,
    process::Command,
};

use crate::{
    config::{BuildSettings, FeatureSelection},
    error::{Error, Result},
    meta::{PlatformEntry, ToolchainKind},
    ndk::NdkInfo,
    toolchain::{ToolchainLayout, ToolchainPaths},
};

/// Everything needed to build one platform. Borrowed from the build plan and
/// never mutated while the build runs.
#[derive(Debug, Clone, Copy)]
pub struct TargetBuildRequest<'a> {
    pub platform: &'static PlatformEntry,
    pub api_level: u32,
    pub env_overrides: &'a BTreeMap<String, String>,
    pub settings: &'a BuildSettings,
}

/// Only non-host targets get `--target`, so desktop builds share cargo's
/// cache with plain `cargo build`/`cargo test` invocations.
pub fn needs_target_flag(platform: &PlatformEntry, host_triple: Option<&str>) -> bool {
    host_triple != Some(platform.triple)
}

fn verbose(explicit: Option<bool>) -> bool {
    explicit.unwrap_or_else(|| log::log_enabled!(log::Level::Info))
}

fn cargo_env_target_cfg(triple: &str, key: &str) -> String {
    format!("CARGO_TARGET_{}_{}", &triple.replace('-', "_"), key).to_uppercase()
}

/// `-soname` and friends, appended by the linker wrapper.
pub fn cc_link_arg(libname: &str, generate_build_id: bool) -> String {
    // libname goes to the linker verbatim.
    let mut arg = format!("-Wl,-z,max-page-size=16384,-soname,lib{libname}.so");
    if generate_build_id {
        arg.push_str(",--build-id");
    }
    arg
}

/// The full cargo command line, program first.
pub fn cargo_args(request: &TargetBuildRequest<'_>, host_triple: Option<&str>) -> Vec<String> {
    let settings = request.settings;
    let mut args = vec![settings.cargo_command.clone()];

    if let Some(channel) = settings.rustup_channel.as_deref().filter(|c| !c.is_empty()) {
        if channel.starts_with('+') {
            args.push(channel.to_string());
        } else {
            args.push(format!("+{channel}"));
        }
    }

    args.push("build".into());

    if verbose(settings.verbose) {
        args.push("--verbose".into());
    }

    // Features are handed to cargo space separated as a single argument.
    match &settings.features {
        FeatureSelection::All => args.push("--all-features".into()),
        FeatureSelection::DefaultAnd(features) => {
            if !features.is_empty() {
                args.push("--features".into());
                args.push(features.join(" "));
            }
        }
        FeatureSelection::NoDefaultBut(features) => {
            args.push("--no-default-features".into());
            if !features.is_empty() {
                args.push("--features".into());
                args.push(features.join(" "));
            }
        }
        FeatureSelection::Unset => {}
    }

    if let Some(flag) = settings.profile.cargo_flag() {
        args.push(flag);
    }

    if needs_target_flag(request.platform, host_triple) {
        args.push(format!("--target={}", request.platform.triple));
    }

    args.extend(settings.extra_args.iter().cloned());
    args
}

/// Environment for cross-compiling to an Android target through the NDK.
pub fn cross_compile_env(
    request: &TargetBuildRequest<'_>,
    ndk: &NdkInfo,
    tools: &ToolchainPaths,
) -> BTreeMap<String, OsString> {
    let settings = request.settings;
    let triple = request.platform.triple;
    let upper = request.platform.env_triple();
    let wrapper = &settings.linker_wrapper;

    let mut env = BTreeMap::<String, OsString>::new();
    env.insert(
        "CARGO_NDK_MAJOR_VERSION".into(),
        ndk.version_major().to_string().into(),
    );
    env.insert(
        cargo_env_target_cfg(triple, "linker"),
        wrapper.script().into_os_string(),
    );

    // cc-rs looks up both `CC_<triple>` and the underscored form.
    for (tool, path) in [("CC", &tools.cc), ("CXX", &tools.cxx), ("AR", &tools.ar)] {
        env.insert(format!("{tool}_{upper}"), path.clone().into_os_string());
        env.insert(format!("{tool}_{triple}"), path.clone().into_os_string());
    }

    // For bindgen and anything else using clang-sys from a build script.
    if settings.auto_configure_clang_sys {
        env.insert("CLANG_PATH".into(), tools.cc.clone().into_os_string());
    }

    env.insert(
        "CARGO_JNILIBS_PYTHON_COMMAND".into(),
        settings.python_command.clone().into(),
    );
    env.insert(
        "CARGO_JNILIBS_LINKER_WRAPPER_PY".into(),
        wrapper.python_script().into_os_string(),
    );
    env.insert("CARGO_JNILIBS_CC".into(), tools.cc.clone().into_os_string());
    env.insert(
        "CARGO_JNILIBS_CC_LINK_ARG".into(),
        cc_link_arg(&settings.libname, settings.generate_build_id).into(),
    );

    env
}

/// Caller overrides first, then whatever the toolchain type needs. Later
/// insertions win on key collisions.
pub fn build_env(request: &TargetBuildRequest<'_>) -> Result<BTreeMap<String, OsString>> {
    let mut env = request
        .env_overrides
        .iter()
        .map(|(k, v)| (k.clone(), OsString::from(v)))
        .collect::<BTreeMap<_, _>>();

    match request.platform.kind {
        ToolchainKind::Desktop => {}
        ToolchainKind::Android { .. } => {
            let settings = request.settings;
            let ndk = settings.ndk.as_ref().ok_or_else(|| {
                Error::MissingRequiredConfiguration(format!(
                    "an NDK installation for {}",
                    request.platform
                ))
            })?;
            let tools = ToolchainLayout::new(ndk, settings.host, &settings.toolchain_dir)
                .resolve(request.platform, request.api_level);
            env.extend(cross_compile_env(request, ndk, &tools));
        }
    }

    Ok(env)
}

/// Where cargo leaves this platform's artifacts.
pub fn cargo_output_dir(request: &TargetBuildRequest<'_>, host_triple: Option<&str>) -> PathBuf {
    let settings = request.settings;
    let dir = if needs_target_flag(request.platform, host_triple) {
        settings.target_dir.join(request.platform.triple)
    } else {
        settings.target_dir.clone()
    };
    let dir = dir.join(settings.profile.dir_name());
    dunce::canonicalize(&dir).unwrap_or(dir)
}

/// Runs `cargo build` for one platform, inheriting stdout and stderr.
pub fn run(request: &TargetBuildRequest<'_>, host_triple: Option<&str>) -> Result<()> {
    let args = cargo_args(request, host_triple);
    let env = build_env(request)?;
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| Error::MissingRequiredConfiguration("cargo command".into()))?;

    log::debug!("cargo: {program}");
    for (k, v) in &env {
        log::debug!("{k}={}", v.to_string_lossy());
    }
    log::debug!("Args: {:?}", &rest);
    log::debug!("Working directory: {}", request.settings.module_dir.display());

    let status = Command::new(program)
        .current_dir(&request.settings.module_dir)
        .args(rest)
        .envs(&env)
        .status()
        .map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::SubprocessFailure {
            platform: request.platform.name.to_string(),
            program: program.clone(),
            code: status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{
        HostPlatform,
        config::BuildProfile,
        linker::LinkerWrapper,
        meta::lookup,
    };

    fn settings() -> BuildSettings {
        BuildSettings {
            project_root: "/work".into(),
            module_dir: "/work/rust".into(),
            libname: "rust".into(),
            profile: BuildProfile::Debug,
            features: FeatureSelection::Unset,
            rustup_channel: None,
            verbose: None,
            extra_args: vec![],
            auto_configure_clang_sys: true,
            generate_build_id: false,
            cargo_command: "cargo".into(),
            rustc_command: "rustc".into(),
            python_command: "python3".into(),
            target_dir: "/work/rust/target".into(),
            target_includes: None,
            output_dir: "/work/build/rustJniLibs".into(),
            linker_wrapper: LinkerWrapper::new(Path::new("/work/build"), HostPlatform::Linux),
            ndk: Some(NdkInfo::new("/ndk", "27.3")),
            toolchain_dir: "/tmp/rust-android-ndk-toolchains".into(),
            host: HostPlatform::Linux,
            parallel: false,
        }
    }

    fn request<'a>(
        platform: &str,
        settings: &'a BuildSettings,
        env: &'a BTreeMap<String, String>,
    ) -> TargetBuildRequest<'a> {
        TargetBuildRequest {
            platform: lookup(platform).unwrap(),
            api_level: 23,
            env_overrides: env,
            settings,
        }
    }

    const HOST: Option<&str> = Some("x86_64-unknown-linux-gnu");

    #[test]
    fn minimal_command() {
        let s = settings();
        let env = BTreeMap::new();
        assert_eq!(
            cargo_args(&request("linux-x86-64", &s, &env), HOST),
            ["cargo", "build"]
        );
    }

    #[test]
    fn target_flag_only_when_cross_compiling() {
        let s = settings();
        let env = BTreeMap::new();

        let args = cargo_args(&request("linux-x86-64", &s, &env), HOST);
        assert!(!args.iter().any(|a| a.starts_with("--target")));

        for (platform, host) in [
            ("arm64", HOST),
            ("darwin-aarch64", HOST),
            ("linux-x86-64", None),
        ] {
            let args = cargo_args(&request(platform, &s, &env), host);
            let flags = args.iter().filter(|a| a.starts_with("--target")).collect::<Vec<_>>();
            assert_eq!(
                flags,
                [&format!("--target={}", lookup(platform).unwrap().triple)]
            );
        }
    }

    #[test]
    fn full_command_order() {
        let mut s = settings();
        s.rustup_channel = Some("nightly".into());
        s.verbose = Some(true);
        s.features = FeatureSelection::NoDefaultBut(vec!["a".into(), "b".into()]);
        s.profile = BuildProfile::from("custom");
        s.extra_args = vec!["--locked".into(), "-j2".into()];
        let env = BTreeMap::new();

        assert_eq!(
            cargo_args(&request("arm64", &s, &env), HOST),
            [
                "cargo",
                "+nightly",
                "build",
                "--verbose",
                "--no-default-features",
                "--features",
                "a b",
                "--profile=custom",
                "--target=aarch64-linux-android",
                "--locked",
                "-j2",
            ]
        );
    }

    #[test]
    fn channel_keeps_existing_plus() {
        let mut s = settings();
        s.rustup_channel = Some("+1.86.0".into());
        let env = BTreeMap::new();
        let args = cargo_args(&request("linux-x86-64", &s, &env), HOST);
        assert_eq!(args[1], "+1.86.0");
    }

    #[test]
    fn explicit_false_verbose_wins() {
        let mut s = settings();
        s.verbose = Some(false);
        let env = BTreeMap::new();
        assert!(!cargo_args(&request("arm64", &s, &env), HOST).contains(&"--verbose".to_string()));
    }

    #[test]
    fn feature_policies() {
        let env = BTreeMap::new();
        let mut s = settings();

        s.features = FeatureSelection::All;
        let args = cargo_args(&request("arm64", &s, &env), HOST);
        assert!(args.contains(&"--all-features".into()));
        assert!(!args.contains(&"--features".into()));

        s.features = FeatureSelection::DefaultAnd(vec![]);
        let args = cargo_args(&request("arm64", &s, &env), HOST);
        assert!(!args.contains(&"--features".into()));

        s.features = FeatureSelection::NoDefaultBut(vec![]);
        let args = cargo_args(&request("arm64", &s, &env), HOST);
        assert!(args.contains(&"--no-default-features".into()));
        assert!(!args.contains(&"--features".into()));

        s.features = FeatureSelection::NoDefaultBut(vec!["a".into(), "b".into()]);
        let args = cargo_args(&request("arm64", &s, &env), HOST);
        assert!(args.contains(&"--no-default-features".into()));
        assert!(args.contains(&"a b".into()));
        assert!(!args.contains(&"--all-features".into()));
    }

    #[test]
    fn profile_flags() {
        let env = BTreeMap::new();
        let mut s = settings();
        for (profile, present, absent) in [
            ("release", Some("--release"), "--profile="),
            ("custom", Some("--profile=custom"), "--release"),
        ] {
            s.profile = BuildProfile::from(profile);
            let args = cargo_args(&request("arm64", &s, &env), HOST);
            assert!(args.iter().any(|a| Some(a.as_str()) == present));
            assert!(!args.iter().any(|a| a.starts_with(absent)));
        }
        s.profile = BuildProfile::from("debug");
        let args = cargo_args(&request("arm64", &s, &env), HOST);
        assert!(!args.iter().any(|a| a == "--release" || a.starts_with("--profile")));
    }

    #[test]
    fn desktop_env_is_only_overrides() {
        let s = settings();
        let env = BTreeMap::from([("FOO".to_string(), "bar".to_string())]);
        let built = build_env(&request("linux-x86-64", &s, &env)).unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built["FOO"], "bar");
    }

    #[test]
    fn android_env() {
        let s = settings();
        let env = BTreeMap::new();
        let built = build_env(&request("arm64", &s, &env)).unwrap();

        let cc = Path::new(&built["CC_AARCH64_LINUX_ANDROID"]);
        assert!(cc.ends_with("aarch64-linux-android23-clang"));
        assert_eq!(built["CC_aarch64-linux-android"], built["CC_AARCH64_LINUX_ANDROID"]);
        assert!(
            Path::new(&built["CXX_AARCH64_LINUX_ANDROID"])
                .ends_with("aarch64-linux-android23-clang++")
        );
        assert!(Path::new(&built["AR_AARCH64_LINUX_ANDROID"]).ends_with("llvm-ar"));
        assert_eq!(
            built["CARGO_TARGET_AARCH64_LINUX_ANDROID_LINKER"],
            OsString::from("/work/build/linker-wrapper/linker-wrapper.sh")
        );
        assert_eq!(built["CARGO_NDK_MAJOR_VERSION"], "27");
        assert_eq!(built["CLANG_PATH"], built["CC_AARCH64_LINUX_ANDROID"]);
        assert_eq!(built["CARGO_JNILIBS_CC"], built["CC_AARCH64_LINUX_ANDROID"]);
        assert_eq!(built["CARGO_JNILIBS_PYTHON_COMMAND"], "python3");
        assert_eq!(
            built["CARGO_JNILIBS_LINKER_WRAPPER_PY"],
            OsString::from("/work/build/linker-wrapper/linker-wrapper.py")
        );
        assert_eq!(
            built["CARGO_JNILIBS_CC_LINK_ARG"],
            "-Wl,-z,max-page-size=16384,-soname,librust.so"
        );
    }

    #[test]
    fn clang_sys_and_build_id_toggles() {
        let mut s = settings();
        s.auto_configure_clang_sys = false;
        s.generate_build_id = true;
        let env = BTreeMap::new();
        let built = build_env(&request("x86", &s, &env)).unwrap();
        assert!(!built.contains_key("CLANG_PATH"));
        assert_eq!(
            built["CARGO_JNILIBS_CC_LINK_ARG"],
            "-Wl,-z,max-page-size=16384,-soname,librust.so,--build-id"
        );
    }

    #[test]
    fn target_values_override_caller_env() {
        let s = settings();
        let env = BTreeMap::from([
            ("CLANG_PATH".to_string(), "/usr/bin/clang".to_string()),
            ("OPENSSL_DIR".to_string(), "/ssl".to_string()),
        ]);
        let built = build_env(&request("arm64", &s, &env)).unwrap();
        assert_ne!(built["CLANG_PATH"], "/usr/bin/clang");
        assert_eq!(built["OPENSSL_DIR"], "/ssl");
    }

    #[test]
    fn android_without_ndk_is_an_error() {
        let mut s = settings();
        s.ndk = None;
        let env = BTreeMap::new();
        assert!(matches!(
            build_env(&request("arm64", &s, &env)),
            Err(Error::MissingRequiredConfiguration(_))
        ));
    }

    #[test]
    fn output_dir_follows_target_flag() {
        let mut s = settings();
        s.profile = BuildProfile::Release;
        let env = BTreeMap::new();
        assert_eq!(
            cargo_output_dir(&request("linux-x86-64", &s, &env), HOST),
            PathBuf::from("/work/rust/target/release")
        );
        assert_eq!(
            cargo_output_dir(&request("arm64", &s, &env), HOST),
            PathBuf::from("/work/rust/target/aarch64-linux-android/release")
        );
        assert_eq!(
            cargo_output_dir(&request("linux-x86-64", &s, &env), None),
            PathBuf::from("/work/rust/target/x86_64-unknown-linux-gnu/release")
        );
    }
}
