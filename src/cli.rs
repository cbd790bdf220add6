use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use clap::{ArgAction, Parser};
use termcolor::Color;

use crate::{
    HostPlatform,
    config::{BuildDescription, BuildPlan, ConfigLayers, DEFAULT_DESCRIPTION, Overrides},
    error::Error,
    meta::{self, PlatformEntry},
    orchestrator::{self, BuildState},
    shell::{Shell, Verbosity},
};

pub mod env;

#[derive(Debug, Parser)]
#[command(
    name = "cargo jnilibs",
    version,
    about = "Builds a Rust library for every configured Android and desktop target \
             and stages the results for a JVM project"
)]
struct BuildArgs {
    /// Path to the build description. Its directory is the project root
    #[arg(long, value_name = "PATH", default_value = DEFAULT_DESCRIPTION)]
    config: PathBuf,

    /// Target to build (repeatable). Replaces the targets in the build description
    #[arg(short, long, value_name = "NAME", value_delimiter = ',')]
    target: Vec<String>,

    /// Build with the given cargo profile
    #[arg(long, value_name = "NAME")]
    profile: Option<String>,

    /// Build with the release profile
    #[arg(short, long)]
    release: bool,

    /// Space or comma separated list of features to activate
    #[arg(short = 'F', long)]
    features: Vec<String>,

    /// Activate all available features
    #[arg(long)]
    all_features: bool,

    /// Do not activate the `default` feature
    #[arg(long)]
    no_default_features: bool,

    /// Path to the Android NDK
    #[arg(long, value_name = "PATH")]
    ndk: Option<PathBuf>,

    /// Build all targets at the same time
    #[arg(long, conflicts_with = "no_parallel")]
    parallel: bool,

    /// Build targets one after another
    #[arg(long)]
    no_parallel: bool,

    /// Use verbose output (-vv very verbose)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Do not print status messages
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, value_name = "WHEN")]
    color: Option<String>,

    /// Print the recognized targets and exit
    #[arg(long)]
    list_targets: bool,

    /// Extra arguments passed to every `cargo build`
    #[arg(last = true)]
    cargo_args: Vec<String>,
}

impl BuildArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            targets: self.target.clone(),
            profile: self.profile.clone(),
            release: self.release,
            all_features: self.all_features,
            no_default_features: self.no_default_features,
            features: self.features.clone(),
            ndk: self.ndk.clone(),
            parallel: match (self.parallel, self.no_parallel) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            extra_args: self.cargo_args.clone(),
        }
    }
}

pub(crate) fn verbosity(verbose: u8, quiet: bool) -> Verbosity {
    match (quiet, verbose) {
        (true, _) => Verbosity::Quiet,
        (_, 0) => Verbosity::Normal,
        (_, 1) => Verbosity::Verbose,
        _ => Verbosity::VeryVerbose,
    }
}

pub(crate) fn init_logging(verbosity: Verbosity) {
    // A logger may already be installed when the build and env commands run
    // in one process; the first one wins.
    if let Err(e) = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(verbosity.log_filter()),
    )
    .format_timestamp(None)
    .try_init()
    {
        log::debug!("Keeping the existing logger: {e}");
    }
}

/// Reads the build description and local configuration, then validates them
/// into a plan. The project root is the description's directory.
pub(crate) fn load_plan(config: &Path, overrides: &Overrides) -> crate::Result<BuildPlan> {
    let config = dunce::canonicalize(config).map_err(|e| Error::io(config, e))?;
    let project_root = config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    log::debug!("Project root: {}", project_root.display());

    let desc = BuildDescription::load(&config)?;
    let layers = ConfigLayers::load(&project_root)?;
    BuildPlan::resolve(&desc, &project_root, &layers, overrides, HostPlatform::current())
}

fn report_state(
    shell: &mut Shell,
    platform: &PlatformEntry,
    state: BuildState<'_>,
) -> anyhow::Result<()> {
    match state {
        BuildState::Pending => shell.verbose(|shell| {
            shell.status_with_color(
                "Queued",
                format!("{platform} ({})", platform.triple),
                Color::Cyan,
            )
        }),
        BuildState::Running { args } => {
            shell.status("Building", format!("{platform} ({})", platform.triple))?;
            shell.verbose(|shell| {
                shell.status_with_color("Running", format!("`{}`", args.join(" ")), Color::Cyan)
            })
        }
        BuildState::Succeeded(result) => shell.status(
            "Staged",
            format!(
                "{platform} ({} file{}) -> {}",
                result.artifacts.len(),
                if result.artifacts.len() == 1 { "" } else { "s" },
                result.staged_dir.display()
            ),
        ),
        BuildState::Failed(e) => match e {
            // These already name the platform.
            Error::SubprocessFailure { .. } => {
                shell.error(e)?;
                shell.note(format!(
                    "If the build failed due to a missing target, you can run this command:\n\
                     \n    rustup target add {}",
                    platform.triple
                ))
            }
            Error::ArtifactStagingFailure { .. } => {
                shell.error(e)?;
                shell.note(
                    "Did you set the crate-type in Cargo.toml to include 'cdylib'?\n\
                     For more info, see \
                     <https://doc.rust-lang.org/cargo/reference/cargo-targets.html#library>.",
                )
            }
            _ => shell.error(format!("{platform}: {e}")),
        },
    }
}

pub fn run(args: Vec<String>) -> anyhow::Result<()> {
    let args = BuildArgs::try_parse_from(
        std::iter::once("cargo-jnilibs".to_string()).chain(args),
    )
    .unwrap_or_else(|e| e.exit());

    let mut shell = Shell::new();
    shell.set_verbosity(verbosity(args.verbose, args.quiet));
    if let Err(e) = shell.set_color_choice(args.color.as_deref()) {
        shell.error(e)?;
        std::process::exit(2);
    }
    init_logging(shell.verbosity());
    log::trace!("Args: {args:?}");

    if args.list_targets {
        for entry in meta::platforms() {
            println!("{:<20} {:<28} {}", entry.name, entry.triple, entry.folder);
        }
        return Ok(());
    }

    let plan = match load_plan(&args.config, &args.overrides()) {
        Ok(plan) => plan,
        Err(e) => {
            shell.error(&e)?;
            if e.is_configuration() {
                shell.note(format!("nothing was built; check {}", args.config.display()))?;
            }
            std::process::exit(1);
        }
    };

    if let Some(ndk) = &plan.settings.ndk {
        shell.verbose(|shell| {
            shell.status_with_color(
                "Using",
                format!("NDK {} at {}", ndk.version, ndk.path.display()),
                Color::Cyan,
            )
        })?;
    }

    let shell = Mutex::new(shell);
    let observer = |platform: &PlatformEntry, state: BuildState<'_>| {
        let mut shell = shell.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = report_state(&mut shell, platform, state) {
            log::warn!("Failed to write status: {e}");
        }
    };

    let outcome = orchestrator::build_all(&plan, &observer);
    let mut shell = shell.into_inner().unwrap_or_else(PoisonError::into_inner);

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            shell.error(e)?;
            std::process::exit(1);
        }
    };

    match report.into_result() {
        Ok(built) => {
            shell.status(
                "Finished",
                format!(
                    "{} target{} into {}",
                    built.len(),
                    if built.len() == 1 { "" } else { "s" },
                    plan.settings.output_dir.display()
                ),
            )?;
            Ok(())
        }
        Err(e) => {
            shell.error(e)?;
            std::process::exit(1);
        }
    }
}
