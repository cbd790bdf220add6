use std::{collections::BTreeMap, path::PathBuf};

use clap::{ArgAction, Parser};

use crate::{
    cargo::{TargetBuildRequest, build_env},
    cli::{init_logging, load_plan, verbosity},
    config::{DEFAULT_DESCRIPTION, Overrides},
    shell::Shell,
};

#[derive(Debug, Parser)]
#[command(
    name = "cargo jnilibs env",
    version,
    about = "Prints the environment `cargo jnilibs` would build a target with"
)]
struct EnvArgs {
    /// Path to the build description. Its directory is the project root
    #[arg(long, value_name = "PATH", default_value = DEFAULT_DESCRIPTION)]
    config: PathBuf,

    /// Target name, as used in the build description (e.g. arm64)
    #[arg(short, long, env = "CARGO_JNILIBS_TARGET")]
    target: String,

    /// API level. Defaults to the build description's level for the target
    #[arg(long, value_name = "LEVEL")]
    api_level: Option<u32>,

    /// Path to the Android NDK
    #[arg(long, value_name = "PATH")]
    ndk: Option<PathBuf>,

    /// Use PowerShell syntax
    #[arg(long, conflicts_with = "json")]
    powershell: bool,

    /// Print output in JSON format
    #[arg(long)]
    json: bool,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, value_name = "WHEN")]
    color: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Posix,
    PowerShell,
    Json,
}

fn render(env: &BTreeMap<String, String>, format: Format) -> anyhow::Result<String> {
    let mut out = String::new();
    match format {
        Format::Json => {
            out.push_str(&serde_json::to_string_pretty(env)?);
            out.push('\n');
        }
        Format::PowerShell => {
            for (k, v) in env {
                out.push_str(&format!("${{env:{k}}}={v:?}\n"));
            }
            out.push_str("\n# To import with PowerShell:\n");
            out.push_str("#     cargo jnilibs env --powershell | Out-String | Invoke-Expression\n");
        }
        Format::Posix => {
            // Raw-triple keys like `CC_aarch64-linux-android` are not valid
            // shell identifiers and are skipped.
            for (k, v) in env
                .iter()
                .filter(|(k, _)| k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
            {
                out.push_str(&format!("export {k}={v:?}\n"));
            }
            out.push_str("\n# To import with bash/zsh/etc:\n");
            out.push_str("#     source <(cargo jnilibs env)\n");
        }
    }
    Ok(out)
}

pub fn run(args: Vec<String>) -> anyhow::Result<()> {
    let args = EnvArgs::try_parse_from(
        std::iter::once("cargo-jnilibs-env".to_string()).chain(args),
    )
    .unwrap_or_else(|e| e.exit());

    let mut shell = Shell::new();
    shell.set_verbosity(verbosity(args.verbose, args.quiet));
    if let Err(e) = shell.set_color_choice(args.color.as_deref()) {
        shell.error(e)?;
        std::process::exit(2);
    }
    init_logging(shell.verbosity());

    let overrides = Overrides {
        targets: vec![args.target.clone()],
        ndk: args.ndk.clone(),
        ..Default::default()
    };
    let plan = match load_plan(&args.config, &overrides) {
        Ok(plan) => plan,
        Err(e) => {
            shell.error(e)?;
            std::process::exit(1);
        }
    };

    let Some(target) = plan.targets.first() else {
        shell.error(format!("no target named `{}`", args.target))?;
        std::process::exit(1);
    };

    let request = TargetBuildRequest {
        platform: target.platform,
        api_level: args.api_level.unwrap_or(target.api_level),
        env_overrides: &target.env,
        settings: &plan.settings,
    };
    let env = match build_env(&request) {
        Ok(env) => env
            .into_iter()
            .map(|(k, v)| (k, v.to_string_lossy().into_owned()))
            .collect::<BTreeMap<_, _>>(),
        Err(e) => {
            shell.error(e)?;
            std::process::exit(1);
        }
    };

    let format = if args.json {
        Format::Json
    } else if args.powershell {
        Format::PowerShell
    } else {
        Format::Posix
    };
    print!("{}", render(&env, format)?);

    Ok(())
}
