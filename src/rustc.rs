use std::process::Command;

use crate::error::Error;

const HOST_PREFIX: &str = "host: ";

/// Asks `rustc -vV` for the host's default target triple.
///
/// Failure is never fatal: the triple only decides whether `--target` can be
/// left off so desktop builds share cargo's cache with plain `cargo build`.
pub fn detect_host_triple(rustc: &str) -> Option<String> {
    let output = match Command::new(rustc).args(["--version", "--verbose"]).output() {
        Ok(v) => v,
        Err(e) => {
            log::warn!("{}: {e}", Error::HostTripleDetectionFailed(rustc.into()));
            return None;
        }
    };

    if !output.status.success() {
        log::warn!(
            "Failed to get default target triple from {rustc} (exit code: {})",
            output.status.code().unwrap_or(-1)
        );
        log::debug!("{}", String::from_utf8_lossy(&output.stderr).trim());
        return None;
    }

    let triple = parse_host_triple(&String::from_utf8_lossy(&output.stdout));
    match &triple {
        Some(t) => log::info!("Default rust target triple: {t}"),
        None => log::warn!("Failed to parse `{rustc} -vV` output, no `host:` line found"),
    }
    triple
}

pub(crate) fn parse_host_triple(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(HOST_PREFIX))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
