use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("target `{name}` is not recognized (recognized targets: {})", known.join(", "))]
    UnknownPlatform { name: String, known: Vec<String> },

    #[error("missing required configuration: {0}")]
    MissingRequiredConfiguration(String),

    #[error("conflicting configuration: {0}")]
    ConflictingConfiguration(String),

    #[error(
        "illegal value `{value}` for property `{camel}` / `{snake}`, must be 0/1/true/false if set"
    )]
    InvalidFlag {
        camel: String,
        snake: String,
        value: String,
    },

    #[error("could not detect the host target triple using `{0}`")]
    HostTripleDetectionFailed(String),

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "{platform}: `{program}` exited with {}",
        code.map(|c| format!("code {c}")).unwrap_or_else(|| "no exit code".into())
    )]
    SubprocessFailure {
        platform: String,
        program: String,
        code: Option<i32>,
    },

    #[error(
        "{platform}: no artifacts matching [{}] found in {}",
        patterns.join(", "),
        dir.display()
    )]
    ArtifactStagingFailure {
        platform: String,
        dir: PathBuf,
        patterns: Vec<String>,
    },

    #[error("invalid include pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build failed for {}", describe_failures(.0))]
    PlatformsFailed(Vec<(String, Error)>),
}

fn describe_failures(failures: &[(String, Error)]) -> String {
    let mut out = format!(
        "{} target{}:",
        failures.len(),
        if failures.len() == 1 { "" } else { "s" }
    );
    for (platform, error) in failures {
        let cause = error.to_string();
        // Most per-platform errors already start with the platform name.
        if cause.starts_with(&format!("{platform}: ")) {
            out.push_str(&format!("\n    {cause}"));
        } else {
            out.push_str(&format!("\n    {platform}: {cause}"));
        }
    }
    out
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Configuration errors are raised before any work is started.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownPlatform { .. }
                | Error::MissingRequiredConfiguration(_)
                | Error::ConflictingConfiguration(_)
                | Error::InvalidFlag { .. }
                | Error::Manifest { .. }
                | Error::Pattern { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_platform_lists_known_targets() {
        let err = Error::UnknownPlatform {
            name: "mips".into(),
            known: vec!["arm".into(), "arm64".into()],
        };
        assert_eq!(
            err.to_string(),
            "target `mips` is not recognized (recognized targets: arm, arm64)"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn subprocess_failure_names_platform_and_code() {
        let err = Error::SubprocessFailure {
            platform: "arm64".into(),
            program: "cargo".into(),
            code: Some(101),
        };
        assert_eq!(err.to_string(), "arm64: `cargo` exited with code 101");
        assert!(!err.is_configuration());
    }

    #[test]
    fn aggregate_failure_keeps_every_cause() {
        let err = Error::PlatformsFailed(vec![
            (
                "arm64".into(),
                Error::SubprocessFailure {
                    platform: "arm64".into(),
                    program: "cargo".into(),
                    code: Some(101),
                },
            ),
            (
                "x86".into(),
                Error::Spawn {
                    program: "cargo".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                },
            ),
        ]);
        let message = err.to_string();
        assert!(message.starts_with("build failed for 2 targets:\n"), "{message}");
        assert!(message.contains("\n    arm64: `cargo` exited with code 101"), "{message}");
        assert!(!message.contains("arm64: arm64"), "{message}");
        assert!(message.contains("\n    x86: failed to start `cargo`"), "{message}");
    }
}
