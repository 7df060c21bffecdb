//! Error types for the GnuPG backend.
//!
//! Only infrastructure failures are errors. A keyring that does not exist, an
//! identity that does not map, or a signature that does not verify are
//! reported as values by the operations themselves.

use std::path::PathBuf;

use crate::command::ExitOutcome;

/// Backend errors.
#[derive(Debug, thiserror::Error)]
pub enum GpgError {
    /// The private trust-store directory could not be created.
    #[error("cannot create temporary directory '{template}': {source}")]
    TrustStore {
        template: String,
        #[source]
        source: std::io::Error,
    },

    /// The trust-store directory could not be removed on release.
    #[error("cannot remove temporary directory '{}': {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required environment variable was unusable.
    #[error("cannot set environment variable {name} to '{value}'")]
    Environment { name: String, value: String },

    /// The gpg executable could not be started.
    #[error("unable to execute {program} ({step}): {source}")]
    Spawn {
        program: String,
        step: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A pipe end requested from the child was not available.
    #[error("{step}: error creating a pipe for {stream}")]
    Pipe {
        step: &'static str,
        stream: &'static str,
    },

    /// Reading from or writing to the child failed mid-stream.
    #[error("{step}: {message}: {source}")]
    Io {
        step: &'static str,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// The signature blob ended before the announced length.
    #[error("{step}: error reading signature: expected {expected} bytes, got {copied}")]
    ShortSignature {
        step: &'static str,
        expected: u64,
        copied: u64,
    },

    /// A listing subprocess exited abnormally.
    #[error("{step}: {program} {outcome}")]
    AbnormalExit {
        step: &'static str,
        program: String,
        outcome: ExitOutcome,
    },

    /// `gpg --version` output could not be understood.
    #[error("cannot determine {program} protocol version: {message}")]
    Discovery { program: String, message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl GpgError {
    /// Exit code for a host CLI.
    ///
    /// Follows the debsig-verify convention of reserving `2` for internal
    /// failures; configuration problems map to `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::Discovery { .. } => 1,

            Self::TrustStore { .. }
            | Self::Cleanup { .. }
            | Self::Environment { .. }
            | Self::Spawn { .. }
            | Self::Pipe { .. }
            | Self::Io { .. }
            | Self::ShortSignature { .. }
            | Self::AbnormalExit { .. } => 2,
        }
    }

    pub(crate) fn io(
        step: &'static str,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            step,
            message: message.into(),
            source,
        }
    }
}

/// Result type for backend operations.
pub type GpgResult<T> = Result<T, GpgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_step_and_program() {
        let err = GpgError::AbnormalExit {
            step: "list-keys",
            program: "gpg".to_string(),
            outcome: ExitOutcome::Failure(2),
        };
        assert_eq!(err.to_string(), "list-keys: gpg returned error exit status 2");

        let err = GpgError::Spawn {
            program: "/opt/gpg".to_string(),
            step: "verify",
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("unable to execute /opt/gpg (verify)"));
    }

    #[test]
    fn test_exit_codes() {
        let config = GpgError::Config {
            message: "bad".into(),
        };
        assert_eq!(config.exit_code(), 1);

        let short = GpgError::ShortSignature {
            step: "list-packets",
            expected: 10,
            copied: 3,
        };
        assert_eq!(short.exit_code(), 2);
    }
}
