//! # Design
//!
//! - Runner failures that happen before the tool reports an exit status.
//! - Each variant knows whether it is worth retrying.

use std::io;
use std::path::PathBuf;

use q4d_core::TransferOutcome;
use thiserror::Error;

/// Result alias for subprocess runner operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors raised while preparing or supervising the transfer tool.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The destination directory could not be created.
    #[error("failed to prepare destination directory")]
    Destination {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The tool could not be started.
    #[error("failed to spawn transfer tool")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A stdio pipe was not available after spawn.
    #[error("transfer tool pipe unavailable")]
    Pipe {
        /// Stream name.
        stream: &'static str,
    },
    /// Waiting on the child process failed.
    #[error("failed to wait for transfer tool")]
    Wait {
        /// Underlying IO error.
        source: io::Error,
    },
}

impl TransferError {
    /// Classify the error as a transfer outcome.
    #[must_use]
    pub fn into_outcome(self) -> TransferOutcome {
        match self {
            Self::Destination { path, source } => TransferOutcome::PermanentFailure(format!(
                "destination {} is not writable: {source}",
                path.display()
            )),
            Self::Spawn { program, source } if source.kind() == io::ErrorKind::NotFound => {
                TransferOutcome::PermanentFailure(format!("transfer tool `{program}` not found"))
            }
            Self::Spawn { program, source } => {
                TransferOutcome::TransientFailure(format!("could not start `{program}`: {source}"))
            }
            Self::Pipe { stream } => {
                TransferOutcome::TransientFailure(format!("transfer tool {stream} unavailable"))
            }
            Self::Wait { source } => {
                TransferOutcome::TransientFailure(format!("lost track of transfer tool: {source}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_permanent() {
        let err = TransferError::Spawn {
            program: "lftp".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(matches!(
            err.into_outcome(),
            TransferOutcome::PermanentFailure(reason) if reason.contains("not found")
        ));
    }

    #[test]
    fn other_spawn_errors_are_transient() {
        let err = TransferError::Spawn {
            program: "lftp".into(),
            source: io::Error::other("resource temporarily unavailable"),
        };
        assert!(matches!(
            err.into_outcome(),
            TransferOutcome::TransientFailure(_)
        ));
    }

    #[test]
    fn destination_errors_are_permanent() {
        let err = TransferError::Destination {
            path: PathBuf::from("/readonly/tv"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(matches!(
            err.into_outcome(),
            TransferOutcome::PermanentFailure(_)
        ));
    }
}
