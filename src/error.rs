//! Error types module.
//!
//! This module defines the error types used throughout the dnschanger application.
//! It uses `thiserror` for structured error handling and provides
//! a custom `Result` type alias for convenience.

use crate::resolver::ConfigState;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A specialized `Result` type for dnschanger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// File operation performed on the resolver or backup file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStep {
    /// Copying the resolver file to the backup path
    Backup,
    /// Writing the new nameserver list
    Write,
    /// Reading the written file back for comparison
    Verify,
    /// Copying the backup over the resolver file
    Restore,
}

impl fmt::Display for FileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backup => write!(f, "backup"),
            Self::Write => write!(f, "write"),
            Self::Verify => write!(f, "verify"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// Privileged step of handing the resolver back to the system service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    /// Removing the custom resolver file
    Unlink,
    /// Linking the resolver file to the stub resolver
    Relink,
    /// Restarting the resolver service
    ServiceRestart,
}

impl fmt::Display for ReleaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlink => write!(f, "UnlinkFailed"),
            Self::Relink => write!(f, "RelinkFailed"),
            Self::ServiceRestart => write!(f, "ServiceRestartFailed"),
        }
    }
}

/// Main error enum for dnschanger.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error outside resolver file handling (terminal, exports, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (provider catalogs, JSON output)
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A resolver or backup file operation failed.
    #[error("{step} of {} failed: {source}", path.display())]
    ResolverFile {
        /// Which file operation failed
        step: FileStep,
        /// The file being operated on
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An elevated operation was denied or no elevation mechanism is available.
    #[error("{step}: privilege denied: {reason}")]
    Privilege {
        /// Step of the release sequence that failed
        step: ReleaseStep,
        /// Diagnostic from the elevation mechanism
        reason: String,
    },

    /// An external command is missing or failed for reasons other than privilege.
    #[error("{step}: {reason}")]
    Process {
        /// Step of the release sequence that failed
        step: ReleaseStep,
        /// Diagnostic from the command
        reason: String,
    },

    /// Operation invoked in a state that does not allow it.
    #[error("cannot {operation} while resolver configuration is {state}")]
    State {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: ConfigState,
    },

    /// Configuration error (invalid catalog, unknown provider)
    #[error("Config error: {0}")]
    Config(String),

    /// Parse error (invalid input format, malformed data)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Create a new configuration error with a message.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new parse error with a message.
    #[must_use]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Wrap an I/O error from a resolver file operation.
    pub fn file(step: FileStep, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ResolverFile {
            step,
            path: path.into(),
            source,
        }
    }

    /// The release step a privilege or process error belongs to.
    #[must_use]
    pub fn release_step(&self) -> Option<ReleaseStep> {
        match self {
            Self::Privilege { step, .. } | Self::Process { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Io(e) | Self::ResolverFile { source: e, .. } => {
                e.kind() == std::io::ErrorKind::PermissionDenied
            }
            Self::Privilege { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_steps_render_with_failure_names() {
        let err = Error::Process {
            step: ReleaseStep::ServiceRestart,
            reason: "exit status 5".into(),
        };
        assert_eq!(err.to_string(), "ServiceRestartFailed: exit status 5");
        assert_eq!(err.release_step(), Some(ReleaseStep::ServiceRestart));
        assert!(!err.is_permission_denied());
    }

    #[test]
    fn resolver_file_error_names_step_and_path() {
        let err = Error::file(
            FileStep::Write,
            "/etc/resolv.conf",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().starts_with("write of /etc/resolv.conf failed"));
        assert!(err.is_permission_denied());
        assert_eq!(err.release_step(), None);
    }

    #[test]
    fn state_error_message() {
        let err = Error::State {
            operation: "apply",
            state: ConfigState::Applied,
        };
        assert_eq!(
            err.to_string(),
            "cannot apply while resolver configuration is applied"
        );
    }
}
