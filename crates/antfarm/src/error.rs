//! Error types for the antfarm.
//!
//! Setup-phase errors (`ConfigValidation`, `ResourceAcquisition`,
//! `ProcessStartup`, `Topology`, `SyncTimeout`) are fatal to the farm being
//! built. `RemoteCall` is returned to whoever made the call; the background
//! jobs log it and retry on their own schedule.

use std::time::Duration;

/// Result type used throughout this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or running an antfarm
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration combines fields that cannot be combined, or lacks
    /// something it needs. Raised before any process starts.
    #[error("invalid ant config: {0}")]
    ConfigValidation(String),

    /// Ports, directories or the external IP could not be obtained.
    #[error("resource acquisition failed: {0}")]
    ResourceAcquisition(String),

    /// The node binary could not be launched or its API never came up.
    #[error("failed to start ant: {0}")]
    ProcessStartup(String),

    /// A node API call failed after startup.
    #[error("remote call to {endpoint} failed: {message}")]
    RemoteCall { endpoint: String, message: String },

    /// A topology operation was refused or a connect failed.
    #[error("topology error: {0}")]
    Topology(String),

    /// The fleet did not converge on a single consensus group in time.
    #[error("ants did not sync within {0:?}")]
    SyncTimeout(Duration),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// A job was started without the fleet-level facts it depends on.
    #[error("job {job} cannot start: {reason}")]
    MissingPrerequisite { job: String, reason: String },

    /// A renter upload or download failed, timed out, or came back
    /// different from what was sent.
    #[error("file transfer failed: {0}")]
    Transfer(String),

    #[error("task group has been stopped")]
    TaskGroupStopped,

    /// Wraps an error with the ant (index or name) it happened on.
    #[error("ant {ant}: {source}")]
    Ant {
        ant: String,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn remote(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Error::RemoteCall {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Attach the identity of the ant this error came from.
    pub(crate) fn for_ant(self, ant: impl Into<String>) -> Self {
        Error::Ant {
            ant: ant.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any per-ant wrapping.
    pub fn root(&self) -> &Error {
        match self {
            Error::Ant { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_ant_context() {
        let err = Error::Topology("need two ants".into()).for_ant("3");
        assert!(err.to_string().starts_with("ant 3:"));
        assert!(matches!(err.root(), Error::Topology(_)));
    }

    #[test]
    fn test_remote_call_display() {
        let err = Error::remote("/consensus", "connection refused");
        assert_eq!(
            err.to_string(),
            "remote call to /consensus failed: connection refused"
        );
    }
}
