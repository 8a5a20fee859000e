use std::time::Duration;

use thiserror::Error;

/// Error surface for the daemon control plane.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Syncthing API error: {0}")]
    Syncthing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to launch {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Syncthing did not start correctly: API unreachable after {timeout:?}")]
    DaemonDidNotStart { timeout: Duration },

    #[error("Syncthing startup aborted: the process exited or was stopped")]
    StartupAborted,

    #[error("Syncthing is not running")]
    NotRunning,

    #[error("Operation not allowed while {0}")]
    InvalidState(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ManagerError {
    /// Errors a polling loop is expected to recover from by backing off.
    pub fn is_transient(&self) -> bool {
        match self {
            ManagerError::Http(err) => {
                err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
            }
            ManagerError::Io(_) | ManagerError::Cancelled => true,
            _ => false,
        }
    }
}

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;
