//! Collaborator errors.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    CommandFailed {
        command: String,
        status: String,
        /// Captured stderr/stdout for diagnostics.
        output: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("unexpected output: {0}")]
    Parse(String),

    #[error("DNS provider error: {0}")]
    Dns(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("host query failed: {0}")]
    Host(String),
}

impl RuntimeError {
    /// Captured runtime output, when there is any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            RuntimeError::CommandFailed { output, .. } if !output.is_empty() => Some(output),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
