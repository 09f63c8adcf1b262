//! Lock errors.

use preview_types::PreviewError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {name}")]
    Timeout { name: String, waited: Duration },

    #[error("invalid lock name: {0:?}")]
    InvalidName(String),

    #[error("lock {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<LockError> for PreviewError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { name, waited } => PreviewError::LockTimeout { lock: name, waited },
            other => PreviewError::State(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
