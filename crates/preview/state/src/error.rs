//! State store errors.

use preview_types::PreviewError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no state record for {0}")]
    NotFound(String),

    #[error("corrupt state record for {slug}: {reason}")]
    Corrupt { slug: String, reason: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StateError> for PreviewError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(slug) => PreviewError::NotFound(slug),
            other => PreviewError::State(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
