//! Error taxonomy surfaced to deploy/destroy/sweep triggers.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::slug::SlugError;

/// Host resource checked during admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Disk,
    Memory,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Disk => write!(f, "disk"),
            ResourceKind::Memory => write!(f, "memory"),
        }
    }
}

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum PreviewError {
    /// Rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("quota exceeded: {running} of {max} environments running")]
    QuotaExceeded { running: usize, max: usize },

    #[error("insufficient {resource}: {available} bytes free, {required} required")]
    ResourceInsufficient {
        resource: ResourceKind,
        available: u64,
        required: u64,
    },

    #[error("timed out after {waited:?} waiting for lock {lock}")]
    LockTimeout { lock: String, waited: Duration },

    #[error("provisioning failed: {reason}")]
    Provisioning {
        reason: String,
        /// Output captured from the container runtime.
        diagnostics: Option<String>,
    },

    /// Rollback has already been performed when this is returned.
    #[error("environment {slug} not healthy after {attempts} attempts; rolled back")]
    HealthCheckTimeout { slug: String, attempts: u32 },

    /// The environment was unregistered but its stack could not be stopped;
    /// a later destroy removes what is left.
    #[error("environment {slug} failed ({cause}) and its stack could not be stopped: {reason}")]
    RollbackIncomplete {
        slug: String,
        cause: String,
        reason: String,
    },

    #[error("environment not found: {0}")]
    NotFound(String),

    #[error("state store error: {0}")]
    State(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PreviewError {
    /// Process exit code for CLI/CI triggers.
    pub fn exit_code(&self) -> i32 {
        match self {
            PreviewError::Validation(_) => 2,
            PreviewError::QuotaExceeded { .. } => 3,
            PreviewError::ResourceInsufficient { .. } => 4,
            PreviewError::LockTimeout { .. } => 5,
            PreviewError::Provisioning { .. } => 6,
            PreviewError::HealthCheckTimeout { .. } => 7,
            PreviewError::RollbackIncomplete { .. }
            | PreviewError::NotFound(_)
            | PreviewError::State(_)
            | PreviewError::Runtime(_)
            | PreviewError::Config(_) => 1,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PreviewError::LockTimeout { .. }
                | PreviewError::QuotaExceeded { .. }
                | PreviewError::ResourceInsufficient { .. }
        )
    }
}

impl From<SlugError> for PreviewError {
    fn from(err: SlugError) -> Self {
        PreviewError::Validation(err.to_string())
    }
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, PreviewError>;
