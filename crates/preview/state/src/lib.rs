//! Preview State
//!
//! Durable storage for environment records and their credentials.
//!
//! Records and credentials are separate artifacts: the record
//! ([`preview_types::Environment`]) is plain JSON and may be read by anyone
//! operating the host, while credentials live in an owner-only directory.
//! Both are written atomically (temporary file, fsync, rename) so a reader
//! never observes a partial write.
//!
//! Single-writer-per-slug is not enforced here; callers hold the
//! per-environment lock around every mutation.

pub mod atomic;
pub mod credentials;
pub mod error;
pub mod file;

pub use credentials::CredentialStore;
pub use error::{Result, StateError};
pub use file::FileStateStore;

use async_trait::async_trait;
use preview_types::{Environment, Slug};

/// Storage for environment records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load a record. Unparseable records surface as [`StateError::Corrupt`].
    async fn get(&self, slug: &Slug) -> Result<Environment>;

    /// Atomically replace the record for `slug`.
    async fn put(&self, slug: &Slug, record: &Environment) -> Result<()>;

    /// Remove the record and its storage location. Returns whether anything
    /// was removed; removing an absent record is not an error.
    async fn delete(&self, slug: &Slug) -> Result<bool>;

    /// Slugs with a storage location, sorted.
    async fn list(&self) -> Result<Vec<Slug>>;

    /// Whether a readable or corrupt record exists.
    async fn exists(&self, slug: &Slug) -> Result<bool> {
        match self.get(slug).await {
            Ok(_) | Err(StateError::Corrupt { .. }) => Ok(true),
            Err(StateError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
