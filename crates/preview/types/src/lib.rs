//! Preview Types
//!
//! Shared domain types for the preview environment lifecycle manager.
//!
//! ## Contents
//!
//! - [`Slug`]: validated environment identifier (`^[a-z0-9-]{1,63}$`)
//! - [`Environment`]: the persisted, secret-free record of one preview instance
//! - [`Credential`]: per-environment secret material, never part of the record
//! - [`DeployMode`] and [`ImageRef`]: deploy inputs
//! - [`PreviewError`]: the error taxonomy surfaced to triggers

pub mod credential;
pub mod environment;
pub mod error;
pub mod mode;
pub mod slug;

pub use credential::{Credential, CredentialParseError};
pub use environment::{Environment, ImageRef};
pub use error::{PreviewError, ResourceKind, Result};
pub use mode::{DeployMode, ParseModeError};
pub use slug::{Slug, SlugError, MAX_SLUG_LEN};
