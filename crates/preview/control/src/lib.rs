//! Preview Control
//!
//! Lifecycle management for ephemeral per-branch preview environments on a
//! single capacity-constrained host.
//!
//! ## Flow
//!
//! ```text
//! deploy ─▶ validate ─▶ admission (fresh only, global lock)
//!                          │
//!                          ▼
//!            environment lock ─▶ provisioner ─▶ health gate ─▶ record ─▶ live
//!                                     │              │
//!                                     └── failure ───┴──▶ rollback (discard)
//!
//! sweep  ─▶ for each environment: try lock ─▶ TTL check ─▶ teardown
//!        ─▶ global lock ─▶ disk usage > threshold ─▶ prune images
//! ```
//!
//! [`PreviewController`] is the entry point; the components it wires together
//! are public so they can be driven individually.

pub mod admission;
pub mod config;
pub mod controller;
mod error;
pub mod provisioner;
pub mod reaper;
pub mod render;

pub use admission::{AdmissionController, AdmissionDecision, DenyReason, QuotaSnapshot};
pub use config::{
    AdmissionConfig, DataLayout, DnsConfig, HealthConfig, LockConfig, LoggingConfig,
    PreviewConfig, ReaperConfig, StackConfig, DEFAULT_CONFIG_PATH,
};
pub use controller::{
    Collaborators, DeployRequest, EnvironmentStatus, EnvironmentSummary, PreviewController,
};
pub use provisioner::{PreparedStack, ProvisionRequest, Provisioned, Provisioner, TeardownReport};
pub use reaper::{Reaper, SweepReport};
pub use render::{Bindings, RenderError, TemplateRenderer, TemplateSource, TemplateVar};

pub use preview_types::{DeployMode, PreviewError, Result, Slug};
