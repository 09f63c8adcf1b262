//! Preview Health
//!
//! Bounded readiness polling between stack startup and declaring an
//! environment live.
//!
//! The gate is fail-closed: only an explicit `healthy` report from the
//! runtime counts. Probe errors, missing containers and services without a
//! healthcheck all consume an attempt. What happens on exhaustion (rollback)
//! is the caller's decision; see `preview-control`.

pub mod gate;
pub mod retry;

pub use gate::{HealthGate, HealthOutcome};
pub use retry::{Exhausted, RetryPolicy};
