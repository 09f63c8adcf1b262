//! Host capacity from the local machine.

use std::path::Path;
use sysinfo::System;

use crate::error::{Result, RuntimeError};
use crate::HostResources;

/// Reads filesystem space via `statvfs` and memory via sysinfo.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }
}

impl HostResources for SystemHost {
    fn free_disk(&self, path: &Path) -> Result<u64> {
        fs2::available_space(path)
            .map_err(|e| RuntimeError::Host(format!("available space of {}: {e}", path.display())))
    }

    fn disk_usage_percent(&self, path: &Path) -> Result<f64> {
        let err = |e: std::io::Error| RuntimeError::Host(format!("disk usage of {}: {e}", path.display()));
        let total = fs2::total_space(path).map_err(err)?;
        let free = fs2::free_space(path).map_err(err)?;
        let available = fs2::available_space(path).map_err(err)?;
        Ok(usage_percent(total, free, available))
    }

    fn free_memory(&self) -> Result<u64> {
        let mut system = System::new();
        system.refresh_memory();
        Ok(system.available_memory())
    }
}

/// Used percentage the way `df` reports it: used / (used + available), so
/// root-reserved blocks count as unavailable.
fn usage_percent(total: u64, free: u64, available: u64) -> f64 {
    let used = total.saturating_sub(free);
    let denominator = used + available;
    if denominator == 0 {
        return 0.0;
    }
    used as f64 * 100.0 / denominator as f64
}
