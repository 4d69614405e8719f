//! Available-memory probing for load admission control.

use std::sync::Arc;

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

const BYTES_PER_GB: f64 = 1_073_741_824.0;

/// Source of the "available RAM" figure used by admission control.
pub trait MemoryProbe: Send + Sync {
    /// Currently available memory in GB.
    fn available_gb(&self) -> f64;

    /// Total memory in GB, if known.
    fn total_gb(&self) -> Option<f64> {
        None
    }
}

/// Reads system memory through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl SystemMemory {
    fn query() -> (u64, u64) {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();
        (sys.total_memory(), sys.available_memory())
    }
}

impl MemoryProbe for SystemMemory {
    #[allow(clippy::cast_precision_loss)]
    fn available_gb(&self) -> f64 {
        let (_, available) = Self::query();
        available as f64 / BYTES_PER_GB
    }

    #[allow(clippy::cast_precision_loss)]
    fn total_gb(&self) -> Option<f64> {
        let (total, _) = Self::query();
        (total > 0).then(|| total as f64 / BYTES_PER_GB)
    }
}

/// Query a probe off the async runtime; `sysinfo` reads are blocking syscalls.
pub async fn available_gb(probe: &Arc<dyn MemoryProbe>) -> f64 {
    let probe = Arc::clone(probe);
    tokio::task::spawn_blocking(move || probe.available_gb())
        .await
        .unwrap_or(0.0)
}
