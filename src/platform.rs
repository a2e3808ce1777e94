//! Startup platform telemetry.

use std::path::Path;

use sysinfo::{Disks, System};
use tracing::info;

use crate::identity::AgentIdentity;

/// Log host details once at startup.
pub fn log_platform_details(identity: &AgentIdentity, work_dir: &Path) {
    let mut sys = System::new();
    sys.refresh_memory();

    let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %identity,
        os = System::name().unwrap_or_default(),
        os_version = System::os_version().unwrap_or_default(),
        kernel = System::kernel_version().unwrap_or_default(),
        cores,
        total_memory_mb = sys.total_memory() / 1_048_576,
        used_memory_mb = sys.used_memory() / 1_048_576,
        "platform details"
    );

    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| work_dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());
    if let Some(disk) = disk {
        let total = disk.total_space();
        let available = disk.available_space();
        let used_percent = if total == 0 {
            0
        } else {
            total.saturating_sub(available) * 100 / total
        };
        info!(
            mount = %disk.mount_point().display(),
            total_gb = total / 1_073_741_824,
            available_gb = available / 1_073_741_824,
            used_percent,
            "work directory disk"
        );
    }
}
