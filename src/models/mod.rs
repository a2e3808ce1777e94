//! Domain model module declarations.

pub mod job;
pub mod output;

pub use job::{Device, DeviceCredentials, JumpHost, ScanJob};
pub use output::{ExitOutcome, LogChunk, ReportArtifact};

/// Treat an empty or whitespace-only protobuf string as absent.
pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
