//! Load-average admission policy.

use std::num::NonZeroUsize;

use tracing::warn;

use super::{AdmissionDecision, AdmissionPolicy};

/// Point-in-time host load measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    /// 5-minute system load average.
    pub five_minute: f64,
    /// Processing units available to this process.
    pub processing_units: usize,
}

impl LoadSample {
    /// Load average per processing unit.
    #[must_use]
    pub fn normalized(&self) -> f64 {
        let units = u32::try_from(self.processing_units.max(1)).unwrap_or(u32::MAX);
        self.five_minute / f64::from(units)
    }
}

/// Source of load measurements.
pub trait LoadSource: Send + Sync {
    /// Measure the host load now.
    fn sample(&self) -> LoadSample;
}

/// Reads the operating system's load average.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLoad;

impl LoadSource for SystemLoad {
    fn sample(&self) -> LoadSample {
        let load = sysinfo::System::load_average();
        let processing_units = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        LoadSample {
            five_minute: load.five,
            processing_units,
        }
    }
}

/// Rejects requests while the normalized 5-minute load average is at or
/// above `threshold`.
#[derive(Debug, Clone)]
pub struct LoadAveragePolicy<S = SystemLoad> {
    source: S,
    threshold: f64,
}

impl<S: LoadSource> LoadAveragePolicy<S> {
    /// Create a policy reading from `source`.
    #[must_use]
    pub fn new(source: S, threshold: f64) -> Self {
        Self { source, threshold }
    }
}

impl<S: LoadSource> AdmissionPolicy for LoadAveragePolicy<S> {
    fn evaluate(&self) -> AdmissionDecision {
        let sample = self.source.sample();
        let normalized = sample.normalized();

        if normalized >= self.threshold {
            warn!(
                load5 = format_args!("{:.2}", sample.five_minute),
                processing_units = sample.processing_units,
                normalized = format_args!("{normalized:.2}"),
                threshold = self.threshold,
                "request rejected due to high system load"
            );
            AdmissionDecision::Reject
        } else {
            AdmissionDecision::Admit
        }
    }
}
