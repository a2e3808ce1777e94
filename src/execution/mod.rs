//! Scan execution: launch, output capture, live tail, result collection.
//!
//! One execution runs as a single primary task ([`orchestrator`]) plus one
//! helper task, the live log [`streamer`]. The engine's diagnostic stream is
//! split by the [`multiplexer`] inside the primary task; once the engine is
//! gone and the streamer has drained, the [`collector`] streams the reports.

pub mod codec;
pub mod collector;
pub mod multiplexer;
pub mod orchestrator;
pub mod outbound;
pub mod streamer;
pub mod supervisor;

use std::path::PathBuf;

use crate::config::GlobalConfig;
use crate::jobfile::JOB_FILE_NAME;

pub use orchestrator::{ExecutionPhase, PreparedExecution, ScanExecutor};
pub use outbound::{Outbound, ResponseStream};

/// File in the job directory mirroring the engine's diagnostic output.
pub const ENGINE_LOG_FILE: &str = "engine_stderr.log";

/// Filesystem locations used by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// Private working directory of the job.
    pub job_dir: PathBuf,
    /// Generated engine job file.
    pub job_file: PathBuf,
    /// Directory the engine writes reports into.
    pub reports_dir: PathBuf,
    /// Mirror of the engine's diagnostic output.
    pub engine_log: PathBuf,
}

impl JobPaths {
    /// Default locations for `job_id` under the configured jobs root.
    #[must_use]
    pub fn for_job(config: &GlobalConfig, job_id: &str) -> Self {
        let job_dir = config.job_dir(job_id);
        Self {
            job_file: job_dir.join(JOB_FILE_NAME),
            reports_dir: config.reports_dir(job_id),
            engine_log: job_dir.join(ENGINE_LOG_FILE),
            job_dir,
        }
    }

    /// Replace the job file location with the one the builder reported.
    #[must_use]
    pub fn with_job_file(mut self, job_file: PathBuf) -> Self {
        self.job_file = job_file;
        self
    }
}
