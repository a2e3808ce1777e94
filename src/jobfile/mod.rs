//! Engine job-file generation.
//!
//! The [`JobFileBuilder`] trait turns a validated [`ScanJob`] into the file
//! the engine reads its targets and credentials from. The execution path only
//! knows the trait; [`IniJobFileBuilder`] is the format the bundled engine
//! understands.

pub mod ini;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::models::ScanJob;
use crate::Result;

pub use ini::{render_ini, IniJobFileBuilder, JOB_FILE_NAME};

/// Directories a job file refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFileTargets<'a> {
    /// The job's private working directory; the job file is written here.
    pub job_dir: &'a Path,
    /// Where the engine must write its reports.
    pub reports_dir: &'a Path,
}

/// Produces the engine's job description for one scan.
pub trait JobFileBuilder: Send + Sync {
    /// Write the job file for `job` and return its path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::JobFile` if the job cannot be expressed in the
    /// file format, or if the file cannot be written.
    fn build<'a>(
        &'a self,
        job: &'a ScanJob,
        targets: JobFileTargets<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf>> + Send + 'a>>;
}
