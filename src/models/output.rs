//! Values produced while a scan job runs.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use bytes::Bytes;

/// One newline-delimited unit of engine diagnostic output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    /// Position of this unit in the engine's output, starting at zero.
    pub sequence: u64,
    /// Raw bytes, including the trailing newline when the engine wrote one.
    pub data: Bytes,
}

/// One file found in the job's result directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    /// File base name.
    pub name: String,
    /// File contents.
    pub payload: Bytes,
}

/// How the engine process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with status zero.
    Success,
    /// Exited non-zero, was killed by a signal, or could not be waited on.
    ExitedWithError {
        /// Exit code, when the process exited normally.
        code: Option<i32>,
        /// Human-readable reason.
        message: String,
    },
    /// Killed after running past its deadline.
    DeadlineExceeded {
        /// The deadline that was exceeded.
        deadline: Duration,
    },
}

impl Display for ExitOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("exited successfully"),
            Self::ExitedWithError { message, .. } => f.write_str(message),
            Self::DeadlineExceeded { deadline } => {
                write!(f, "killed after exceeding its {}s deadline", deadline.as_secs())
            }
        }
    }
}
