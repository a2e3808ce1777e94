//! Scanning engine process supervisor.
//!
//! Launches one engine process per job with:
//! - `kill_on_drop(true)` so an abandoned execution never leaks a process.
//! - `env_clear()` plus an allowlist so agent secrets are not inherited.
//! - Its own process group on Unix, so a deadline kill, and the cleanup
//!   after a normal exit, also reach any helpers the engine forked.
//!
//! Only the engine's stderr is captured; stdout is discarded.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::models::ExitOutcome;
use crate::{AppError, Result};

use super::JobPaths;

/// Environment variables inherited by the engine process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "LC_ALL",
    "TZ",
    "TMPDIR",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "COMSPEC",
];

/// Variable carrying the job identifier into the engine environment.
pub const JOB_ID_ENV: &str = "SCAN_AGENT_JOB_ID";

/// Time budget of one job, anchored at the moment the request arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    budget: Duration,
    expires_at: Instant,
}

impl Deadline {
    /// A budget counted from `received`.
    #[must_use]
    pub fn starting_at(received: Instant, budget: Duration) -> Self {
        Self {
            budget,
            expires_at: received + budget,
        }
    }
}

/// Builds and starts engine processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    engine: EngineConfig,
    work_dir: PathBuf,
}

impl ProcessSupervisor {
    /// Create a supervisor running `engine` from `work_dir`.
    #[must_use]
    pub fn new(engine: EngineConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            work_dir: work_dir.into(),
        }
    }

    /// Engine arguments with the job placeholders substituted.
    #[must_use]
    pub fn render_args(&self, job_id: &str, paths: &JobPaths) -> Vec<String> {
        let job_file = display(&paths.job_file);
        let job_dir = display(&paths.job_dir);
        let reports_dir = display(&paths.reports_dir);
        self.engine
            .args
            .iter()
            .map(|arg| {
                arg.replace("{job_id}", job_id)
                    .replace("{job_file}", &job_file)
                    .replace("{job_dir}", &job_dir)
                    .replace("{reports_dir}", &reports_dir)
            })
            .collect()
    }

    /// Start the engine for one job.
    ///
    /// Time already spent since `deadline` was anchored counts against it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the process cannot be spawned or its
    /// stderr cannot be captured.
    pub fn start(&self, job_id: &str, paths: &JobPaths, deadline: Deadline) -> Result<RunningEngine> {
        let mut cmd = Command::new(&self.engine.program);
        cmd.args(self.render_args(job_id, paths));

        cmd.env_clear();
        for key in ALLOWED_ENV_VARS
            .iter()
            .copied()
            .chain(self.engine.pass_env.iter().map(String::as_str))
        {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env(JOB_ID_ENV, job_id);

        cmd.current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Launch(format!(
                "failed to start engine {}: {err}",
                self.engine.program
            ))
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Launch("failed to capture engine stderr".into()))?;

        let pid = child.id();
        let remaining = deadline.expires_at.saturating_duration_since(Instant::now());
        info!(
            job_id,
            pid,
            deadline_secs = deadline.budget.as_secs(),
            remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
            "engine started"
        );

        Ok(RunningEngine {
            job_id: job_id.to_owned(),
            child,
            pid,
            stderr: Some(stderr),
            deadline,
        })
    }
}

/// A started engine process.
#[derive(Debug)]
pub struct RunningEngine {
    job_id: String,
    child: Child,
    pid: Option<u32>,
    stderr: Option<ChildStderr>,
    deadline: Deadline,
}

impl RunningEngine {
    /// OS process identifier, while the process has not been reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the diagnostic pipe. Returns `None` after the first call.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the process to exit, killing it if the deadline passes first.
    ///
    /// Never returns before the process has been reaped.
    pub async fn wait(&mut self) -> ExitOutcome {
        match tokio::time::timeout_at(self.deadline.expires_at, self.child.wait()).await {
            Ok(Ok(status)) => classify(status),
            Ok(Err(err)) => {
                warn!(job_id = %self.job_id, %err, "error waiting for engine process");
                ExitOutcome::ExitedWithError {
                    code: None,
                    message: format!("failed to wait for engine: {err}"),
                }
            }
            Err(_elapsed) => {
                warn!(
                    job_id = %self.job_id,
                    deadline_secs = self.deadline.budget.as_secs(),
                    "engine exceeded its deadline; killing"
                );
                self.terminate().await;
                ExitOutcome::DeadlineExceeded {
                    deadline: self.deadline.budget,
                }
            }
        }
    }

    /// Kill whatever is left of the engine's process group.
    ///
    /// The group outlives the engine itself while any process it forked is
    /// still running.
    pub fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            kill_process_group(&self.job_id, pid);
        }
    }

    async fn terminate(&mut self) {
        self.kill_group();
        if let Err(err) = self.child.kill().await {
            debug!(job_id = %self.job_id, %err, "engine kill returned an error");
        }
    }
}

fn classify(status: ExitStatus) -> ExitOutcome {
    if status.success() {
        return ExitOutcome::Success;
    }
    let code = status.code();
    let message = code.map_or_else(
        || "engine terminated by signal".to_owned(),
        |c| format!("engine exited with code {c}"),
    );
    ExitOutcome::ExitedWithError { code, message }
}

#[cfg(unix)]
fn kill_process_group(job_id: &str, pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(job_id, pid, "killed engine process group"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(err) => debug!(job_id, pid, %err, "process group kill failed"),
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
