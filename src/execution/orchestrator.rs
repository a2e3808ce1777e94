//! Per-request execution lifecycle.
//!
//! ```text
//! Validating -> ConfigBuilding -> Running -> Draining -> Collecting -> Terminal
//! ```
//!
//! Everything up to and including the engine launch happens in
//! [`ScanExecutor::prepare`], before the caller's stream exists, so those
//! failures surface as the RPC's immediate error. The remaining phases run
//! in [`PreparedExecution::run`] and end with exactly one terminal status on
//! the stream, sent only after the streamer has finished.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{GlobalConfig, StreamingConfig};
use crate::identity::AgentIdentity;
use crate::jobfile::{JobFileBuilder, JobFileTargets};
use crate::models::{ExitOutcome, ScanJob};
use crate::proto;
use crate::{AppError, Result};

use super::collector::{collect_reports, is_dir};
use super::multiplexer::{FullCapture, OutputMultiplexer};
use super::outbound::{Outbound, ResponseStream};
use super::streamer::spawn_log_streamer;
use super::supervisor::{Deadline, ProcessSupervisor, RunningEngine};
use super::JobPaths;

/// Messages buffered between the execution and the RPC transport.
const RESPONSE_BUFFER: usize = 16;

/// Lifecycle phase of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Checking the request.
    Validating,
    /// Writing the engine job file.
    ConfigBuilding,
    /// Engine running; output is being captured and tailed.
    Running,
    /// Engine gone; waiting for the live tail to drain.
    Draining,
    /// Streaming report artifacts.
    Collecting,
    /// Terminal status decided.
    Terminal,
}

impl ExecutionPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::ConfigBuilding => "config_building",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Collecting => "collecting",
            Self::Terminal => "terminal",
        }
    }
}

impl Display for ExecutionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(phase: ExecutionPhase) {
    debug!(phase = %phase, "execution phase");
}

type ActiveJobs = Arc<Mutex<HashSet<String>>>;

/// Reserves a job identifier for the lifetime of one execution.
#[derive(Debug)]
struct JobLease {
    active: ActiveJobs,
    job_id: String,
}

impl JobLease {
    fn acquire(active: &ActiveJobs, job_id: &str) -> Result<Self> {
        let inserted = active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_owned());
        if !inserted {
            return Err(AppError::InvalidArgument(format!(
                "job {job_id} is already running on this agent"
            )));
        }
        Ok(Self {
            active: Arc::clone(active),
            job_id: job_id.to_owned(),
        })
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// Runs scan requests against the configured engine.
pub struct ScanExecutor {
    config: Arc<GlobalConfig>,
    identity: AgentIdentity,
    job_files: Arc<dyn JobFileBuilder>,
    supervisor: ProcessSupervisor,
    active: ActiveJobs,
}

impl std::fmt::Debug for ScanExecutor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanExecutor")
            .field("identity", &self.identity)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl ScanExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        identity: AgentIdentity,
        job_files: Arc<dyn JobFileBuilder>,
    ) -> Self {
        let supervisor = ProcessSupervisor::new(config.engine.clone(), config.work_dir.clone());
        Self {
            config,
            identity,
            job_files,
            supervisor,
            active: Arc::default(),
        }
    }

    /// Agent identity stamped on reports and errors.
    #[must_use]
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Validate the request, write the job file, and start the engine.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidArgument` for a malformed request or a job
    ///   identifier already running on this agent.
    /// - `AppError::JobFile` if the job file cannot be produced.
    /// - `AppError::Launch` if the engine cannot be started.
    pub async fn prepare(&self, request: proto::ScanRequest) -> Result<PreparedExecution> {
        let received = Instant::now();
        enter(ExecutionPhase::Validating);
        let job = ScanJob::try_from(request)?;
        let deadline = Deadline::starting_at(received, job.deadline);
        let lease = JobLease::acquire(&self.active, &job.job_id)?;

        enter(ExecutionPhase::ConfigBuilding);
        let paths = JobPaths::for_job(&self.config, &job.job_id);
        tokio::fs::create_dir_all(&paths.job_dir).await.map_err(|err| {
            AppError::JobFile(format!(
                "failed to create directory for job {}: {err}",
                job.job_id
            ))
        })?;
        clear_stale_reports(&paths).await?;

        let job_file = self
            .job_files
            .build(
                &job,
                JobFileTargets {
                    job_dir: &paths.job_dir,
                    reports_dir: &paths.reports_dir,
                },
            )
            .await?;
        let paths = paths.with_job_file(job_file);

        let engine = self.supervisor.start(&job.job_id, &paths, deadline)?;

        Ok(PreparedExecution {
            execution_id: Uuid::new_v4(),
            started_at: received,
            streaming: self.config.streaming.clone(),
            job,
            paths,
            engine,
            lease,
        })
    }

    /// Run a prepared execution in the background and return its stream.
    #[must_use]
    pub fn launch(&self, prepared: PreparedExecution) -> ResponseStream {
        let (outbound, stream) = Outbound::channel(RESPONSE_BUFFER, self.identity.clone());
        tokio::spawn(prepared.run(outbound));
        stream
    }
}

/// A job whose engine is already running.
#[derive(Debug)]
pub struct PreparedExecution {
    execution_id: Uuid,
    started_at: Instant,
    streaming: StreamingConfig,
    job: ScanJob,
    paths: JobPaths,
    engine: RunningEngine,
    lease: JobLease,
}

impl PreparedExecution {
    /// Engine process identifier.
    #[must_use]
    pub fn engine_pid(&self) -> Option<u32> {
        self.engine.pid()
    }

    /// Drive the execution to its terminal status on `outbound`.
    pub async fn run(self, outbound: Outbound) {
        let span = info_span!(
            "execution",
            job_id = %self.job.job_id,
            execution_id = %self.execution_id,
            engine_pid = self.engine_pid()
        );
        self.run_inner(outbound).instrument(span).await;
    }

    async fn run_inner(mut self, outbound: Outbound) {
        enter(ExecutionPhase::Running);
        let job_id = self.job.job_id.clone();
        let pacing = Duration::from_millis(self.streaming.pacing_ms);
        let grace = Duration::from_millis(self.streaming.exit_drain_grace_ms);

        let (tail_tx, tail_rx) = mpsc::channel(self.streaming.tail_capacity.max(1));
        let streamer = spawn_log_streamer(job_id.clone(), tail_rx, outbound.clone(), pacing);
        let mux = OutputMultiplexer::new(job_id.clone(), tail_tx)
            .with_log_file(&self.paths.engine_log)
            .await;

        let stop = CancellationToken::new();
        let (outcome, capture) = match self.engine.take_stderr() {
            Some(stderr) => {
                supervise(&mut self.engine, mux.run(stderr, stop.clone()), &stop, grace).await
            }
            None => {
                drop(mux);
                let outcome = self.engine.wait().await;
                self.engine.kill_group();
                (outcome, FullCapture::default())
            }
        };
        info!(outcome = %outcome, log_bytes = capture.bytes.len(), "engine finished");

        enter(ExecutionPhase::Draining);
        match streamer.await {
            Ok(report) => debug!(forwarded = report.forwarded, "live tail finished"),
            Err(err) => warn!(%err, "live log streamer task failed"),
        }

        enter(ExecutionPhase::Collecting);
        let result = collect(&self.job, &self.paths, &outcome, &capture, &outbound).await;

        enter(ExecutionPhase::Terminal);
        let elapsed_ms = u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(()) => info!(elapsed_ms, "scan job completed"),
            Err(err) => warn!(elapsed_ms, %err, "scan job failed"),
        }
        // The job id is free again before the caller sees the stream end.
        drop(self.lease);
        outbound.finish(result).await;
    }
}

/// Wait for the engine while pumping its output.
///
/// After the engine exits the pump gets `grace` to reach EOF. Whatever is
/// left of the engine's process group is then killed, so no descendant
/// outlives the execution.
async fn supervise<F>(
    engine: &mut RunningEngine,
    pump: F,
    stop: &CancellationToken,
    grace: Duration,
) -> (ExitOutcome, FullCapture)
where
    F: Future<Output = FullCapture>,
{
    tokio::pin!(pump);
    let mut captured = None;

    let outcome = {
        let wait = engine.wait();
        tokio::pin!(wait);
        loop {
            tokio::select! {
                outcome = &mut wait => break outcome,
                capture = &mut pump, if captured.is_none() => captured = Some(capture),
            }
        }
    };

    let capture = match captured {
        Some(capture) => capture,
        None => match tokio::time::timeout(grace, &mut pump).await {
            Ok(capture) => capture,
            Err(_elapsed) => {
                warn!("engine output still open after exit; killing leftover processes");
                engine.kill_group();
                stop.cancel();
                pump.await
            }
        },
    };
    engine.kill_group();

    (outcome, capture)
}

async fn clear_stale_reports(paths: &JobPaths) -> Result<()> {
    match tokio::fs::remove_dir_all(&paths.reports_dir).await {
        Ok(()) => {
            debug!(path = %paths.reports_dir.display(), "removed stale reports");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::JobFile(format!(
            "failed to clear {}: {err}",
            paths.reports_dir.display()
        ))),
    }
}

async fn collect(
    job: &ScanJob,
    paths: &JobPaths,
    outcome: &ExitOutcome,
    capture: &FullCapture,
    outbound: &Outbound,
) -> Result<()> {
    let job_id = &job.job_id;

    if !is_dir(&paths.reports_dir).await {
        return Err(match outcome {
            ExitOutcome::DeadlineExceeded { .. } => {
                AppError::DeadlineExceeded(format!("scan job {job_id} was {outcome}"))
            }
            _ => AppError::NoResults(format!(
                "scan job {job_id} {outcome} but directory {} was not found",
                paths.reports_dir.display()
            )),
        });
    }

    let sent = collect_reports(&paths.reports_dir, &capture.bytes, outbound).await?;

    match outcome {
        ExitOutcome::DeadlineExceeded { .. } => Err(AppError::DeadlineExceeded(format!(
            "scan job {job_id} was {outcome}; {sent} partial report(s) streamed"
        ))),
        ExitOutcome::ExitedWithError { .. } => {
            warn!(%outcome, sent, "engine reported an error but produced reports");
            Ok(())
        }
        ExitOutcome::Success => Ok(()),
    }
}
