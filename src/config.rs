//! Global configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::{AppError, Result};

/// Environment variable that overrides the gRPC listen port.
pub const BIND_PORT_ENV: &str = "SCAN_AGENT_BIND_PORT";

/// Mutual-TLS material loaded at startup.
///
/// All three files must exist; the agent refuses to start without them.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded server certificate chain.
    #[serde(default = "default_cert_file")]
    pub cert_file: PathBuf,
    /// PEM-encoded server private key.
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    /// PEM-encoded CA used to verify client certificates.
    #[serde(default = "default_ca_cert_file")]
    pub ca_cert_file: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_file: default_cert_file(),
            key_file: default_key_file(),
            ca_cert_file: default_ca_cert_file(),
        }
    }
}

fn default_cert_file() -> PathBuf {
    PathBuf::from("certs/scan-agent.pem")
}

fn default_key_file() -> PathBuf {
    PathBuf::from("certs/scan-agent.key")
}

fn default_ca_cert_file() -> PathBuf {
    PathBuf::from("certs/ca.pem")
}

/// How the external scanning engine is launched.
///
/// Arguments may contain the placeholders `{job_id}`, `{job_file}`,
/// `{job_dir}` and `{reports_dir}`; they are substituted per job.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Engine executable.
    #[serde(default = "default_engine_program")]
    pub program: String,
    /// Engine arguments, in order.
    #[serde(default = "default_engine_args")]
    pub args: Vec<String>,
    /// Extra environment variables inherited by the engine on top of the
    /// built-in allowlist.
    #[serde(default = "default_pass_env")]
    pub pass_env: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_engine_program(),
            args: default_engine_args(),
            pass_env: default_pass_env(),
        }
    }
}

fn default_engine_program() -> String {
    "java".into()
}

fn default_engine_args() -> Vec<String> {
    [
        "-Dlicense.file=engine/license.sig.xml",
        "-jar",
        "engine/scan-utilities.jar",
        "scan",
        "-c",
        "{job_file}",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

fn default_pass_env() -> Vec<String> {
    vec!["JAVA_HOME".into()]
}

/// Settings for the generated engine job file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobFileConfig {
    /// Stylesheet used by the engine to turn results into JSON reports.
    #[serde(default = "default_transform_file")]
    pub transform_file: PathBuf,
    /// Benchmark profile selected for every scan.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Engine-side log level written into the job file.
    #[serde(default = "default_engine_log_level")]
    pub log_level: String,
}

impl Default for JobFileConfig {
    fn default() -> Self {
        Self {
            transform_file: default_transform_file(),
            profile: default_profile(),
            log_level: default_engine_log_level(),
        }
    }
}

fn default_transform_file() -> PathBuf {
    PathBuf::from("tools/arf_xccdf_results_to_json_events.xsl")
}

fn default_profile() -> String {
    "xccdf_org.joval_profile_all_rules".into()
}

fn default_engine_log_level() -> String {
    "off".into()
}

/// Live-tail pacing and shutdown tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamingConfig {
    /// Delay before each live log chunk is forwarded.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Capacity of the live-tail queue, in output units. Units arriving
    /// while it is full are skipped for the live tail.
    #[serde(default = "default_tail_capacity")]
    pub tail_capacity: usize,
    /// Time allowed for the diagnostic pipe to reach EOF after the engine
    /// exits before the pump is stopped.
    #[serde(default = "default_exit_drain_grace_ms")]
    pub exit_drain_grace_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            tail_capacity: default_tail_capacity(),
            exit_drain_grace_ms: default_exit_drain_grace_ms(),
        }
    }
}

fn default_pacing_ms() -> u64 {
    1000
}

fn default_tail_capacity() -> usize {
    64
}

fn default_exit_drain_grace_ms() -> u64 {
    2000
}

/// Which admission policy guards inbound calls.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicyKind {
    /// Reject when the normalized 5-minute load average reaches the threshold.
    #[default]
    LoadAverage,
    /// Admit every request.
    AlwaysAdmit,
}

/// Admission control settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct AdmissionConfig {
    /// Policy selected at startup.
    #[serde(default)]
    pub policy: AdmissionPolicyKind,
    /// Load-per-core threshold at or above which requests are rejected.
    #[serde(default = "default_max_normalized_load")]
    pub max_normalized_load: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            policy: AdmissionPolicyKind::default(),
            max_normalized_load: default_max_normalized_load(),
        }
    }
}

fn default_max_normalized_load() -> f64 {
    0.9
}

/// SSH jump-host probe settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProbeConfig {
    /// TCP port probed on the gateway.
    #[serde(default = "default_probe_port")]
    pub port: u16,
    /// Timeout covering connect, handshake and authentication.
    #[serde(default = "default_probe_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: default_probe_port(),
            timeout_seconds: default_probe_timeout_seconds(),
        }
    }
}

fn default_probe_port() -> u16 {
    22
}

fn default_probe_timeout_seconds() -> u64 {
    30
}

fn default_bind_port() -> u16 {
    50051
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_jobs_dir() -> PathBuf {
    PathBuf::from("scanjobs")
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// TCP port the gRPC server listens on.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    /// Directory the engine runs in; relative paths resolve against it.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Per-job working directories, relative to `work_dir`.
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,
    /// Transport security material.
    #[serde(default)]
    pub tls: TlsConfig,
    /// Engine invocation.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Generated job file settings.
    #[serde(default)]
    pub job_file: JobFileConfig,
    /// Live-tail streaming settings.
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Admission control.
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Gateway probe.
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind_port: default_bind_port(),
            work_dir: default_work_dir(),
            jobs_dir: default_jobs_dir(),
            tls: TlsConfig::default(),
            engine: EngineConfig::default(),
            job_file: JobFileConfig::default(),
            streaming: StreamingConfig::default(),
            admission: AdmissionConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides on top of the parsed file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if [`BIND_PORT_ENV`] is set to something
    /// that is not a port number.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = env::var(BIND_PORT_ENV) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                self.bind_port = trimmed.parse().map_err(|err| {
                    AppError::Config(format!("{BIND_PORT_ENV}={trimmed} is not a valid port: {err}"))
                })?;
                info!(port = self.bind_port, "bind port overridden from environment");
            }
        }
        Ok(())
    }

    /// Root directory holding one sub-directory per job.
    #[must_use]
    pub fn jobs_root(&self) -> PathBuf {
        self.work_dir.join(&self.jobs_dir)
    }

    /// Working directory of a single job.
    #[must_use]
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_root().join(job_id)
    }

    /// Directory the engine writes its reports into for `job_id`.
    #[must_use]
    pub fn reports_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("reports")
    }

    fn validate(&mut self) -> Result<()> {
        if self.engine.program.trim().is_empty() {
            return Err(AppError::Config("engine.program must not be empty".into()));
        }

        if self.streaming.tail_capacity == 0 {
            return Err(AppError::Config(
                "streaming.tail_capacity must be greater than zero".into(),
            ));
        }

        let threshold = self.admission.max_normalized_load;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(AppError::Config(
                "admission.max_normalized_load must be a positive number".into(),
            ));
        }

        if self.probe.timeout_seconds == 0 {
            return Err(AppError::Config(
                "probe.timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.jobs_dir.is_absolute() || self.jobs_dir.as_os_str().is_empty() {
            return Err(AppError::Config(
                "jobs_dir must be a non-empty relative path".into(),
            ));
        }

        let canonical_root = self
            .work_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("work_dir invalid: {err}")))?;
        self.work_dir = canonical_root;

        Ok(())
    }
}
