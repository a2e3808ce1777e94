//! Shared helpers for execution tests.
//!
//! Engines are faked with `/bin/sh -c <script>`; inside the script `$1` is
//! the job directory and `$2` the reports directory.

use std::path::Path;
use std::sync::Arc;

use tokio_stream::StreamExt;
use tonic::Status;

use scan_agent::config::{AdmissionPolicyKind, EngineConfig, GlobalConfig, StreamingConfig};
use scan_agent::execution::{ResponseStream, ScanExecutor};
use scan_agent::identity::AgentIdentity;
use scan_agent::jobfile::IniJobFileBuilder;
use scan_agent::proto::scan_results_response::Payload;
use scan_agent::proto::{Device, ScanLogChunk, ScanReport, ScanRequest};

pub const TEST_HOST: &str = "test-agent-01";

pub fn identity() -> AgentIdentity {
    AgentIdentity::new(TEST_HOST)
}

pub fn fake_engine(script: &str) -> EngineConfig {
    EngineConfig {
        program: "/bin/sh".into(),
        args: vec![
            "-c".into(),
            script.into(),
            "sh".into(),
            "{job_dir}".into(),
            "{reports_dir}".into(),
        ],
        pass_env: Vec::new(),
    }
}

pub fn test_config(root: &Path, script: &str) -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.work_dir = root.canonicalize().expect("canonical temp dir");
    config.engine = fake_engine(script);
    config.streaming = StreamingConfig {
        pacing_ms: 0,
        tail_capacity: 64,
        exit_drain_grace_ms: 500,
    };
    config.admission.policy = AdmissionPolicyKind::AlwaysAdmit;
    config
}

pub fn executor(config: GlobalConfig) -> ScanExecutor {
    let config = Arc::new(config);
    let job_files = Arc::new(IniJobFileBuilder::new(
        config.job_file.clone(),
        config.work_dir.clone(),
    ));
    ScanExecutor::new(config, identity(), job_files)
}

pub fn scan_request(job_id: &str, timeout_seconds: i64) -> ScanRequest {
    ScanRequest {
        job_id: job_id.into(),
        devices: vec![Device {
            device_name: "device1".into(),
            ip_address: "10.0.0.1".into(),
        }],
        oval_source_url: "https://definitions.example.com/ios.xml".into(),
        ssh_gateway: None,
        user_device_credentials: None,
        scan_timeout_seconds: timeout_seconds,
    }
}

/// Everything a caller observed on one response stream, in arrival order.
#[derive(Debug, Default)]
pub struct Observed {
    pub events: Vec<Event>,
    pub status: Option<Status>,
}

#[derive(Debug)]
pub enum Event {
    Log(ScanLogChunk),
    Report(ScanReport),
}

impl Observed {
    pub fn logs(&self) -> Vec<&ScanLogChunk> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Log(chunk) => Some(chunk),
                Event::Report(_) => None,
            })
            .collect()
    }

    pub fn reports(&self) -> Vec<&ScanReport> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Report(report) => Some(report),
                Event::Log(_) => None,
            })
            .collect()
    }

    /// True when no log chunk arrives after the first report.
    pub fn logs_precede_reports(&self) -> bool {
        let mut seen_report = false;
        for event in &self.events {
            match event {
                Event::Report(_) => seen_report = true,
                Event::Log(_) if seen_report => return false,
                Event::Log(_) => {}
            }
        }
        true
    }
}

pub async fn observe(mut stream: ResponseStream) -> Observed {
    let mut observed = Observed::default();
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => match message.payload {
                Some(Payload::LogChunk(chunk)) => observed.events.push(Event::Log(chunk)),
                Some(Payload::Report(report)) => observed.events.push(Event::Report(report)),
                None => panic!("response without payload"),
            },
            Err(status) => {
                assert!(observed.status.is_none(), "more than one terminal status");
                observed.status = Some(status);
            }
        }
    }
    observed
}
