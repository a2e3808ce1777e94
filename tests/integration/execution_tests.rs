//! End-to-end execution scenarios against a fake engine.

#![cfg(unix)]

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tonic::Code;

use scan_agent::execution::ScanExecutor;
use scan_agent::jobfile::{IniJobFileBuilder, JobFileBuilder, JobFileTargets};
use scan_agent::models::ScanJob;
use scan_agent::AppError;

use super::test_helpers::{executor, identity, observe, scan_request, test_config, TEST_HOST};

const THREE_LINES_AND_REPORT: &str = r#"
echo "line 1" >&2
echo "line 2" >&2
echo "line 3" >&2
mkdir -p "$2"
printf '{"device":"device1"}' > "$2/device1.json"
"#;

#[tokio::test]
async fn successful_job_streams_logs_then_report() {
    let tmp = tempfile::tempdir().unwrap();
    let exec = executor(test_config(tmp.path(), THREE_LINES_AND_REPORT));

    let prepared = exec.prepare(scan_request("job-42", 30)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;

    assert!(observed.status.is_none(), "unexpected status: {:?}", observed.status);

    let logs = observed.logs();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].scan_logs, b"line 1\n");
    assert_eq!(logs[2].scan_logs, b"line 3\n");
    assert_eq!(
        logs.iter().map(|c| c.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    let reports = observed.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].device_name, "device1.json");
    assert_eq!(reports[0].scan_results_json, br#"{"device":"device1"}"#);
    assert_eq!(reports[0].vscan_agent_name, TEST_HOST);
    assert_eq!(reports[0].scan_logs_persist, b"line 1\nline 2\nline 3\n");

    assert!(observed.logs_precede_reports());
}

#[tokio::test]
async fn engine_log_is_mirrored_to_job_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), THREE_LINES_AND_REPORT);
    let log_path = config.job_dir("job-mirror").join("engine_stderr.log");
    let exec = executor(config);

    let prepared = exec.prepare(scan_request("job-mirror", 30)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;
    assert!(observed.status.is_none());

    let mirrored = std::fs::read(log_path).unwrap();
    assert_eq!(mirrored, b"line 1\nline 2\nline 3\n");
}

#[tokio::test]
async fn deadline_kills_engine_and_fails_without_reports() {
    let tmp = tempfile::tempdir().unwrap();
    let exec = executor(test_config(tmp.path(), "echo started >&2; sleep 10"));

    let started = Instant::now();
    let prepared = exec.prepare(scan_request("job-slow", 1)).await.unwrap();
    let pid = prepared.engine_pid().expect("engine pid");
    let observed = observe(exec.launch(prepared)).await;

    assert!(started.elapsed() < Duration::from_secs(5), "deadline not enforced");

    let status = observed.status.as_ref().expect("terminal error status");
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().starts_with(&format!("agent {TEST_HOST} - ")));
    assert!(status.message().contains("deadline"), "{}", status.message());
    assert!(observed.reports().is_empty());

    let pid = nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap());
    assert!(
        nix::sys::signal::kill(pid, None).is_err(),
        "engine process still exists after deadline"
    );
}

#[tokio::test]
async fn deadline_with_partial_reports_streams_them_then_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let script = r#"mkdir -p "$2"; echo '{}' > "$2/partial.json"; sleep 10"#;
    let exec = executor(test_config(tmp.path(), script));

    let prepared = exec.prepare(scan_request("job-partial", 1)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;

    assert_eq!(observed.reports().len(), 1);
    let status = observed.status.as_ref().expect("terminal error status");
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("partial"), "{}", status.message());
}

#[tokio::test]
async fn missing_reports_directory_is_internal_error() {
    let tmp = tempfile::tempdir().unwrap();
    let exec = executor(test_config(tmp.path(), "echo nothing to report >&2"));

    let prepared = exec.prepare(scan_request("job-empty", 30)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;

    assert_eq!(observed.logs().len(), 1);
    let status = observed.status.as_ref().expect("terminal error status");
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("was not found"), "{}", status.message());
}

#[tokio::test]
async fn non_zero_exit_with_reports_still_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let script = r#"mkdir -p "$2"; echo '{}' > "$2/a.json"; echo '{}' > "$2/b.json"; exit 3"#;
    let exec = executor(test_config(tmp.path(), script));

    let prepared = exec.prepare(scan_request("job-exit3", 30)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;

    assert!(observed.status.is_none());
    let names: Vec<_> = observed.reports().iter().map(|r| r.device_name.clone()).collect();
    assert_eq!(names, vec!["a.json", "b.json"]);
}

#[tokio::test]
async fn stale_reports_from_earlier_run_are_not_returned() {
    let tmp = tempfile::tempdir().unwrap();
    let script = r#"mkdir -p "$2"; echo '{}' > "$2/fresh.json""#;
    let config = test_config(tmp.path(), script);
    let stale_dir = config.reports_dir("job-rerun");
    std::fs::create_dir_all(&stale_dir).unwrap();
    std::fs::write(stale_dir.join("stale.json"), b"{}").unwrap();
    let exec = executor(config);

    let prepared = exec.prepare(scan_request("job-rerun", 30)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;

    let names: Vec<_> = observed.reports().iter().map(|r| r.device_name.clone()).collect();
    assert_eq!(names, vec!["fresh.json"]);
}

#[tokio::test]
async fn descendant_holding_output_open_does_not_hang_execution() {
    let tmp = tempfile::tempdir().unwrap();
    let script = r#"sleep 5 >&2 & echo done >&2; mkdir -p "$2"; echo '{}' > "$2/r.json""#;
    let exec = executor(test_config(tmp.path(), script));

    let started = Instant::now();
    let prepared = exec.prepare(scan_request("job-orphan", 30)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(observed.status.is_none());
    assert_eq!(observed.reports().len(), 1);
    assert_eq!(observed.reports()[0].scan_logs_persist, b"done\n");
}

#[tokio::test]
async fn launch_failure_is_reported_before_streaming() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path(), "");
    config.engine.program = "/nonexistent/scan-engine".into();
    let exec = executor(config);

    let err = exec.prepare(scan_request("job-nolaunch", 30)).await.unwrap_err();
    assert!(matches!(err, AppError::Launch(_)), "{err}");
    assert_eq!(err.code(), Code::Internal);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_launch() {
    let tmp = tempfile::tempdir().unwrap();
    let exec = executor(test_config(tmp.path(), "exit 0"));

    let err = exec.prepare(scan_request("", 30)).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(err.to_string().contains("job ID is missing"));

    let err = exec.prepare(scan_request("job-1", 0)).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let mut no_devices = scan_request("job-2", 30);
    no_devices.devices.clear();
    let err = exec.prepare(no_devices).await.unwrap_err();
    assert!(matches!(err, AppError::JobFile(_)), "{err}");
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn concurrent_duplicate_job_id_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let exec = executor(test_config(tmp.path(), "sleep 1"));

    let first = exec.prepare(scan_request("job-dup", 30)).await.unwrap();
    let err = exec.prepare(scan_request("job-dup", 30)).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(err.to_string().contains("already running"));

    let _ = observe(exec.launch(first)).await;
    let again = exec.prepare(scan_request("job-dup", 30)).await;
    assert!(again.is_ok(), "job id must be released after completion");
}

#[tokio::test]
async fn job_file_is_written_before_engine_starts() {
    let tmp = tempfile::tempdir().unwrap();
    let script = r#"test -f "$1/config.ini" || exit 9; mkdir -p "$2"; cp "$1/config.ini" "$2/seen.ini""#;
    let exec = executor(test_config(tmp.path(), script));

    let prepared = exec.prepare(scan_request("job-ini", 30)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;

    assert!(observed.status.is_none());
    let report = &observed.reports()[0];
    let ini = String::from_utf8(report.scan_results_json.clone()).unwrap();
    assert!(ini.contains("[Target: device1]"));
    assert!(ini.ends_with("#EOF"));
}

#[tokio::test]
async fn descendant_holding_output_open_is_killed() {
    let tmp = tempfile::tempdir().unwrap();
    let script = r#"(sleep 3; touch "$1/survivor") >&2 & echo done >&2; mkdir -p "$2"; echo '{}' > "$2/r.json""#;
    let config = test_config(tmp.path(), script);
    let marker = config.job_dir("job-holder").join("survivor");
    let exec = executor(config);

    let prepared = exec.prepare(scan_request("job-holder", 30)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;
    assert!(observed.status.is_none());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!marker.exists(), "descendant kept running after the execution ended");
}

#[tokio::test]
async fn detached_descendant_is_killed_after_engine_exits() {
    let tmp = tempfile::tempdir().unwrap();
    let script = r#"(sleep 2; touch "$1/survivor") >/dev/null 2>&1 & mkdir -p "$2"; echo '{}' > "$2/r.json""#;
    let config = test_config(tmp.path(), script);
    let marker = config.job_dir("job-detached").join("survivor");
    let exec = executor(config);

    let prepared = exec.prepare(scan_request("job-detached", 30)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;
    assert!(observed.status.is_none());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists(), "descendant kept running after the execution ended");
}

/// Writes the INI job file after a fixed delay.
struct SlowJobFiles {
    inner: IniJobFileBuilder,
    delay: Duration,
}

impl JobFileBuilder for SlowJobFiles {
    fn build<'a>(
        &'a self,
        job: &'a ScanJob,
        targets: JobFileTargets<'a>,
    ) -> Pin<Box<dyn Future<Output = scan_agent::Result<PathBuf>> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.build(job, targets).await
        })
    }
}

#[tokio::test]
async fn job_file_time_counts_against_deadline() {
    let tmp = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(tmp.path(), "sleep 30"));
    let job_files = Arc::new(SlowJobFiles {
        inner: IniJobFileBuilder::new(config.job_file.clone(), config.work_dir.clone()),
        delay: Duration::from_secs(2),
    });
    let exec = ScanExecutor::new(config, identity(), job_files);

    let started = Instant::now();
    let prepared = exec.prepare(scan_request("job-slow-config", 2)).await.unwrap();
    let observed = observe(exec.launch(prepared)).await;

    let status = observed.status.as_ref().expect("terminal error status");
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("deadline"), "{}", status.message());
    assert!(
        started.elapsed() < Duration::from_millis(3500),
        "deadline was restarted at launch: {:?}",
        started.elapsed()
    );
}
