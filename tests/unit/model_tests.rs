use std::time::Duration;

use scan_agent::models::{ExitOutcome, ScanJob};
use scan_agent::proto;
use scan_agent::AppError;

fn request() -> proto::ScanRequest {
    proto::ScanRequest {
        job_id: "job-42".into(),
        devices: vec![proto::Device {
            device_name: "device1".into(),
            ip_address: "10.0.0.1".into(),
        }],
        oval_source_url: "https://defs.example.com/ios.xml".into(),
        ssh_gateway: Some(proto::SshGateway::default()),
        user_device_credentials: Some(proto::UserDeviceCredentials {
            credentials_name: "netops".into(),
            credentials_device_vendor: "CISCO".into(),
            username: "admin".into(),
            password: String::new(),
            ios_enable_password: "en".into(),
            private_key: String::new(),
        }),
        scan_timeout_seconds: 120,
    }
}

#[test]
fn request_converts_to_job() {
    let job = ScanJob::try_from(request()).unwrap();

    assert_eq!(job.job_id, "job-42");
    assert_eq!(job.devices[0].name, "device1");
    assert_eq!(job.deadline, Duration::from_secs(120));
    assert!(job.jump_host.is_none(), "unnamed gateway means no gateway");

    let creds = job.credentials.unwrap();
    assert_eq!(creds.name, "netops");
    assert_eq!(creds.password, None);
    assert_eq!(creds.enable_password.as_deref(), Some("en"));
}

#[test]
fn unnamed_credentials_are_ignored() {
    let mut req = request();
    req.user_device_credentials.as_mut().unwrap().credentials_name = String::new();
    assert!(ScanJob::try_from(req).unwrap().credentials.is_none());
}

#[test]
fn missing_job_id_is_invalid() {
    let mut req = request();
    req.job_id = String::new();
    let err = ScanJob::try_from(req).unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(msg) if msg == "job ID is missing from argument"));
}

#[test]
fn path_like_job_ids_are_invalid() {
    for bad in ["..", ".", "a/b", "a\\b", "bad\nid"] {
        assert!(ScanJob::validate_job_id(bad).is_err(), "{bad:?} accepted");
    }
    assert!(ScanJob::validate_job_id("job-2024.10_a").is_ok());
}

#[test]
fn non_positive_timeout_is_invalid() {
    for timeout in [0, -5] {
        let mut req = request();
        req.scan_timeout_seconds = timeout;
        assert!(matches!(
            ScanJob::try_from(req),
            Err(AppError::InvalidArgument(_))
        ));
    }
}

#[test]
fn exit_outcome_display() {
    assert_eq!(ExitOutcome::Success.to_string(), "exited successfully");
    let outcome = ExitOutcome::DeadlineExceeded {
        deadline: Duration::from_secs(5),
    };
    assert_eq!(outcome.to_string(), "killed after exceeding its 5s deadline");
}
