use tonic::Code;

use scan_agent::identity::AgentIdentity;
use scan_agent::AppError;

#[test]
fn caller_faults_map_to_invalid_argument() {
    assert_eq!(AppError::InvalidArgument("x".into()).code(), Code::InvalidArgument);
    assert_eq!(AppError::JobFile("x".into()).code(), Code::InvalidArgument);
}

#[test]
fn rejection_maps_to_resource_exhausted() {
    assert_eq!(AppError::Rejected("busy".into()).code(), Code::ResourceExhausted);
}

#[test]
fn execution_failures_map_to_internal() {
    for err in [
        AppError::Launch("x".into()),
        AppError::NoResults("x".into()),
        AppError::DeadlineExceeded("x".into()),
        AppError::Collect("x".into()),
    ] {
        assert_eq!(err.code(), Code::Internal, "{err}");
    }
}

#[test]
fn status_message_is_prefixed_with_agent_hostname() {
    let identity = AgentIdentity::new("scanner-07");
    let status = AppError::NoResults("directory missing".into()).into_status(&identity);

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(
        status.message(),
        "agent scanner-07 - no results: directory missing"
    );
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(msg) if msg.contains("gone")));
}
