//! Scan job description received from the caller.

use std::time::Duration;

use super::non_empty;
use crate::proto;
use crate::{AppError, Result};

/// One target device to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Device name; also the name the engine gives its report.
    pub name: String,
    /// Address the engine connects to.
    pub address: String,
}

/// Credentials the engine uses to log in to the target devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCredentials {
    /// Credential set name referenced by each target.
    pub name: String,
    /// Device vendor (`CISCO` enables the IOS enable password).
    pub vendor: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: Option<String>,
    /// Privileged-mode password for IOS devices.
    pub enable_password: Option<String>,
    /// PEM-encoded private key.
    pub private_key: Option<String>,
}

/// SSH jump host the engine tunnels through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpHost {
    /// Gateway name referenced by each target.
    pub name: String,
    /// Gateway address.
    pub address: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: Option<String>,
    /// PEM-encoded private key.
    pub private_key: Option<String>,
}

/// A validated scan job.
///
/// Immutable for the duration of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    /// Caller-supplied identifier, unique among concurrent executions.
    pub job_id: String,
    /// Targets, in request order.
    pub devices: Vec<Device>,
    /// Optional device credentials.
    pub credentials: Option<DeviceCredentials>,
    /// Optional jump host.
    pub jump_host: Option<JumpHost>,
    /// Where the engine fetches the scan definition from.
    pub definition_source: String,
    /// Hard bound on engine run time.
    pub deadline: Duration,
}

impl ScanJob {
    /// Validate a job identifier.
    ///
    /// The identifier names a directory under the jobs root, so it must be a
    /// single plain path segment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidArgument` if the identifier is empty or is
    /// not a plain path segment.
    pub fn validate_job_id(job_id: &str) -> Result<()> {
        if job_id.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "job ID is missing from argument".into(),
            ));
        }
        if job_id == "."
            || job_id == ".."
            || job_id.contains(['/', '\\', '\0'])
            || job_id.chars().any(char::is_control)
        {
            return Err(AppError::InvalidArgument(format!(
                "job ID {job_id:?} must be a plain path segment"
            )));
        }
        Ok(())
    }
}

impl TryFrom<proto::ScanRequest> for ScanJob {
    type Error = AppError;

    fn try_from(req: proto::ScanRequest) -> Result<Self> {
        Self::validate_job_id(&req.job_id)?;

        let seconds = u64::try_from(req.scan_timeout_seconds)
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| {
                AppError::InvalidArgument(format!(
                    "scan timeout must be a positive number of seconds, got {}",
                    req.scan_timeout_seconds
                ))
            })?;

        let devices = req
            .devices
            .into_iter()
            .map(|d| Device {
                name: d.device_name,
                address: d.ip_address,
            })
            .collect();

        Ok(Self {
            job_id: req.job_id,
            devices,
            credentials: req
                .user_device_credentials
                .and_then(DeviceCredentials::from_proto),
            jump_host: req.ssh_gateway.and_then(JumpHost::from_proto),
            definition_source: req.oval_source_url,
            deadline: Duration::from_secs(seconds),
        })
    }
}

impl DeviceCredentials {
    /// Credentials are only meaningful when the bundle is named.
    fn from_proto(creds: proto::UserDeviceCredentials) -> Option<Self> {
        let name = non_empty(creds.credentials_name)?;
        Some(Self {
            name,
            vendor: creds.credentials_device_vendor,
            username: creds.username,
            password: non_empty(creds.password),
            enable_password: non_empty(creds.ios_enable_password),
            private_key: non_empty(creds.private_key),
        })
    }
}

impl JumpHost {
    /// A gateway is only used when it is named.
    #[must_use]
    pub fn from_proto(gw: proto::SshGateway) -> Option<Self> {
        let name = non_empty(gw.gateway_name)?;
        Some(Self {
            name,
            address: gw.gateway_ip,
            username: gw.gateway_username,
            password: non_empty(gw.gateway_password),
            private_key: non_empty(gw.gateway_private_key),
        })
    }
}
