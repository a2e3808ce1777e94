//! INI job file understood by the bundled scanning engine.
//!
//! Layout, in order:
//!
//! | Section                     | Present when                 |
//! |-----------------------------|------------------------------|
//! | `[Report: JSON]`            | always                       |
//! | `[Credential: <name>]`      | device credentials are named |
//! | `[Credential: ssh-gateway]` | a jump host is named         |
//! | `[Gateway: <name>]`         | a jump host is named         |
//! | `[Benchmark]`               | always                       |
//! | `[Logs]`                    | always                       |
//! | `[Target: <device>]`        | once per device              |
//!
//! The file ends with a `#EOF` marker line.

use std::fmt::Write as _;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::debug;

use crate::config::JobFileConfig;
use crate::models::{DeviceCredentials, JumpHost, ScanJob};
use crate::{AppError, Result};

use super::{JobFileBuilder, JobFileTargets};

/// File name of the generated job file inside the job directory.
pub const JOB_FILE_NAME: &str = "config.ini";

const GATEWAY_CREDENTIAL: &str = "ssh-gateway";
const BENCHMARK_ID: &str = "xccdf_org.joval_benchmark_generated";

/// Writes [`JOB_FILE_NAME`] into the job directory.
#[derive(Debug, Clone)]
pub struct IniJobFileBuilder {
    settings: JobFileConfig,
    work_dir: PathBuf,
}

impl IniJobFileBuilder {
    /// Create a builder; relative settings paths resolve against `work_dir`.
    #[must_use]
    pub fn new(settings: JobFileConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            work_dir: work_dir.into(),
        }
    }
}

impl JobFileBuilder for IniJobFileBuilder {
    fn build<'a>(
        &'a self,
        job: &'a ScanJob,
        targets: JobFileTargets<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf>> + Send + 'a>> {
        Box::pin(async move {
            let transform = self.work_dir.join(&self.settings.transform_file);
            let contents = render_ini(job, &self.settings, &transform, &targets)?;

            tokio::fs::create_dir_all(targets.job_dir)
                .await
                .map_err(|err| {
                    AppError::JobFile(format!(
                        "failed to create directory for job {}: {err}",
                        job.job_id
                    ))
                })?;

            let path = targets.job_dir.join(JOB_FILE_NAME);
            tokio::fs::write(&path, contents).await.map_err(|err| {
                AppError::JobFile(format!("failed to write {}: {err}", path.display()))
            })?;

            debug!(job_id = %job.job_id, path = %path.display(), "job file written");
            Ok(path)
        })
    }
}

/// Render the INI job file for `job`.
///
/// # Errors
///
/// Returns `AppError::JobFile` if the job has no devices, a device lacks a
/// name or address, or any name or value would break the INI structure.
pub fn render_ini(
    job: &ScanJob,
    settings: &JobFileConfig,
    transform_file: &Path,
    targets: &JobFileTargets<'_>,
) -> Result<String> {
    if job.devices.is_empty() {
        return Err(AppError::JobFile(
            "at least one target device is required".into(),
        ));
    }

    let mut out = IniWriter::default();

    out.section("Report: JSON")?;
    out.key("input.type", "xccdf_results")?;
    out.key("output.extension", "json")?;
    out.key("transform.file", &path_value(transform_file))?;
    out.key("export.dir", &path_value(targets.reports_dir))?;

    if let Some(creds) = &job.credentials {
        write_device_credentials(&mut out, creds)?;
    }

    if let Some(gateway) = &job.jump_host {
        write_gateway(&mut out, gateway)?;
    }

    out.section("Benchmark")?;
    out.key("profile", &settings.profile)?;
    out.key("source", &job.definition_source)?;
    out.key("xccdf_id", BENCHMARK_ID)?;
    out.key("xccdf_version", "0")?;

    out.section("Logs")?;
    out.key("export.dir", &path_value(&targets.job_dir.join("logs")))?;
    out.key("level", &settings.log_level)?;
    out.key("output.extension", ".log")?;

    let credential = job.credentials.as_ref().map_or("", |c| c.name.as_str());
    for device in &job.devices {
        if device.name.trim().is_empty() {
            return Err(AppError::JobFile("device name must not be empty".into()));
        }
        if device.address.trim().is_empty() {
            return Err(AppError::JobFile(format!(
                "device {} has no address",
                device.name
            )));
        }
        out.section(&format!("Target: {}", device.name))?;
        out.key("credential", credential)?;
        out.key("host", &device.address)?;
        if let Some(gateway) = &job.jump_host {
            out.key("gateway", &gateway.name)?;
        }
    }

    Ok(out.finish())
}

fn write_device_credentials(out: &mut IniWriter, creds: &DeviceCredentials) -> Result<()> {
    out.section(&format!("Credential: {}", creds.name))?;
    out.key("type", "SSH")?;
    out.key("username", &creds.username)?;
    if let Some(password) = &creds.password {
        out.key("password", password)?;
    }
    if creds.vendor == "CISCO" {
        if let Some(enable) = &creds.enable_password {
            out.key("ios_enable_password", enable)?;
        }
    }
    if let Some(key) = &creds.private_key {
        out.key("private_key", &encode_private_key(key))?;
    }
    Ok(())
}

fn write_gateway(out: &mut IniWriter, gateway: &JumpHost) -> Result<()> {
    out.section(&format!("Credential: {GATEWAY_CREDENTIAL}"))?;
    out.key("type", "SSH")?;
    out.key("username", &gateway.username)?;
    if let Some(password) = &gateway.password {
        out.key("password", password)?;
    }
    if let Some(key) = &gateway.private_key {
        out.key("private_key", &encode_private_key(key))?;
    }

    out.section(&format!("Gateway: {}", gateway.name))?;
    out.key("host", &gateway.address)?;
    out.key("credential", GATEWAY_CREDENTIAL)?;
    Ok(())
}

/// The engine reads multi-line keys as lines joined by backslash-CR.
fn encode_private_key(key: &str) -> String {
    key.replace("\r\n", "\n").replace('\n', "\\\r")
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Default)]
struct IniWriter {
    buf: String,
}

impl IniWriter {
    fn section(&mut self, name: &str) -> Result<()> {
        if name.contains(['[', ']', '\n', '\r']) {
            return Err(AppError::JobFile(format!(
                "section name {name:?} contains reserved characters"
            )));
        }
        if !self.buf.is_empty() {
            self.buf.push('\n');
        }
        // Writing to a String cannot fail.
        let _ = writeln!(self.buf, "[{name}]");
        Ok(())
    }

    fn key(&mut self, key: &str, value: &str) -> Result<()> {
        let bare_cr = value
            .char_indices()
            .any(|(i, c)| c == '\r' && !value[..i].ends_with('\\'));
        if value.contains('\n') || bare_cr {
            return Err(AppError::JobFile(format!(
                "value for {key} must be a single line"
            )));
        }
        let _ = writeln!(self.buf, "{key} = {value}");
        Ok(())
    }

    fn finish(mut self) -> String {
        self.buf.push_str("\n#EOF");
        self.buf
    }
}
