#![forbid(unsafe_code)]

//! `scan-agent-ctl`: command-line client for `scan-agent`.
//!
//! Submits scan jobs and gateway probes over mutual-TLS gRPC. Live engine
//! logs go to stderr as they arrive, reports are written to the output
//! directory, and a JSON summary is printed to stdout.

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;

use scan_agent::proto::scan_agent_service_client::ScanAgentServiceClient;
use scan_agent::proto::scan_results_response::Payload;
use scan_agent::proto::{
    Device, ScanRequest, SshGateway, SshGatewayTestRequest, UserDeviceCredentials,
};
use scan_agent::tls::load_client_tls;

type CtlResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(
    name = "scan-agent-ctl",
    about = "Command-line client for scan-agent",
    version,
    long_about = None
)]
struct Cli {
    /// Agent endpoint, e.g. `https://agent01:50051`.
    #[arg(long, default_value = "https://localhost:50051")]
    endpoint: String,

    /// Server name expected in the agent certificate.
    #[arg(long, default_value = "localhost")]
    domain: String,

    /// Client certificate (PEM).
    #[arg(long, default_value = "certs/client.pem")]
    cert: PathBuf,

    /// Client private key (PEM).
    #[arg(long, default_value = "certs/client.key")]
    key: PathBuf,

    /// CA certificate used to verify the agent (PEM).
    #[arg(long, default_value = "certs/ca.pem")]
    ca: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a scan job and collect its reports.
    Submit {
        /// Job identifier.
        #[arg(long)]
        job_id: String,

        /// Target device as `NAME=ADDRESS`; repeatable.
        #[arg(long = "device", value_parser = parse_device, required = true)]
        devices: Vec<Device>,

        /// Scan definition source URL.
        #[arg(long)]
        source: String,

        /// Engine deadline in seconds.
        #[arg(long, default_value_t = 300)]
        timeout: i64,

        /// Device credential set name.
        #[arg(long)]
        credentials_name: Option<String>,

        /// Device vendor (`CISCO` enables the enable password).
        #[arg(long, default_value = "")]
        vendor: String,

        /// Device login user.
        #[arg(long, default_value = "")]
        username: String,

        /// Device login password.
        #[arg(long, env = "SCAN_AGENT_CTL_PASSWORD", default_value = "")]
        password: String,

        /// Device privileged-mode password.
        #[arg(long, default_value = "")]
        enable_password: String,

        /// Device private key file (PEM).
        #[arg(long)]
        private_key_file: Option<PathBuf>,

        /// Directory receiving report files and the engine log.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        #[command(flatten)]
        gateway: GatewayArgs,
    },

    /// Check that the agent can log in to an SSH gateway.
    Probe {
        #[command(flatten)]
        gateway: GatewayArgs,
    },
}

#[derive(Debug, clap::Args)]
struct GatewayArgs {
    /// Jump host name.
    #[arg(long)]
    gateway_name: Option<String>,

    /// Jump host address.
    #[arg(long, default_value = "")]
    gateway_ip: String,

    /// Jump host login user.
    #[arg(long, default_value = "")]
    gateway_username: String,

    /// Jump host password.
    #[arg(long, env = "SCAN_AGENT_CTL_GATEWAY_PASSWORD", default_value = "")]
    gateway_password: String,

    /// Jump host private key file (PEM).
    #[arg(long)]
    gateway_private_key_file: Option<PathBuf>,
}

impl GatewayArgs {
    fn into_proto(self, require_name: bool) -> CtlResult<Option<SshGateway>> {
        let name = match self.gateway_name {
            Some(name) => name,
            None if require_name => String::from("probe"),
            None => return Ok(None),
        };
        Ok(Some(SshGateway {
            gateway_name: name,
            gateway_ip: self.gateway_ip,
            gateway_username: self.gateway_username,
            gateway_password: self.gateway_password,
            gateway_private_key: read_optional(self.gateway_private_key_file.as_deref())?,
        }))
    }
}

fn parse_device(raw: &str) -> Result<Device, String> {
    let (name, address) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=ADDRESS, got {raw:?}"))?;
    Ok(Device {
        device_name: name.trim().to_owned(),
        ip_address: address.trim().to_owned(),
    })
}

fn read_optional(path: Option<&Path>) -> CtlResult<String> {
    Ok(match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => String::new(),
    })
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    if let Err(err) = run(args).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> CtlResult<()> {
    let tls = load_client_tls(&args.cert, &args.key, &args.ca, &args.domain).await?;
    let channel = Channel::from_shared(args.endpoint.clone())?
        .tls_config(tls)?
        .connect()
        .await
        .map_err(|err| format!("failed to connect to {}: {err}", args.endpoint))?;
    let mut client = ScanAgentServiceClient::new(channel)
        .accept_compressed(CompressionEncoding::Gzip)
        .max_decoding_message_size(usize::MAX);

    match args.command {
        Command::Submit {
            job_id,
            devices,
            source,
            timeout,
            credentials_name,
            vendor,
            username,
            password,
            enable_password,
            private_key_file,
            output_dir,
            gateway,
        } => {
            let user_device_credentials = match credentials_name {
                Some(name) => Some(UserDeviceCredentials {
                    credentials_name: name,
                    credentials_device_vendor: vendor,
                    username,
                    password,
                    ios_enable_password: enable_password,
                    private_key: read_optional(private_key_file.as_deref())?,
                }),
                None => None,
            };
            let request = ScanRequest {
                job_id: job_id.clone(),
                devices,
                oval_source_url: source,
                ssh_gateway: gateway.into_proto(false)?,
                user_device_credentials,
                scan_timeout_seconds: timeout,
            };
            submit(&mut client, request, &output_dir).await
        }
        Command::Probe { gateway } => {
            let request = SshGatewayTestRequest {
                ssh_gateway: gateway.into_proto(true)?,
            };
            let response = client.ssh_connectivity_test(request).await?.into_inner();
            let summary = serde_json::json!({
                "can_connect": response.ssh_can_connect,
                "result": response.ssh_test_result,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if response.ssh_can_connect {
                Ok(())
            } else {
                Err("agent cannot log in to the gateway".into())
            }
        }
    }
}

async fn submit(
    client: &mut ScanAgentServiceClient<Channel>,
    request: ScanRequest,
    output_dir: &Path,
) -> CtlResult<()> {
    let job_id = request.job_id.clone();
    std::fs::create_dir_all(output_dir)?;

    let mut stream = client.build_scan_config(request).await?.into_inner();
    let mut log_chunks = 0u64;
    let mut reports = Vec::new();
    let mut agent = String::new();
    let mut log_written = false;
    let mut failure = None;

    let stderr = std::io::stderr();
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(status) => {
                failure = Some(format!("{:?}: {}", status.code(), status.message()));
                break;
            }
        };
        match message.payload {
            Some(Payload::LogChunk(chunk)) => {
                log_chunks += 1;
                let mut out = stderr.lock();
                out.write_all(&chunk.scan_logs)?;
                out.flush()?;
            }
            Some(Payload::Report(report)) => {
                let name = Path::new(&report.device_name)
                    .file_name()
                    .ok_or_else(|| format!("invalid report name {:?}", report.device_name))?;
                let path = output_dir.join(name);
                std::fs::write(&path, &report.scan_results_json)?;
                if !log_written {
                    std::fs::write(output_dir.join(format!("{job_id}.log")), &report.scan_logs_persist)?;
                    log_written = true;
                }
                agent = report.vscan_agent_name;
                reports.push(path.display().to_string());
            }
            None => {}
        }
    }

    let summary = serde_json::json!({
        "job_id": job_id,
        "agent": agent,
        "log_chunks": log_chunks,
        "reports": reports,
        "error": failure,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
