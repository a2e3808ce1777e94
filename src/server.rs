//! gRPC service surface.
//!
//! [`AgentService`] implements the generated `ScanAgentService` trait on top
//! of [`ScanExecutor`] and [`GatewayProber`]. [`serve`] wraps it with the
//! admission interceptor and runs it behind mutual TLS until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::admission::{policy_from_config, AdmissionInterceptor, AdmissionPolicy};
use crate::config::GlobalConfig;
use crate::execution::{ResponseStream, ScanExecutor};
use crate::identity::AgentIdentity;
use crate::jobfile::IniJobFileBuilder;
use crate::probe::{GatewayProber, ProbeTarget};
use crate::proto::scan_agent_service_server::{ScanAgentService, ScanAgentServiceServer};
use crate::proto::{ScanRequest, SshGatewayTestRequest, SshGatewayTestResponse};
use crate::tls::load_server_tls;
use crate::Result;

/// Handler for both agent RPCs.
#[derive(Debug)]
pub struct AgentService {
    executor: Arc<ScanExecutor>,
    prober: GatewayProber,
}

impl AgentService {
    /// Create the service from its collaborators.
    #[must_use]
    pub fn new(executor: Arc<ScanExecutor>, prober: GatewayProber) -> Self {
        Self { executor, prober }
    }

    /// Create the service with the INI job-file builder from `config`.
    #[must_use]
    pub fn from_config(config: Arc<GlobalConfig>, identity: AgentIdentity) -> Self {
        let job_files = Arc::new(IniJobFileBuilder::new(
            config.job_file.clone(),
            config.work_dir.clone(),
        ));
        let prober = GatewayProber::new(&config.probe);
        let executor = Arc::new(ScanExecutor::new(config, identity, job_files));
        Self::new(executor, prober)
    }
}

#[tonic::async_trait]
impl ScanAgentService for AgentService {
    type BuildScanConfigStream = ResponseStream;

    async fn build_scan_config(
        &self,
        request: Request<ScanRequest>,
    ) -> std::result::Result<Response<Self::BuildScanConfigStream>, Status> {
        let peer = request.remote_addr();
        let req = request.into_inner();
        info!(
            job_id = %req.job_id,
            devices = req.devices.len(),
            peer = ?peer,
            "scan request received"
        );

        let identity = self.executor.identity().clone();
        let prepared = self.executor.prepare(req).await.map_err(|err| {
            warn!(%err, "scan request failed before streaming");
            err.into_status(&identity)
        })?;

        Ok(Response::new(self.executor.launch(prepared)))
    }

    async fn ssh_connectivity_test(
        &self,
        request: Request<SshGatewayTestRequest>,
    ) -> std::result::Result<Response<SshGatewayTestResponse>, Status> {
        let target = request
            .into_inner()
            .ssh_gateway
            .map(ProbeTarget::from)
            .unwrap_or_default();
        let report = self.prober.probe(&target).await;
        Ok(Response::new(report.into()))
    }
}

/// The service as mounted on the transport, admission check included.
pub type AdmittedService = InterceptedService<ScanAgentServiceServer<AgentService>, AdmissionInterceptor>;

/// Wrap `service` with gzip support and the configured admission policy.
#[must_use]
pub fn admitted_service(
    service: AgentService,
    config: &GlobalConfig,
    identity: AgentIdentity,
) -> AdmittedService {
    with_policy(service, policy_from_config(&config.admission), identity)
}

/// Wrap `service` with gzip support and an explicit admission policy.
#[must_use]
pub fn with_policy(
    service: AgentService,
    policy: Arc<dyn AdmissionPolicy>,
    identity: AgentIdentity,
) -> AdmittedService {
    let server = ScanAgentServiceServer::new(service)
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);
    InterceptedService::new(server, AdmissionInterceptor::new(policy, identity))
}

/// Serve both RPCs on `config.bind_port` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Tls` if the TLS material cannot be loaded and
/// `AppError::Transport` if the listener fails.
pub async fn serve(
    config: Arc<GlobalConfig>,
    identity: AgentIdentity,
    ct: CancellationToken,
) -> Result<()> {
    let tls = load_server_tls(&config.tls).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.bind_port));

    let service = AgentService::from_config(Arc::clone(&config), identity.clone());
    let service = admitted_service(service, &config, identity);

    info!(%addr, "scan agent listening");
    Server::builder()
        .tls_config(tls)?
        .add_service(service)
        .serve_with_shutdown(addr, async move { ct.cancelled().await })
        .await?;
    info!("scan agent stopped");
    Ok(())
}
