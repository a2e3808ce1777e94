//! Caller-facing response stream.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use crate::identity::AgentIdentity;
use crate::models::{LogChunk, ReportArtifact};
use crate::proto::{scan_results_response::Payload, ScanLogChunk, ScanReport, ScanResultsResponse};
use crate::{AppError, Result};

/// Stream handed back to the RPC layer.
pub type ResponseStream = ReceiverStream<std::result::Result<ScanResultsResponse, Status>>;

/// Sending half of one execution's response stream.
///
/// The stream ends successfully once every clone is dropped; [`Outbound::finish`]
/// sends the terminal error status, if any, first.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<std::result::Result<ScanResultsResponse, Status>>,
    identity: AgentIdentity,
}

impl Outbound {
    /// Create a response channel with room for `capacity` buffered messages.
    #[must_use]
    pub fn channel(capacity: usize, identity: AgentIdentity) -> (Self, ResponseStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, identity }, ReceiverStream::new(rx))
    }

    /// Forward one live log chunk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the caller has gone away.
    pub async fn send_log(&self, chunk: LogChunk) -> Result<()> {
        let message = ScanResultsResponse {
            payload: Some(Payload::LogChunk(ScanLogChunk {
                scan_logs: chunk.data.to_vec(),
                sequence: chunk.sequence,
            })),
        };
        self.send(message).await
    }

    /// Send one report artifact together with the full engine log.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the caller has gone away.
    pub async fn send_report(&self, artifact: &ReportArtifact, full_log: &Bytes) -> Result<()> {
        let message = ScanResultsResponse {
            payload: Some(Payload::Report(ScanReport {
                scan_results_json: artifact.payload.to_vec(),
                vscan_agent_name: self.identity.hostname().to_owned(),
                device_name: artifact.name.clone(),
                scan_logs_persist: full_log.to_vec(),
            })),
        };
        self.send(message).await
    }

    /// End the stream, sending `result`'s error as the terminal status.
    pub async fn finish(self, result: Result<()>) {
        if let Err(err) = result {
            let status = err.into_status(&self.identity);
            // A caller that already left has nothing to receive.
            let _ = self.tx.send(Err(status)).await;
        }
    }

    async fn send(&self, message: ScanResultsResponse) -> Result<()> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| AppError::Transport("caller closed the response stream".into()))
    }
}
