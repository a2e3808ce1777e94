//! Live log streamer.
//!
//! The only task spawned per execution besides the execution itself. It
//! forwards live-tail chunks to the caller, paced so a chatty engine does not
//! flood the connection, and ends when the tail queue is closed and drained.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use crate::models::LogChunk;

use super::outbound::Outbound;

/// Delivery counters reported when the streamer ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamerReport {
    /// Chunks delivered to the caller.
    pub forwarded: u64,
    /// Chunks dropped because the caller stream failed.
    pub abandoned: u64,
}

/// Spawn the streamer for one execution.
///
/// After the first failed send, remaining chunks are drained without being
/// forwarded so the multiplexer never observes a stalled queue.
#[must_use]
pub fn spawn_log_streamer(
    job_id: String,
    mut tail: mpsc::Receiver<LogChunk>,
    outbound: Outbound,
    pacing: Duration,
) -> JoinHandle<StreamerReport> {
    let span = tracing::debug_span!("log_streamer", job_id = %job_id);
    tokio::spawn(
        async move {
            let mut report = StreamerReport::default();
            let mut delivering = true;

            while let Some(chunk) = tail.recv().await {
                if !delivering {
                    report.abandoned += 1;
                    continue;
                }
                if !pacing.is_zero() {
                    tokio::time::sleep(pacing).await;
                }
                match outbound.send_log(chunk).await {
                    Ok(()) => report.forwarded += 1,
                    Err(err) => {
                        warn!(%err, "live log delivery failed; remaining chunks are dropped");
                        delivering = false;
                        report.abandoned += 1;
                    }
                }
            }

            debug!(
                forwarded = report.forwarded,
                abandoned = report.abandoned,
                "live tail drained"
            );
            report
        }
        .instrument(span),
    )
}
