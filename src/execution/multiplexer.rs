//! Engine output multiplexer.
//!
//! Splits the engine's diagnostic stream into two sinks:
//!
//! | Sink          | Delivery                                         |
//! |---------------|--------------------------------------------------|
//! | Full capture  | Every byte, in order; also mirrored to the job's |
//! |               | `engine_stderr.log` file                         |
//! | Live tail     | Best effort; a unit is skipped when the bounded  |
//! |               | queue is full                                    |
//!
//! The tail never applies back-pressure to the capture. Dropping the tail
//! sender when the pump ends is the completion signal for the streamer.
//!
//! A full queue keeps the oldest pending units and skips the new ones. An
//! engine that writes faster than the streamer's pacing drains therefore
//! shows a live view lagging by up to `tail_capacity` x pacing, with gaps
//! where units were skipped. The full capture sent with every report is
//! unaffected.

use std::path::Path;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::LogChunk;

use super::codec::LogLineCodec;

/// Everything the engine wrote to its diagnostic stream.
#[derive(Debug, Clone, Default)]
pub struct FullCapture {
    /// Concatenated output bytes.
    pub bytes: Bytes,
    /// Number of units decoded.
    pub units: u64,
    /// Units that did not fit in the live tail.
    pub tail_skipped: u64,
}

/// Pumps engine output into the full capture and the live tail.
#[derive(Debug)]
pub struct OutputMultiplexer {
    job_id: String,
    tail: mpsc::Sender<LogChunk>,
    log_file: Option<File>,
}

impl OutputMultiplexer {
    /// Create a multiplexer feeding `tail`.
    #[must_use]
    pub fn new(job_id: impl Into<String>, tail: mpsc::Sender<LogChunk>) -> Self {
        Self {
            job_id: job_id.into(),
            tail,
            log_file: None,
        }
    }

    /// Mirror the full capture to `path`.
    ///
    /// A file that cannot be created is logged and skipped; the in-memory
    /// capture is unaffected.
    pub async fn with_log_file(mut self, path: &Path) -> Self {
        match File::create(path).await {
            Ok(file) => self.log_file = Some(file),
            Err(err) => {
                warn!(job_id = %self.job_id, path = %path.display(), %err, "cannot create engine log file");
            }
        }
        self
    }

    /// Read `reader` until EOF or until `stop` fires.
    ///
    /// Consumes the multiplexer; the tail queue is closed on return.
    pub async fn run<R>(mut self, reader: R, stop: CancellationToken) -> FullCapture
    where
        R: AsyncRead + Unpin,
    {
        let mut framed = FramedRead::new(reader, LogLineCodec::new());
        let mut capture = BytesMut::new();
        let mut units: u64 = 0;
        let mut tail_skipped: u64 = 0;

        loop {
            let unit = tokio::select! {
                biased;
                () = stop.cancelled() => {
                    debug!(job_id = %self.job_id, "output pump stopped before EOF");
                    break;
                }
                item = framed.next() => match item {
                    Some(Ok(unit)) => unit,
                    Some(Err(err)) => {
                        warn!(job_id = %self.job_id, %err, "error reading engine output");
                        break;
                    }
                    None => break,
                },
            };

            capture.extend_from_slice(&unit);
            self.mirror(&unit).await;

            match self.tail.try_send(LogChunk {
                sequence: units,
                data: unit,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(_) | TrySendError::Closed(_)) => tail_skipped += 1,
            }
            units += 1;
        }

        // Partial data buffered when the pump was stopped still belongs to
        // the capture.
        let remainder = framed.read_buffer();
        if !remainder.is_empty() {
            capture.extend_from_slice(remainder);
            let remainder = Bytes::copy_from_slice(remainder);
            self.mirror(&remainder).await;
        }

        if let Some(file) = self.log_file.as_mut() {
            if let Err(err) = file.flush().await {
                warn!(job_id = %self.job_id, %err, "failed to flush engine log file");
            }
        }

        if tail_skipped > 0 {
            debug!(job_id = %self.job_id, tail_skipped, "live tail skipped units under load");
        }

        FullCapture {
            bytes: capture.freeze(),
            units,
            tail_skipped,
        }
    }

    async fn mirror(&mut self, unit: &Bytes) {
        let Some(file) = self.log_file.as_mut() else {
            return;
        };
        if let Err(err) = file.write_all(unit).await {
            warn!(job_id = %self.job_id, %err, "engine log file write failed; mirroring disabled");
            self.log_file = None;
        }
    }
}
