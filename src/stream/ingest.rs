//! Stream ingest
//!
//! Runs one push connection to completion, turning event payloads into
//! session events tagged with the connection's epoch.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;

use super::record::{IngestRecord, parse_record};
use super::transport::PushTransport;
use crate::error::TransportError;
use crate::events::{EventSender, SessionEvent};
use crate::feedback::{Feedback, Status};
use crate::playback::Epoch;

/// Consume the push stream for `query`
///
/// Returns once the stream is final, fails, or the session stops listening.
/// Aborting the task closes the connection.
pub async fn run_ingest(
    transport: Arc<dyn PushTransport>,
    query: String,
    epoch: Epoch,
    events: EventSender,
    feedback: Feedback,
) {
    let started = Instant::now();

    let mut stream = match transport.open(&query).await {
        Ok(stream) => stream,
        Err(error) => {
            let _ = events.send(SessionEvent::TransportFailed { epoch, error });
            return;
        }
    };
    tracing::debug!(epoch = %epoch, "push connection open");

    let mut chunks = 0_u32;
    let mut dropped = 0_u32;

    while let Some(item) = stream.next().await {
        let payload = match item {
            Ok(payload) => payload,
            Err(error) => {
                let _ = events.send(SessionEvent::TransportFailed { epoch, error });
                return;
            }
        };

        let record = match parse_record(&payload) {
            Ok(record) => record,
            Err(e) => {
                dropped += 1;
                tracing::warn!(epoch = %epoch, error = %e, "dropping push record");
                continue;
            }
        };

        match record {
            IngestRecord::Chunk(record) => {
                chunks += 1;
                if chunks == 1 {
                    tracing::info!(
                        epoch = %epoch,
                        elapsed_ms = started.elapsed().as_millis(),
                        "first chunk received"
                    );
                }
                if let Some(label) = &record.label {
                    feedback.emit(Status::Caption {
                        text: label.clone(),
                    });
                }

                let is_final = record.is_final;
                tracing::debug!(epoch = %epoch, index = record.index, is_final, "chunk received");
                if events
                    .send(SessionEvent::ChunkArrived { epoch, record })
                    .is_err()
                {
                    return;
                }
                if is_final {
                    log_complete(epoch, started, chunks, dropped);
                    return;
                }
            }
            IngestRecord::Progress(text) => {
                tracing::debug!(epoch = %epoch, text = %text, "progress update");
                feedback.emit(Status::Caption { text });
            }
            IngestRecord::Final => {
                log_complete(epoch, started, chunks, dropped);
                let _ = events.send(SessionEvent::StreamEnded { epoch });
                return;
            }
            IngestRecord::ServerError(message) => {
                let _ = events.send(SessionEvent::TransportFailed {
                    epoch,
                    error: TransportError::Server(message),
                });
                return;
            }
        }
    }

    let _ = events.send(SessionEvent::TransportFailed {
        epoch,
        error: TransportError::Closed,
    });
}

fn log_complete(epoch: Epoch, started: Instant, chunks: u32, dropped: u32) {
    tracing::info!(
        epoch = %epoch,
        chunks,
        dropped,
        elapsed_ms = started.elapsed().as_millis(),
        "response stream complete"
    );
}
