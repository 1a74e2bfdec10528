//! Push stream record parsing

use serde::Deserialize;
use thiserror::Error;

use crate::playback::ChunkRecord;

/// One JSON record as the server sends it
#[derive(Debug, Default, Deserialize)]
struct WireRecord {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    chunk_index: Option<u32>,
    #[serde(default)]
    total_chunks: Option<u32>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    error: Option<String>,
}

/// What an incoming record means for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestRecord {
    /// An audio chunk (may also be final)
    Chunk(ChunkRecord),
    /// Status text without audio
    Progress(String),
    /// End of the response
    Final,
    /// The server gave up on the query
    ServerError(String),
}

/// A record that cannot be used
#[derive(Debug, Error)]
pub enum RecordError {
    /// Not valid JSON or wrong field types
    #[error("invalid record: {0}")]
    Json(#[from] serde_json::Error),

    /// Audio without a chunk index cannot be ordered
    #[error("audio record has no chunk_index")]
    MissingIndex,

    /// Record carries nothing actionable
    #[error("record is empty")]
    Empty,
}

/// Parse one event payload
///
/// # Errors
///
/// Returns [`RecordError`] if the payload should be dropped
pub fn parse_record(payload: &str) -> Result<IngestRecord, RecordError> {
    let wire: WireRecord = serde_json::from_str(payload)?;

    if let Some(message) = wire.error {
        return Ok(IngestRecord::ServerError(message));
    }

    let text = wire.text.filter(|t| !t.trim().is_empty());

    match wire.audio.filter(|a| !a.is_empty()) {
        Some(audio) => {
            let index = wire.chunk_index.ok_or(RecordError::MissingIndex)?;
            let mut record = ChunkRecord::new(index, audio.into_bytes());
            record.label = text;
            record.total = wire.total_chunks;
            record.is_final = wire.is_final;
            Ok(IngestRecord::Chunk(record))
        }
        None if wire.is_final => Ok(IngestRecord::Final),
        None => text.map(IngestRecord::Progress).ok_or(RecordError::Empty),
    }
}
