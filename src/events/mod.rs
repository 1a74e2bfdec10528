//! Typed events that drive the playback core
//!
//! Everything asynchronous (stream ingest, decode tasks, output completion)
//! reports back to the session task through [`SessionEvent`]s. Each event
//! carries the epoch it was produced under so stale work is discarded in one
//! place instead of in every callback.

use tokio::sync::mpsc;

use crate::error::{DecodeError, TransportError};
use crate::playback::{ChunkRecord, Epoch, PlayableBuffer};

/// Sending half of the session event channel
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half of the session event channel
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the session event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// An event for the session task
#[derive(Debug)]
pub enum SessionEvent {
    /// A chunk record arrived on the push stream
    ChunkArrived {
        /// Epoch of the connection that received it
        epoch: Epoch,
        /// The parsed record
        record: ChunkRecord,
    },

    /// The push stream delivered its final marker
    StreamEnded {
        /// Epoch of the connection
        epoch: Epoch,
    },

    /// The push connection failed
    TransportFailed {
        /// Epoch of the connection
        epoch: Epoch,
        /// What went wrong
        error: TransportError,
    },

    /// A decode task finished
    DecodeComplete {
        /// Epoch the decode was issued under
        epoch: Epoch,
        /// Chunk index
        index: u32,
        /// Decoded buffer or the reason it failed
        result: Result<PlayableBuffer, DecodeError>,
    },

    /// The output sink finished (or was forced to stop) playing a chunk
    PlaybackComplete {
        /// Epoch the chunk was played under
        epoch: Epoch,
        /// Chunk index
        index: u32,
    },
}

impl SessionEvent {
    /// Epoch the event belongs to
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        match self {
            Self::ChunkArrived { epoch, .. }
            | Self::StreamEnded { epoch }
            | Self::TransportFailed { epoch, .. }
            | Self::DecodeComplete { epoch, .. }
            | Self::PlaybackComplete { epoch, .. } => *epoch,
        }
    }

    /// Short event name for logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ChunkArrived { .. } => "chunk_arrived",
            Self::StreamEnded { .. } => "stream_ended",
            Self::TransportFailed { .. } => "transport_failed",
            Self::DecodeComplete { .. } => "decode_complete",
            Self::PlaybackComplete { .. } => "playback_complete",
        }
    }
}
