//! Best-effort status feedback for UI collaborators
//!
//! The core publishes [`Status`] values and never waits on, or depends on,
//! anyone listening.

use serde::Serialize;
use tokio::sync::broadcast;

/// Buffered statuses per subscriber before the oldest are dropped
const CHANNEL_CAPACITY: usize = 64;

/// A status update for the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Status {
    /// A query was sent to the server
    Requesting {
        /// The query text
        query: String,
    },
    /// Caption or progress text from the server
    Caption {
        /// Text to show
        text: String,
    },
    /// Chunks were sent for decoding
    Decoding {
        /// Number of decodes just issued
        count: usize,
    },
    /// A chunk started playing
    Playing {
        /// Chunk index
        index: u32,
        /// Server's total-chunks hint, if known
        total: Option<u32>,
    },
    /// A chunk was skipped
    Skipped {
        /// Chunk index
        index: u32,
        /// Why it was skipped
        reason: String,
    },
    /// The response finished playing
    Finished,
    /// Playback was stopped before the response finished
    Stopped,
    /// The query failed
    Failed {
        /// User-facing notice
        message: String,
    },
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requesting { query } => write!(f, "asking: {query}"),
            Self::Caption { text } => write!(f, "{text}"),
            Self::Decoding { count } => write!(f, "decoding {count} chunk(s)"),
            Self::Playing {
                index,
                total: Some(total),
            } => write!(f, "playing {}/{total}", index + 1),
            Self::Playing { index, total: None } => write!(f, "playing chunk {index}"),
            Self::Skipped { index, reason } => write!(f, "skipped chunk {index}: {reason}"),
            Self::Finished => write!(f, "ask another question"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed { message } => write!(f, "{message}"),
        }
    }
}

/// Publisher for [`Status`] updates
#[derive(Debug, Clone)]
pub struct Feedback {
    tx: broadcast::Sender<Status>,
}

impl Default for Feedback {
    fn default() -> Self {
        Self::new()
    }
}

impl Feedback {
    /// Create a publisher with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to status updates
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.tx.subscribe()
    }

    /// Publish a status; dropped silently when nobody listens
    pub fn emit(&self, status: Status) {
        tracing::trace!(%status, "feedback");
        let _ = self.tx.send(status);
    }
}
