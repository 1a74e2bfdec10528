//! Error types for voxline
//!
//! Failures inside a query are scoped to that query: decode and output errors
//! skip a chunk, transport errors end the session with a notice.

use thiserror::Error;

/// Result type alias for voxline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voxline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A query with no text was submitted
    #[error("query is empty")]
    EmptyQuery,

    /// The session task is no longer running
    #[error("session closed")]
    SessionClosed,

    /// Chunk decode error
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Push connection error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Audio output error
    #[error(transparent)]
    Output(#[from] OutputError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A chunk payload could not be turned into playable samples
///
/// The sequencer skips the chunk and keeps the session alive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload is not valid base64 text
    #[error("payload encoding error: {0}")]
    Encoding(String),

    /// Payload decoded to zero bytes
    #[error("payload is empty")]
    Empty,

    /// Container recognized but not supported
    #[error("unsupported audio format: {0}")]
    Unsupported(String),

    /// Audio data is corrupt or contains no frames
    #[error("malformed audio: {0}")]
    Malformed(String),

    /// Resampling to the output rate failed
    #[error("resample failed: {0}")]
    Resample(String),

    /// The decoder panicked on this payload
    #[error("decoder panicked: {0}")]
    Panicked(String),
}

/// The push connection failed
///
/// Ends the current query as if a final marker had been received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Server answered with a non-success status
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Server-provided message, if any
        message: String,
    },

    /// Reading the stream body failed mid-way
    #[error("stream error: {0}")]
    Stream(String),

    /// Server reported an error inside the stream
    #[error("server error: {0}")]
    Server(String),

    /// Connection closed before a final marker arrived
    #[error("connection closed before the response completed")]
    Closed,
}

/// The output device could not play a buffer
///
/// The sequencer skips the chunk and tries the next one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    /// No usable output device or configuration
    #[error("output device error: {0}")]
    Device(String),

    /// Building or starting the output stream failed
    #[error("output stream error: {0}")]
    Stream(String),

    /// The output worker is no longer running
    #[error("output sink closed")]
    Closed,
}
