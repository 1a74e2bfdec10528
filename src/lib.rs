//! voxline - streaming voice-query client
//!
//! Sends a transcript to a response server and plays the server-streamed,
//! chunked audio answer as it arrives:
//! - Chunks arrive over Server-Sent Events in any order, possibly duplicated
//! - Upcoming chunks are decoded in the background ahead of need
//! - Decoded audio plays strictly in index order, without gaps
//! - A new query cancels everything from the previous one
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Session Controller                  │
//! │   commands  │  epoch  │  one push connection         │
//! └──────┬──────────────────────────────▲───────────────┘
//!        │ records                      │ events (epoch-tagged)
//! ┌──────▼──────────┐   ┌───────────────┴───────────────┐
//! │  Stream Ingest  │   │           Sequencer            │
//! │  SSE │ records  │   │ queue │ cache │ cursor │ state │
//! └─────────────────┘   └──────┬────────────────┬───────┘
//!                              │                │
//!                     ┌────────▼──────┐  ┌──────▼───────┐
//!                     │  Prefetcher   │  │ Output Sink  │
//!                     │   Decoder     │  │ cpal │ timed │
//!                     └───────────────┘  └──────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod feedback;
pub mod playback;
pub mod session;
pub mod stream;

pub use config::Config;
pub use error::{DecodeError, Error, OutputError, Result, TransportError};
pub use feedback::{Feedback, Status};
pub use session::{Command, SessionController, SessionHandle};
