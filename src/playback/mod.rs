//! Chunk decoding, ordering and audio output

mod decoder;
#[cfg(feature = "cpal-output")]
mod output;
mod prefetch;
mod queue;
mod sequencer;
mod sink;
mod types;

pub use decoder::{
    AudioChunkDecoder, ChunkDecoder, DEFAULT_OUTPUT_RATE, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE,
};
#[cfg(feature = "cpal-output")]
pub use output::CpalSink;
pub use prefetch::{DEFAULT_LOOKAHEAD, Prefetcher};
pub use queue::{DecodedCache, PendingQueue};
pub use sequencer::Sequencer;
pub use sink::{OutputSink, PlaybackCompletion, TimedSink, tone};
pub use types::{ChunkRecord, Epoch, EpochClock, PlayableBuffer, SequencerState};
