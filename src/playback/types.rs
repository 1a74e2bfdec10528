//! Core playback data types

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Token identifying one query's in-flight work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl Epoch {
    /// Epoch before any query has started
    pub const ZERO: Self = Self(0);

    /// Raw epoch value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared source of truth for the live epoch
///
/// Cloned into decode tasks so they can bail out early once a newer query
/// has started. Only the session controller advances it.
#[derive(Debug, Clone, Default)]
pub struct EpochClock {
    current: Arc<AtomicU64>,
}

impl EpochClock {
    /// Create a clock starting at epoch 0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The live epoch
    #[must_use]
    pub fn current(&self) -> Epoch {
        Epoch(self.current.load(Ordering::Acquire))
    }

    /// Advance to a fresh epoch and return it
    pub fn advance(&self) -> Epoch {
        Epoch(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Whether `epoch` is still the live one
    #[must_use]
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.current() == epoch
    }
}

/// One indexed unit of server-streamed audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Position in the response, contiguous from 0
    pub index: u32,
    /// Opaque encoded audio; `None` for control chunks
    pub payload: Option<Arc<[u8]>>,
    /// Caption text for this chunk
    pub label: Option<String>,
    /// Server's hint of how many chunks the response has
    pub total: Option<u32>,
    /// Whether this record also terminates the stream
    pub is_final: bool,
}

impl ChunkRecord {
    /// Create an audio chunk record
    #[must_use]
    pub fn new(index: u32, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            index,
            payload: Some(payload.into()),
            label: None,
            total: None,
            is_final: false,
        }
    }

    /// Create a control chunk that occupies `index` but carries no audio
    #[must_use]
    pub const fn control(index: u32) -> Self {
        Self {
            index,
            payload: None,
            label: None,
            total: None,
            is_final: false,
        }
    }

    /// Return this record with a caption attached
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Return this record with a total-chunks hint
    #[must_use]
    pub const fn with_total(mut self, total: u32) -> Self {
        self.total = Some(total);
        self
    }

    /// Return this record marked as the last of the stream
    #[must_use]
    pub const fn into_final(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// Decoded mono samples ready for the output sink
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PlayableBuffer {
    /// Wrap decoded mono samples
    #[must_use]
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Mono samples in `[-1.0, 1.0]`
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the samples
    #[must_use]
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Observable state of the playback sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// No chunk received yet for this epoch
    Idle,
    /// Waiting for the chunk at the cursor to arrive or finish decoding
    WaitingForChunk(u32),
    /// A chunk is sounding on the output sink
    Playing(u32),
    /// Stream is final; the last playable chunk is still sounding
    Draining,
    /// Nothing more will play for this epoch
    Stopped,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::WaitingForChunk(index) => write!(f, "waiting for chunk {index}"),
            Self::Playing(index) => write!(f, "playing chunk {index}"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_clock_advances_monotonically() {
        let clock = EpochClock::new();
        let first = clock.current();
        let second = clock.advance();
        let third = clock.advance();

        assert!(second > first);
        assert!(third > second);
        assert!(clock.is_current(third));
        assert!(!clock.is_current(second));
    }

    #[test]
    fn epoch_clock_clones_share_state() {
        let clock = EpochClock::new();
        let observer = clock.clone();
        let epoch = clock.advance();

        assert!(observer.is_current(epoch));
    }

    #[test]
    fn buffer_duration_from_rate() {
        let buffer = PlayableBuffer::new(vec![0.0; 12_000], 24_000);
        assert_eq!(buffer.duration(), Duration::from_millis(500));
        assert_eq!(buffer.len(), 12_000);
    }

    #[test]
    fn buffer_duration_zero_rate() {
        let buffer = PlayableBuffer::new(vec![0.0; 10], 0);
        assert_eq!(buffer.duration(), Duration::ZERO);
    }
}
