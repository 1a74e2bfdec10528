//! Output sink contract
//!
//! A sink plays one decoded buffer at a time and reports back through a
//! [`PlaybackCompletion`], which fires exactly once: when playback ends, when
//! it is forcibly stopped, or when the sink gives up on the buffer.

use std::time::Duration;

use tokio::task::JoinHandle;

use super::types::{Epoch, PlayableBuffer};
use crate::error::OutputError;
use crate::events::{EventSender, SessionEvent};

/// Plays decoded buffers
pub trait OutputSink: Send {
    /// Start playing `buffer`, replacing anything still sounding
    ///
    /// # Errors
    ///
    /// Returns [`OutputError`] if playback could not be started; the
    /// completion still fires when it is dropped
    fn play(
        &mut self,
        buffer: PlayableBuffer,
        completion: PlaybackCompletion,
    ) -> Result<(), OutputError>;

    /// Halt output immediately
    fn stop(&mut self);

    /// Warm up the device so the first real chunk starts without delay
    fn prime(&mut self) {}
}

/// One-shot notice that a chunk finished playing
///
/// Dropping it reports completion, so a sink cannot forget to fire it and
/// cannot fire it twice.
#[derive(Debug)]
pub struct PlaybackCompletion {
    epoch: Epoch,
    index: u32,
    tx: Option<EventSender>,
}

impl PlaybackCompletion {
    /// Create a completion that reports to the session event channel
    #[must_use]
    pub fn new(epoch: Epoch, index: u32, tx: EventSender) -> Self {
        Self {
            epoch,
            index,
            tx: Some(tx),
        }
    }

    /// Create a completion nobody listens to (device priming, probes)
    #[must_use]
    pub const fn detached(index: u32) -> Self {
        Self {
            epoch: Epoch::ZERO,
            index,
            tx: None,
        }
    }

    /// Index of the chunk being played
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Epoch the chunk belongs to
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Report completion now
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for PlaybackCompletion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SessionEvent::PlaybackComplete {
                epoch: self.epoch,
                index: self.index,
            });
        }
    }
}

/// Headless sink that completes each buffer after its duration
///
/// Useful on machines without audio hardware and for end-to-end runs
/// where only ordering and timing matter.
#[derive(Debug)]
pub struct TimedSink {
    current: Option<JoinHandle<()>>,
    speed: f64,
}

impl Default for TimedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TimedSink {
    /// Create a sink that waits out each buffer in real time
    #[must_use]
    pub fn new() -> Self {
        Self::with_speed(1.0)
    }

    /// Create a sink that runs `speed` times faster than real time
    #[must_use]
    pub fn with_speed(speed: f64) -> Self {
        Self {
            current: None,
            speed: if speed > 0.0 { speed } else { 1.0 },
        }
    }
}

impl OutputSink for TimedSink {
    fn play(
        &mut self,
        buffer: PlayableBuffer,
        completion: PlaybackCompletion,
    ) -> Result<(), OutputError> {
        self.stop();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| OutputError::Device(format!("no async runtime: {e}")))?;
        let duration = buffer.duration().div_f64(self.speed);

        tracing::trace!(index = completion.index(), ?duration, "timed playback");
        self.current = Some(runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            completion.finish();
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.current.take() {
            task.abort();
        }
    }
}

impl Drop for TimedSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Generate a sine tone, used to probe the output device
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn tone(frequency: f32, duration: Duration, sample_rate: u32) -> PlayableBuffer {
    let count = (duration.as_secs_f64() * f64::from(sample_rate)) as usize;
    let samples: Vec<f32> = (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect();
    PlayableBuffer::new(samples, sample_rate)
}
