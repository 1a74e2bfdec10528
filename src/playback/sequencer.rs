//! Playback sequencer
//!
//! Owns the pending queue, the decoded cache and the cursor, and is the only
//! thing that mutates them. Chunks may arrive in any order and decodes may
//! finish in any order; the sequencer hands buffers to the sink strictly by
//! index, starting at 0, one at a time.
//!
//! # Lifecycle
//!
//! ```text
//!  Idle ──chunk──▶ WaitingForChunk(n) ──ready──▶ Playing(n) ──done──┐
//!                        ▲                                         │
//!                        └─────────────────────────────────────────┘
//!  final + gap at cursor ──▶ Draining (while last chunk sounds) ──▶ Stopped
//!  stop / new epoch (any state) ─────────────────────────────────▶ Stopped
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use super::decoder::ChunkDecoder;
use super::prefetch::Prefetcher;
use super::queue::{DecodedCache, PendingQueue};
use super::sink::{OutputSink, PlaybackCompletion};
use super::types::{ChunkRecord, Epoch, EpochClock, PlayableBuffer, SequencerState};
use crate::error::{DecodeError, TransportError};
use crate::events::{EventSender, SessionEvent};
use crate::feedback::{Feedback, Status};

/// Orders decoded chunks into the output sink
pub struct Sequencer {
    epoch: Epoch,
    cursor: u32,
    queue: PendingQueue,
    cache: DecodedCache,
    failed: BTreeSet<u32>,
    playing: Option<u32>,
    started: bool,
    stream_final: bool,
    stopped: bool,
    transport_failed: bool,
    total: Option<u32>,
    played: u32,
    skipped: u32,
    began_at: Instant,
    prefetcher: Prefetcher,
    sink: Box<dyn OutputSink>,
    events: EventSender,
    feedback: Feedback,
}

impl Sequencer {
    /// Create a sequencer in the `Idle` state
    #[must_use]
    pub fn new(
        decoder: Arc<dyn ChunkDecoder>,
        sink: Box<dyn OutputSink>,
        lookahead: usize,
        clock: EpochClock,
        events: EventSender,
        feedback: Feedback,
    ) -> Self {
        Self {
            epoch: clock.current(),
            cursor: 0,
            queue: PendingQueue::new(),
            cache: DecodedCache::new(),
            failed: BTreeSet::new(),
            playing: None,
            started: false,
            stream_final: false,
            stopped: false,
            transport_failed: false,
            total: None,
            played: 0,
            skipped: 0,
            began_at: Instant::now(),
            prefetcher: Prefetcher::new(decoder, lookahead, clock, events.clone()),
            sink,
            events,
            feedback,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SequencerState {
        if self.stopped {
            return SequencerState::Stopped;
        }
        match self.playing {
            Some(_) if self.stream_final && !self.queue.contains(self.cursor) => {
                SequencerState::Draining
            }
            Some(index) => SequencerState::Playing(index),
            None if !self.started => SequencerState::Idle,
            None => SequencerState::WaitingForChunk(self.cursor),
        }
    }

    /// Epoch this sequencer is serving
    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Index of the next chunk required for playback
    #[must_use]
    pub const fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Number of decoded buffers waiting to play
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Number of records waiting to play
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of decodes outstanding
    #[must_use]
    pub fn decoding(&self) -> usize {
        self.prefetcher.in_flight()
    }

    /// Lookahead window size
    #[must_use]
    pub const fn lookahead(&self) -> usize {
        self.prefetcher.lookahead()
    }

    /// Whether nothing more will play for the current epoch
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Start serving a new epoch with empty state
    pub fn begin(&mut self, epoch: Epoch) {
        self.sink.stop();
        self.reset();
        self.epoch = epoch;
        self.stopped = false;
        self.began_at = Instant::now();
        tracing::debug!(epoch = %epoch, "sequencer ready");
    }

    /// Halt output and drop everything for the current epoch
    pub fn stop(&mut self) {
        self.sink.stop();
        let was_active = !self.stopped;
        self.reset();
        self.stopped = true;

        if was_active {
            tracing::info!(epoch = %self.epoch, "playback stopped");
            self.feedback.emit(Status::Stopped);
        }
    }

    /// Warm up the output device
    pub fn prime_output(&mut self) {
        self.sink.prime();
    }

    /// Apply one event
    ///
    /// Returns `false` if the event belonged to another epoch and was
    /// discarded.
    pub fn handle(&mut self, event: SessionEvent) -> bool {
        if event.epoch() != self.epoch {
            tracing::trace!(
                kind = event.kind(),
                event_epoch = %event.epoch(),
                epoch = %self.epoch,
                "discarding stale event"
            );
            return false;
        }

        match event {
            SessionEvent::ChunkArrived { record, .. } => self.on_chunk(record),
            SessionEvent::StreamEnded { .. } => self.on_stream_end(),
            SessionEvent::TransportFailed { error, .. } => self.on_transport_failed(&error),
            SessionEvent::DecodeComplete { index, result, .. } => self.on_decoded(index, result),
            SessionEvent::PlaybackComplete { index, .. } => self.on_playback_complete(index),
        }
        true
    }

    fn on_chunk(&mut self, record: ChunkRecord) {
        if self.stopped {
            tracing::debug!(index = record.index, "chunk arrived after stop, ignoring");
            return;
        }

        self.started = true;
        let index = record.index;
        let is_final = record.is_final;
        if record.total.is_some() {
            self.total = record.total;
        }

        if index < self.cursor {
            tracing::debug!(index, cursor = self.cursor, "dropping chunk that already played");
        } else {
            if self.failed.remove(&index) {
                tracing::debug!(index, "retrying chunk that failed to decode");
            }
            if self.queue.insert(record).is_some() {
                tracing::debug!(index, "replaced duplicate chunk record");
            } else {
                tracing::debug!(index, cursor = self.cursor, "chunk queued");
            }
        }

        if is_final {
            self.stream_final = true;
        }
        self.advance();
    }

    fn on_decoded(&mut self, index: u32, result: Result<PlayableBuffer, DecodeError>) {
        let issued_for = self.prefetcher.complete(index);

        if self.stopped || index < self.cursor {
            tracing::trace!(index, cursor = self.cursor, "discarding decode result");
            return;
        }

        // A failure only counts against the record the decode was issued for
        let replaced = issued_for.as_ref().is_some_and(|issued| {
            self.queue.get(index).is_some_and(|record| {
                record
                    .payload
                    .as_ref()
                    .is_none_or(|queued| !Arc::ptr_eq(issued, queued))
            })
        });

        match result {
            Err(e) if replaced => {
                tracing::debug!(index, error = %e, "decode of replaced record failed, retrying");
            }
            Ok(buffer) => {
                if self.cache.insert(index, buffer) {
                    tracing::trace!(index, cached = self.cache.len(), "chunk decoded");
                } else {
                    tracing::debug!(index, "keeping earlier decode of duplicate chunk");
                }
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "chunk failed to decode");
                self.failed.insert(index);
            }
        }
        self.advance();
    }

    fn on_playback_complete(&mut self, index: u32) {
        if self.playing != Some(index) {
            tracing::trace!(index, playing = ?self.playing, "ignoring completion for idle chunk");
            return;
        }

        self.playing = None;
        self.cache.take(index);
        tracing::debug!(index, "chunk finished playing");
        self.advance();
    }

    fn on_stream_end(&mut self) {
        if self.stopped {
            return;
        }
        tracing::debug!(
            epoch = %self.epoch,
            cursor = self.cursor,
            queued = self.queue.len(),
            "stream final"
        );
        self.stream_final = true;
        self.advance();
    }

    fn on_transport_failed(&mut self, error: &TransportError) {
        if self.stopped {
            tracing::debug!(error = %error, "push connection ended after stop");
            return;
        }
        tracing::error!(epoch = %self.epoch, error = %error, "push connection failed");
        self.transport_failed = true;
        self.feedback.emit(Status::Failed {
            message: format!("Error getting a response: {error}"),
        });
        self.stream_final = true;
        self.advance();
    }

    /// Hand every chunk that is ready, in order, to the sink
    fn advance(&mut self) {
        if self.stopped {
            return;
        }

        while self.playing.is_none() {
            let cursor = self.cursor;

            if self.failed.remove(&cursor) {
                self.queue.remove(cursor);
                self.skip(cursor, "decode failed");
                continue;
            }

            if let Some(buffer) = self.cache.take(cursor) {
                let label = self.queue.remove(cursor).and_then(|record| record.label);
                self.cursor += 1;
                self.start_playback(cursor, buffer, label);
                continue;
            }

            let has_audio = self.queue.get(cursor).map(|record| record.payload.is_some());
            match has_audio {
                Some(false) => {
                    self.queue.remove(cursor);
                    tracing::debug!(index = cursor, "passing control chunk");
                    self.cursor += 1;
                }
                Some(true) => break,
                None if self.stream_final => {
                    self.finish();
                    return;
                }
                None => break,
            }
        }

        self.prefetch();
    }

    fn start_playback(&mut self, index: u32, buffer: PlayableBuffer, label: Option<String>) {
        let duration = buffer.duration();
        let completion = PlaybackCompletion::new(self.epoch, index, self.events.clone());

        match self.sink.play(buffer, completion) {
            Ok(()) => {
                if self.played == 0 {
                    tracing::info!(
                        epoch = %self.epoch,
                        latency_ms = self.began_at.elapsed().as_millis(),
                        "first audio started"
                    );
                }
                self.played += 1;
                self.playing = Some(index);
                tracing::debug!(index, ?duration, label = label.as_deref(), "chunk playing");
                self.feedback.emit(Status::Playing {
                    index,
                    total: self.total,
                });
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "output failed, skipping chunk");
                self.skipped += 1;
                self.feedback.emit(Status::Skipped {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn skip(&mut self, index: u32, reason: &str) {
        tracing::warn!(index, reason, "skipping chunk");
        self.skipped += 1;
        self.cursor += 1;
        self.feedback.emit(Status::Skipped {
            index,
            reason: reason.to_string(),
        });
    }

    fn prefetch(&mut self) {
        let failed = &self.failed;
        let issued = self.prefetcher.schedule(
            self.epoch,
            self.cursor,
            &self.queue,
            &self.cache,
            |index| failed.contains(&index),
        );
        if issued > 0 {
            self.feedback.emit(Status::Decoding { count: issued });
        }
    }

    /// Stream is final and the cursor chunk will never come
    fn finish(&mut self) {
        if !self.queue.is_empty() {
            tracing::warn!(
                missing = self.cursor,
                discarded = self.queue.len(),
                "stream ended with a gap, discarding later chunks"
            );
        }
        tracing::debug!(epoch = %self.epoch, "draining complete");
        tracing::info!(
            epoch = %self.epoch,
            played = self.played,
            skipped = self.skipped,
            elapsed_ms = self.began_at.elapsed().as_millis(),
            "response finished"
        );

        let notify = !self.transport_failed;
        self.reset();
        self.stopped = true;
        if notify {
            self.feedback.emit(Status::Finished);
        }
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.cache.clear();
        self.failed.clear();
        self.prefetcher.clear();
        self.cursor = 0;
        self.playing = None;
        self.started = false;
        self.stream_final = false;
        self.transport_failed = false;
        self.total = None;
        self.played = 0;
        self.skipped = 0;
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("epoch", &self.epoch)
            .field("state", &self.state())
            .field("cursor", &self.cursor)
            .field("queued", &self.queue.len())
            .field("cached", &self.cache.len())
            .field("prefetcher", &self.prefetcher)
            .finish_non_exhaustive()
    }
}
