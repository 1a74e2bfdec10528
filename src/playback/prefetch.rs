//! Decode prefetching
//!
//! Keeps up to `lookahead` chunks at and after the cursor decoding in the
//! background so the next buffer is usually ready before the current one
//! ends. Results come back as [`SessionEvent::DecodeComplete`]; the prefetcher
//! itself never touches the queue or cache.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::decoder::ChunkDecoder;
use super::queue::{DecodedCache, PendingQueue};
use super::types::{Epoch, EpochClock};
use crate::error::DecodeError;
use crate::events::{EventSender, SessionEvent};

/// Default number of chunks decoded ahead of the cursor
pub const DEFAULT_LOOKAHEAD: usize = 3;

/// Schedules background decodes for upcoming chunks
pub struct Prefetcher {
    decoder: Arc<dyn ChunkDecoder>,
    lookahead: usize,
    /// Payload each outstanding decode was issued for
    in_flight: HashMap<u32, Arc<[u8]>>,
    clock: EpochClock,
    events: EventSender,
}

impl Prefetcher {
    /// Create a prefetcher
    #[must_use]
    pub fn new(
        decoder: Arc<dyn ChunkDecoder>,
        lookahead: usize,
        clock: EpochClock,
        events: EventSender,
    ) -> Self {
        Self {
            decoder,
            lookahead: lookahead.max(1),
            in_flight: HashMap::new(),
            clock,
            events,
        }
    }

    /// Lookahead window size
    #[must_use]
    pub const fn lookahead(&self) -> usize {
        self.lookahead
    }

    /// Whether a decode for `index` is outstanding
    #[must_use]
    pub fn is_in_flight(&self, index: u32) -> bool {
        self.in_flight.contains_key(&index)
    }

    /// Number of outstanding decodes
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Issue decodes for queued chunks in `[cursor, cursor + lookahead)`
    ///
    /// Skips chunks already cached, already decoding, or rejected by `skip`.
    /// Returns how many decodes were issued.
    pub fn schedule(
        &mut self,
        epoch: Epoch,
        cursor: u32,
        queue: &PendingQueue,
        cache: &DecodedCache,
        skip: impl Fn(u32) -> bool,
    ) -> usize {
        let window_end = cursor.saturating_add(u32::try_from(self.lookahead).unwrap_or(u32::MAX));
        let mut issued = 0;

        for record in queue.window(cursor, window_end) {
            let index = record.index;
            if cache.contains(index) || self.in_flight.contains_key(&index) || skip(index) {
                continue;
            }
            let Some(payload) = record.payload.clone() else {
                continue;
            };

            self.in_flight.insert(index, Arc::clone(&payload));
            self.spawn_decode(epoch, index, payload);
            issued += 1;
        }

        if issued > 0 {
            tracing::debug!(
                epoch = %epoch,
                cursor,
                issued,
                in_flight = self.in_flight.len(),
                "prefetching chunks"
            );
        }
        issued
    }

    /// Mark a decode as no longer outstanding
    ///
    /// Returns the payload the decode was issued for, so the caller can tell
    /// whether the queued record has been replaced since.
    pub fn complete(&mut self, index: u32) -> Option<Arc<[u8]>> {
        self.in_flight.remove(&index)
    }

    /// Forget all outstanding decodes
    ///
    /// Tasks already running finish on their own; their results carry the
    /// old epoch and are discarded by the session.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    fn spawn_decode(&self, epoch: Epoch, index: u32, payload: Arc<[u8]>) {
        let decoder = Arc::clone(&self.decoder);
        let clock = self.clock.clone();
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            if !clock.is_current(epoch) {
                tracing::trace!(epoch = %epoch, index, "skipping decode for stale epoch");
                return;
            }

            let result = std::panic::catch_unwind(AssertUnwindSafe(|| decoder.decode(&payload)))
                .unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(index, %message, "decoder panicked");
                    Err(DecodeError::Panicked(message))
                });
            let _ = events.send(SessionEvent::DecodeComplete {
                epoch,
                index,
                result,
            });
        });
    }
}

/// Human-readable text of a panic payload
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("lookahead", &self.lookahead)
            .field("in_flight", &self.in_flight.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::events;
    use crate::playback::{ChunkRecord, PlayableBuffer};

    struct EchoDecoder;

    struct PanickingDecoder;

    impl ChunkDecoder for PanickingDecoder {
        fn decode(&self, _payload: &[u8]) -> Result<PlayableBuffer, DecodeError> {
            panic!("corrupt frame table");
        }
    }

    impl ChunkDecoder for EchoDecoder {
        fn decode(&self, payload: &[u8]) -> Result<PlayableBuffer, DecodeError> {
            Ok(PlayableBuffer::new(vec![0.0; payload.len()], 24_000))
        }
    }

    fn queue_with(indices: &[u32]) -> PendingQueue {
        let mut queue = PendingQueue::new();
        for &index in indices {
            queue.insert(ChunkRecord::new(index, vec![1, 2, 3]));
        }
        queue
    }

    fn prefetcher(lookahead: usize) -> (Prefetcher, EpochClock, events::EventReceiver) {
        let (tx, rx) = events::channel();
        let clock = EpochClock::new();
        let prefetcher = Prefetcher::new(Arc::new(EchoDecoder), lookahead, clock.clone(), tx);
        (prefetcher, clock, rx)
    }

    #[tokio::test]
    async fn schedules_only_within_window() {
        let (mut prefetcher, clock, _rx) = prefetcher(3);
        let queue = queue_with(&[0, 1, 2, 3, 4]);

        let issued = prefetcher.schedule(clock.current(), 0, &queue, &DecodedCache::new(), |_| false);

        assert_eq!(issued, 3);
        assert!(prefetcher.is_in_flight(0));
        assert!(prefetcher.is_in_flight(2));
        assert!(!prefetcher.is_in_flight(3));
    }

    #[tokio::test]
    async fn repeated_schedule_issues_no_duplicates() {
        let (mut prefetcher, clock, _rx) = prefetcher(3);
        let queue = queue_with(&[0, 1]);
        let cache = DecodedCache::new();

        assert_eq!(prefetcher.schedule(clock.current(), 0, &queue, &cache, |_| false), 2);
        assert_eq!(prefetcher.schedule(clock.current(), 0, &queue, &cache, |_| false), 0);
        assert_eq!(prefetcher.in_flight(), 2);
    }

    #[tokio::test]
    async fn skips_cached_and_rejected_indices() {
        let (mut prefetcher, clock, _rx) = prefetcher(4);
        let queue = queue_with(&[0, 1, 2, 3]);
        let mut cache = DecodedCache::new();
        cache.insert(1, PlayableBuffer::new(vec![0.0], 24_000));

        let issued = prefetcher.schedule(clock.current(), 0, &queue, &cache, |index| index == 2);

        assert_eq!(issued, 2);
        assert!(prefetcher.is_in_flight(0));
        assert!(prefetcher.is_in_flight(3));
    }

    #[tokio::test]
    async fn never_decodes_below_cursor() {
        let (mut prefetcher, clock, _rx) = prefetcher(3);
        let queue = queue_with(&[0, 1, 5]);

        let issued = prefetcher.schedule(clock.current(), 2, &queue, &DecodedCache::new(), |_| false);

        assert_eq!(issued, 0);
    }

    #[tokio::test]
    async fn reports_results_tagged_with_epoch() {
        let (mut prefetcher, clock, mut rx) = prefetcher(1);
        let epoch = clock.advance();
        let queue = queue_with(&[0]);

        prefetcher.schedule(epoch, 0, &queue, &DecodedCache::new(), |_| false);

        match rx.recv().await.unwrap() {
            SessionEvent::DecodeComplete {
                epoch: reported,
                index,
                result,
            } => {
                assert_eq!(reported, epoch);
                assert_eq!(index, 0);
                assert_eq!(result.unwrap().len(), 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn decoder_panic_is_reported_as_failure() {
        let (tx, mut rx) = events::channel();
        let clock = EpochClock::new();
        let epoch = clock.advance();
        let mut prefetcher = Prefetcher::new(Arc::new(PanickingDecoder), 1, clock, tx);

        prefetcher.schedule(epoch, 0, &queue_with(&[0]), &DecodedCache::new(), |_| false);

        match rx.recv().await.unwrap() {
            SessionEvent::DecodeComplete { index, result, .. } => {
                assert_eq!(index, 0);
                assert_eq!(
                    result.unwrap_err(),
                    DecodeError::Panicked("corrupt frame table".to_string())
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_returns_issued_payload() {
        let (mut prefetcher, clock, _rx) = prefetcher(1);
        let queue = queue_with(&[0]);

        prefetcher.schedule(clock.current(), 0, &queue, &DecodedCache::new(), |_| false);
        let issued = prefetcher.complete(0).expect("decode was in flight");

        let queued = queue.get(0).and_then(|r| r.payload.clone()).unwrap();
        assert!(Arc::ptr_eq(&issued, &queued));
        assert!(prefetcher.complete(0).is_none());
    }

    #[tokio::test]
    async fn stale_epoch_decode_does_no_work() {
        let (mut prefetcher, clock, mut rx) = prefetcher(1);
        let stale = clock.advance();
        clock.advance();

        prefetcher.schedule(stale, 0, &queue_with(&[0]), &DecodedCache::new(), |_| false);
        drop(prefetcher);

        assert!(rx.recv().await.is_none());
    }
}
