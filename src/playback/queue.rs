//! Pending chunk queue and decoded buffer cache

use std::collections::{BTreeMap, HashMap};

use super::types::{ChunkRecord, PlayableBuffer};

/// Records received but not yet played, ordered by index
///
/// Holds at most one record per index. A later record for the same index
/// replaces the earlier one.
#[derive(Debug, Default)]
pub struct PendingQueue {
    records: BTreeMap<u32, ChunkRecord>,
}

impl PendingQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning the one it replaced
    pub fn insert(&mut self, record: ChunkRecord) -> Option<ChunkRecord> {
        self.records.insert(record.index, record)
    }

    /// Look up the record at `index`
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&ChunkRecord> {
        self.records.get(&index)
    }

    /// Whether a record exists at `index`
    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        self.records.contains_key(&index)
    }

    /// Remove and return the record at `index`
    pub fn remove(&mut self, index: u32) -> Option<ChunkRecord> {
        self.records.remove(&index)
    }

    /// Records with `start <= index < end`, in index order
    pub fn window(&self, start: u32, end: u32) -> impl Iterator<Item = &ChunkRecord> {
        self.records.range(start..end).map(|(_, record)| record)
    }

    /// Lowest queued index
    #[must_use]
    pub fn first_index(&self) -> Option<u32> {
        self.records.keys().next().copied()
    }

    /// Drop every record below `index`
    pub fn discard_below(&mut self, index: u32) {
        self.records = self.records.split_off(&index);
    }

    /// Number of queued records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove every record
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Decoded buffers waiting for their turn to play
///
/// Each entry is taken exactly once, at the moment it is handed to the sink.
#[derive(Debug, Default)]
pub struct DecodedCache {
    buffers: HashMap<u32, PlayableBuffer>,
}

impl DecodedCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a buffer unless one is already cached for `index`
    ///
    /// Returns `false` when an existing entry was kept.
    pub fn insert(&mut self, index: u32, buffer: PlayableBuffer) -> bool {
        if self.buffers.contains_key(&index) {
            return false;
        }
        self.buffers.insert(index, buffer);
        true
    }

    /// Whether a buffer is cached for `index`
    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        self.buffers.contains_key(&index)
    }

    /// Remove and return the buffer for `index`
    pub fn take(&mut self, index: u32) -> Option<PlayableBuffer> {
        self.buffers.remove(&index)
    }

    /// Drop every entry below `index`
    pub fn discard_below(&mut self, index: u32) {
        self.buffers.retain(|&cached, _| cached >= index);
    }

    /// Number of cached buffers
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Release every buffer
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u32, payload: &str) -> ChunkRecord {
        ChunkRecord::new(index, payload.as_bytes().to_vec())
    }

    #[test]
    fn queue_keeps_index_order() {
        let mut queue = PendingQueue::new();
        queue.insert(record(2, "c"));
        queue.insert(record(0, "a"));
        queue.insert(record(1, "b"));

        let order: Vec<u32> = queue.window(0, 10).map(|r| r.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(queue.first_index(), Some(0));
    }

    #[test]
    fn queue_duplicate_replaces_earlier() {
        let mut queue = PendingQueue::new();
        queue.insert(record(1, "first"));
        let replaced = queue.insert(record(1, "second"));

        assert_eq!(queue.len(), 1);
        assert_eq!(replaced.and_then(|r| r.payload).as_deref(), Some(&b"first"[..]));
        assert_eq!(
            queue.get(1).and_then(|r| r.payload.clone()).as_deref(),
            Some(&b"second"[..])
        );
    }

    #[test]
    fn queue_window_is_half_open() {
        let mut queue = PendingQueue::new();
        for index in 0..6 {
            queue.insert(record(index, "x"));
        }

        let window: Vec<u32> = queue.window(2, 5).map(|r| r.index).collect();
        assert_eq!(window, vec![2, 3, 4]);
    }

    #[test]
    fn queue_discard_below() {
        let mut queue = PendingQueue::new();
        for index in 0..4 {
            queue.insert(record(index, "x"));
        }
        queue.discard_below(2);

        assert!(!queue.contains(1));
        assert!(queue.contains(2));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn cache_does_not_replace_existing_entry() {
        let mut cache = DecodedCache::new();
        assert!(cache.insert(0, PlayableBuffer::new(vec![0.1], 24_000)));
        assert!(!cache.insert(0, PlayableBuffer::new(vec![0.9], 24_000)));

        let kept = cache.take(0).expect("cached buffer");
        assert_eq!(kept.samples(), &[0.1]);
    }

    #[test]
    fn cache_take_consumes_once() {
        let mut cache = DecodedCache::new();
        cache.insert(3, PlayableBuffer::new(vec![0.0; 4], 24_000));

        assert!(cache.take(3).is_some());
        assert!(cache.take(3).is_none());
        assert!(cache.is_empty());
    }
}
