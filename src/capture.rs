//! Transcript gate for the speech capture side
//!
//! Capture delivers finalized transcripts; the gate turns them into queries,
//! dropping blanks and anything arriving within the debounce interval of the
//! last accepted transcript.

use std::time::{Duration, Instant};

/// Default minimum time between accepted transcripts
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Debounces finalized transcripts
#[derive(Debug)]
pub struct TranscriptGate {
    debounce: Duration,
    last_accepted: Option<Instant>,
}

impl Default for TranscriptGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl TranscriptGate {
    /// Create a gate with the given debounce interval
    #[must_use]
    pub const fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_accepted: None,
        }
    }

    /// Accept a transcript now
    ///
    /// Returns the trimmed query, or `None` if it was blank or debounced.
    pub fn accept(&mut self, transcript: &str) -> Option<String> {
        self.accept_at(transcript, Instant::now())
    }

    /// Accept a transcript as of `now`
    pub fn accept_at(&mut self, transcript: &str, now: Instant) -> Option<String> {
        let query = transcript.trim();
        if query.is_empty() {
            return None;
        }

        if let Some(last) = self.last_accepted {
            let since = now.saturating_duration_since(last);
            if since < self.debounce {
                tracing::debug!(since_ms = since.as_millis(), "transcript debounced");
                return None;
            }
        }

        self.last_accepted = Some(now);
        Some(query.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_first_transcript() {
        let mut gate = TranscriptGate::default();
        assert_eq!(gate.accept("  what time is it \n").as_deref(), Some("what time is it"));
    }

    #[test]
    fn drops_blank_transcripts() {
        let mut gate = TranscriptGate::default();
        assert!(gate.accept("   ").is_none());
        assert!(gate.accept("").is_none());
    }

    #[test]
    fn debounces_rapid_transcripts() {
        let mut gate = TranscriptGate::new(Duration::from_secs(1));
        let start = Instant::now();

        assert!(gate.accept_at("one", start).is_some());
        assert!(gate.accept_at("two", start + Duration::from_millis(400)).is_none());
        assert!(gate.accept_at("three", start + Duration::from_millis(1000)).is_some());
    }

    #[test]
    fn blank_does_not_reset_window() {
        let mut gate = TranscriptGate::new(Duration::from_secs(1));
        let start = Instant::now();

        assert!(gate.accept_at("one", start).is_some());
        assert!(gate.accept_at(" ", start + Duration::from_millis(900)).is_none());
        assert!(gate.accept_at("two", start + Duration::from_millis(1100)).is_some());
    }
}
