//! Shared test utilities
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use voxline::feedback::Feedback;
use voxline::playback::{
    ChunkDecoder, Epoch, OutputSink, PlayableBuffer, PlaybackCompletion, SequencerState,
};
use voxline::stream::{EventStream, PushTransport};
use voxline::{DecodeError, OutputError, SessionController, TransportError};

/// Sample rate of buffers produced by [`FakeDecoder`]
pub const FAKE_RATE: u32 = 24_000;

// -- transport ---------------------------------------------------------------

/// One step of a scripted push stream
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver an event payload
    Record(String),
    /// Pause before the next step
    Delay(Duration),
    /// Fail the stream
    Fail(TransportError),
    /// Keep the connection open forever
    Hold,
}

/// Audio chunk record whose payload is interpreted by [`FakeDecoder`]
pub fn chunk(index: u32, payload: &str) -> Step {
    Step::Record(
        serde_json::json!({
            "text": format!("sentence {index}"),
            "audio": payload,
            "chunk_index": index,
            "is_final": false,
        })
        .to_string(),
    )
}

/// Final marker record
pub fn final_marker() -> Step {
    Step::Record(r#"{"is_final": true}"#.to_string())
}

/// Progress record without audio
pub fn progress(text: &str) -> Step {
    Step::Record(serde_json::json!({ "text": text, "is_final": false }).to_string())
}

/// Chunks with the given indices, all decodable, followed by a final marker
pub fn ordered(indices: &[u32]) -> Vec<Step> {
    indices
        .iter()
        .map(|&index| chunk(index, "ok"))
        .chain(std::iter::once(final_marker()))
        .collect()
}

/// Push transport that replays a script per query
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` with `steps`
    pub fn script(self, query: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(query.to_string(), steps);
        self
    }

    /// Queries opened so far
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn open(&self, query: &str) -> Result<EventStream, TransportError> {
        self.opened.lock().unwrap().push(query.to_string());

        let steps = self
            .scripts
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                status: 404,
                message: format!("no script for {query:?}"),
            })?;

        let events = stream::iter(steps)
            .then(|step| async move {
                match step {
                    Step::Record(payload) => Some(Ok(payload)),
                    Step::Delay(duration) => {
                        tokio::time::sleep(duration).await;
                        None
                    }
                    Step::Fail(error) => Some(Err(error)),
                    Step::Hold => {
                        std::future::pending::<()>().await;
                        None
                    }
                }
            })
            .filter_map(futures::future::ready);

        Ok(events.boxed())
    }
}

// -- decoder -----------------------------------------------------------------

/// Decoder driven by the payload text
///
/// - `ok`: 10 ms of silence
/// - `slow:<ms>`: same, after blocking for `<ms>`
/// - `bad-slow:<ms>`: malformed, after blocking for `<ms>`
/// - `panic`: panics
/// - anything else: malformed
#[derive(Debug, Default)]
pub struct FakeDecoder {
    calls: AtomicUsize,
}

impl FakeDecoder {
    /// Number of decode calls made
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChunkDecoder for FakeDecoder {
    fn decode(&self, payload: &[u8]) -> Result<PlayableBuffer, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = std::str::from_utf8(payload).map_err(|e| DecodeError::Encoding(e.to_string()))?;

        if let Some(ms) = text.strip_prefix("bad-slow:") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| DecodeError::Malformed(text.to_string()))?;
            std::thread::sleep(Duration::from_millis(ms));
            return Err(DecodeError::Malformed(format!("fake decoder rejects {text:?}")));
        }

        if let Some(ms) = text.strip_prefix("slow:") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| DecodeError::Malformed(text.to_string()))?;
            std::thread::sleep(Duration::from_millis(ms));
            return Ok(silence());
        }

        match text {
            "ok" => Ok(silence()),
            "panic" => panic!("fake decoder blew up"),
            other => Err(DecodeError::Malformed(format!("fake decoder rejects {other:?}"))),
        }
    }
}

fn silence() -> PlayableBuffer {
    PlayableBuffer::new(vec![0.0; 240], FAKE_RATE)
}

// -- sink --------------------------------------------------------------------

/// Shared view of what a [`RecordingSink`] was asked to do
#[derive(Debug, Clone, Default)]
pub struct SinkLog {
    played: Arc<Mutex<Vec<(Epoch, u32)>>>,
    held: Arc<Mutex<Vec<PlaybackCompletion>>>,
    stops: Arc<AtomicUsize>,
}

impl SinkLog {
    /// Indices handed to the sink, in order
    pub fn indices(&self) -> Vec<u32> {
        self.played.lock().unwrap().iter().map(|(_, i)| *i).collect()
    }

    /// Epoch and index of everything handed to the sink
    pub fn played(&self) -> Vec<(Epoch, u32)> {
        self.played.lock().unwrap().clone()
    }

    /// Number of `stop` calls
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Finish whatever a holding sink is playing
    pub fn release(&self) {
        self.held.lock().unwrap().clear();
    }
}

/// Sink that records every buffer
///
/// Completes immediately, or holds each buffer until [`SinkLog::release`].
pub struct RecordingSink {
    log: SinkLog,
    hold: bool,
}

impl RecordingSink {
    /// Sink that finishes each buffer as soon as it starts
    pub fn immediate() -> (Self, SinkLog) {
        let log = SinkLog::default();
        (
            Self {
                log: log.clone(),
                hold: false,
            },
            log,
        )
    }

    /// Sink that plays each buffer until released
    pub fn holding() -> (Self, SinkLog) {
        let log = SinkLog::default();
        (
            Self {
                log: log.clone(),
                hold: true,
            },
            log,
        )
    }
}

impl OutputSink for RecordingSink {
    fn play(
        &mut self,
        _buffer: PlayableBuffer,
        completion: PlaybackCompletion,
    ) -> Result<(), OutputError> {
        self.log
            .played
            .lock()
            .unwrap()
            .push((completion.epoch(), completion.index()));
        if self.hold {
            self.log.held.lock().unwrap().push(completion);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
        self.log.release();
    }
}

// -- session -----------------------------------------------------------------

/// Controller wired to test doubles
pub fn session(
    transport: ScriptedTransport,
    sink: RecordingSink,
    lookahead: usize,
) -> (SessionController, Arc<ScriptedTransport>, Arc<FakeDecoder>) {
    let transport = Arc::new(transport);
    let decoder = Arc::new(FakeDecoder::default());
    let controller = SessionController::new(
        Arc::clone(&transport) as Arc<dyn PushTransport>,
        Arc::clone(&decoder) as Arc<dyn ChunkDecoder>,
        Box::new(sink),
        lookahead,
        Feedback::new(),
    );
    (controller, transport, decoder)
}

/// Apply events until `done` holds
///
/// Panics if it doesn't within a few seconds.
pub async fn pump_until(session: &mut SessionController, done: impl Fn(&SessionController) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done(session) {
        let event = tokio::time::timeout_at(deadline, session.next_event())
            .await
            .expect("condition not reached in time")
            .expect("event channel closed");
        session.handle_event(event);
    }
}

/// Apply events until none arrive for a short while
pub async fn settle(session: &mut SessionController) -> usize {
    let mut applied = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(150), session.next_event()).await
    {
        if session.handle_event(event) {
            applied += 1;
        }
    }
    applied
}

/// Whether the session is in `state`
pub fn in_state(state: SequencerState) -> impl Fn(&SessionController) -> bool {
    move |session| session.state() == state
}
