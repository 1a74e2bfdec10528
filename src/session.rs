//! Session controller
//!
//! One controller per process. It owns the sequencer and the event channel,
//! advances the epoch on every query and keeps at most one push connection
//! open. Run it directly with [`SessionController::play_query`] or as a task
//! with [`SessionController::spawn`] and drive it through a [`SessionHandle`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::events::{self, EventReceiver, EventSender, SessionEvent};
use crate::feedback::{Feedback, Status};
use crate::playback::{ChunkDecoder, Epoch, EpochClock, OutputSink, Sequencer, SequencerState};
use crate::stream::{PushTransport, run_ingest};
use crate::{Error, Result};

/// Queued commands before senders wait
const COMMAND_CAPACITY: usize = 16;

/// Requests for a running session task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start a new query, cancelling the current one
    Query(String),
    /// Halt playback and close the connection
    Stop,
    /// Stop and end the session task
    Shutdown,
}

/// Owns the playback core for the lifetime of the process
pub struct SessionController {
    transport: Arc<dyn PushTransport>,
    sequencer: Sequencer,
    clock: EpochClock,
    events_tx: EventSender,
    events_rx: EventReceiver,
    ingest: Option<JoinHandle<()>>,
    failure: Option<TransportError>,
    feedback: Feedback,
}

impl SessionController {
    /// Create a controller
    #[must_use]
    pub fn new(
        transport: Arc<dyn PushTransport>,
        decoder: Arc<dyn ChunkDecoder>,
        sink: Box<dyn OutputSink>,
        lookahead: usize,
        feedback: Feedback,
    ) -> Self {
        let (events_tx, events_rx) = events::channel();
        let clock = EpochClock::new();
        let sequencer = Sequencer::new(
            decoder,
            sink,
            lookahead,
            clock.clone(),
            events_tx.clone(),
            feedback.clone(),
        );

        Self {
            transport,
            sequencer,
            clock,
            events_tx,
            events_rx,
            ingest: None,
            failure: None,
            feedback,
        }
    }

    /// Sequencer state
    #[must_use]
    pub fn state(&self) -> SequencerState {
        self.sequencer.state()
    }

    /// Live epoch
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.clock.current()
    }

    /// The sequencer, for inspection
    #[must_use]
    pub const fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Status publisher
    #[must_use]
    pub const fn feedback(&self) -> &Feedback {
        &self.feedback
    }

    /// Whether a push connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.ingest.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Play a short silent buffer to warm the output device
    pub fn prime_output(&mut self) {
        self.sequencer.prime_output();
    }

    /// Start a new query, cancelling everything from the previous one
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyQuery`] if `text` is blank
    pub fn start_query(&mut self, text: &str) -> Result<Epoch> {
        let query = text.trim();
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }

        self.close_connection();
        let epoch = self.clock.advance();
        self.sequencer.begin(epoch);
        self.failure = None;

        tracing::info!(epoch = %epoch, query, "starting query");
        self.feedback.emit(Status::Requesting {
            query: query.to_string(),
        });

        self.ingest = Some(tokio::spawn(run_ingest(
            Arc::clone(&self.transport),
            query.to_string(),
            epoch,
            self.events_tx.clone(),
            self.feedback.clone(),
        )));
        Ok(epoch)
    }

    /// Halt output, close the connection and reset state
    ///
    /// The epoch is left as is.
    pub fn stop(&mut self) {
        self.close_connection();
        self.sequencer.stop();
    }

    /// Apply one event from the core
    ///
    /// Returns `false` if the event was stale and discarded.
    pub fn handle_event(&mut self, event: SessionEvent) -> bool {
        let failure = match &event {
            SessionEvent::TransportFailed { epoch, error } if *epoch == self.sequencer.epoch() => {
                Some(error.clone())
            }
            _ => None,
        };

        let applied = self.sequencer.handle(event);
        if failure.is_some() {
            self.failure = failure;
        }

        if applied && self.sequencer.is_stopped() {
            self.ingest = None;
        }
        applied
    }

    /// Wait for the next core event
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Run one query until its playback ends
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyQuery`] for a blank query, or
    /// [`Error::Transport`] if the push connection failed (whatever had
    /// already arrived is still played)
    pub async fn play_query(&mut self, text: &str) -> Result<()> {
        let epoch = self.start_query(text)?;

        while !self.sequencer.is_stopped() {
            let Some(event) = self.next_event().await else {
                break;
            };
            self.handle_event(event);
        }

        match self.failure.take() {
            Some(error) if self.clock.is_current(epoch) => Err(Error::Transport(error)),
            _ => Ok(()),
        }
    }

    /// Spawn the controller as a task
    #[must_use]
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (SessionHandle { tx }, task)
    }

    /// Process commands and core events until shutdown
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!("session running");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Query(text)) => {
                        if let Err(e) = self.start_query(&text) {
                            tracing::warn!(error = %e, "query rejected");
                        }
                    }
                    Some(Command::Stop) => self.stop(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }
            }
        }

        self.stop();
        tracing::info!("session closed");
    }

    fn close_connection(&mut self) {
        if let Some(task) = self.ingest.take() {
            if !task.is_finished() {
                tracing::debug!("closing push connection");
            }
            task.abort();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close_connection();
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("epoch", &self.clock.current())
            .field("sequencer", &self.sequencer)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Cloneable handle to a spawned session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Start a new query
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session task has ended
    pub async fn query(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Query(text.into())).await
    }

    /// Stop playback
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session task has ended
    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    /// End the session task
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session task has already ended
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::SessionClosed)
    }
}
