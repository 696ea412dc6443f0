//! PipelineController - the session state machine.
//!
//! # Architecture
//!
//! The controller handle is a thin front for an actor task that exclusively
//! owns the [`Session`], the [`TranscriptAssembler`] and the
//! [`AudioPlaybackQueue`]. Three inputs feed the actor:
//!
//! - commands from handles (`start`, `cancel`, queries)
//! - [`ConnectionEvent`]s from the connection reactor
//! - playback completions from the sink task
//!
//! Each input has one dispatch function (`on_command`,
//! `on_connection_event`, `on_playback_done`). Everything asynchronous carries
//! the [`SessionId`] it was scheduled for and is dropped if that is no
//! longer current.
//!
//! Cancellation is immediate: `cancel()` trips the session's
//! [`CancellationToken`] before the actor even sees the command, and the
//! actor checks the token before dispatching any connection event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use murmurconf::{BackendConfig, MurmurConfig};
use murmurproto::{ConnectionState, InboundFrame};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionManager};
use crate::error::{ConnectError, PipelineError, PlaybackError};
use crate::heartbeat::HeartbeatPolicy;
use crate::playback::{AudioPlaybackQueue, AudioSegment, AudioSink, EnqueueOutcome, PlaybackAction};
use crate::session::{PipelineState, Session, SessionId, SessionParams};
use crate::transcript::TranscriptAssembler;
use crate::transport::Connector;
use crate::ws::WsConnector;

const COMMAND_CAPACITY: usize = 32;
const CONNECTION_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 1024;

/// Settings the controller copies into every session.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub backend: BackendConfig,
    pub heartbeat: HeartbeatPolicy,
    pub first_sequence: u64,
    pub max_gap_wait: Duration,
}

impl From<&MurmurConfig> for PipelineConfig {
    fn from(config: &MurmurConfig) -> Self {
        Self {
            backend: config.backend.clone(),
            heartbeat: HeartbeatPolicy::from(&config.heartbeat),
            first_sequence: config.playback.first_sequence,
            max_gap_wait: config.playback.max_gap_wait(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&MurmurConfig::default())
    }
}

/// Broadcast to subscribers. Every event names its session.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged {
        session: SessionId,
        state: PipelineState,
    },
    ConnectionChanged {
        session: SessionId,
        state: ConnectionState,
    },
    /// `text` is the whole transcript so far, `token` the delta.
    TranscriptUpdated {
        session: SessionId,
        token: String,
        text: String,
    },
    AudioSegmentReady {
        session: SessionId,
        segment: AudioSegment,
    },
    /// `segment.played` is false when the sink reported `error`.
    AudioSegmentPlayed {
        session: SessionId,
        segment: AudioSegment,
        error: Option<String>,
    },
    /// The connection came back under a new session id. Transcript and
    /// audio start over.
    Reconnected {
        previous: SessionId,
        session: SessionId,
    },
    Error {
        session: SessionId,
        error: PipelineError,
    },
}

impl PipelineEvent {
    pub fn session(&self) -> SessionId {
        match self {
            PipelineEvent::StateChanged { session, .. }
            | PipelineEvent::ConnectionChanged { session, .. }
            | PipelineEvent::TranscriptUpdated { session, .. }
            | PipelineEvent::AudioSegmentReady { session, .. }
            | PipelineEvent::AudioSegmentPlayed { session, .. }
            | PipelineEvent::Reconnected { session, .. }
            | PipelineEvent::Error { session, .. } => *session,
        }
    }
}

/// Point-in-time view published after every actor step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineStatus {
    pub session: Option<SessionId>,
    pub state: PipelineState,
    pub connection: ConnectionState,
    pub audio_pending: usize,
    pub audio_playing: bool,
}

impl PipelineStatus {
    /// Terminal, and no audio left to play.
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal() && self.audio_pending == 0 && !self.audio_playing
    }
}

enum Command {
    Start {
        params: SessionParams,
        reply: oneshot::Sender<Result<SessionId, PipelineError>>,
    },
    Cancel {
        reply: oneshot::Sender<PipelineState>,
    },
    StopAudio {
        reply: oneshot::Sender<usize>,
    },
    Transcript {
        reply: oneshot::Sender<String>,
    },
    Health {
        reply: oneshot::Sender<serde_json::Value>,
    },
}

struct PlaybackDone {
    session: SessionId,
    segment: AudioSegment,
    result: Result<(), PlaybackError>,
}

/// Handle to the pipeline actor.
///
/// Dropping the handle stops the actor, closing any open connection.
pub struct PipelineController {
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<PipelineEvent>,
    status: watch::Receiver<PipelineStatus>,
    cancel_slot: Arc<Mutex<Option<CancellationToken>>>,
    task: JoinHandle<()>,
}

impl PipelineController {
    /// Spawn the actor. Must be called inside a tokio runtime.
    pub fn new(connector: Arc<dyn Connector>, sink: Arc<dyn AudioSink>, config: PipelineConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (conn_tx, conn_rx) = mpsc::channel(CONNECTION_CAPACITY);
        let (playback_tx, playback_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status_tx, status) = watch::channel(PipelineStatus::default());
        let cancel_slot = Arc::new(Mutex::new(None));
        let queue = AudioPlaybackQueue::new(config.first_sequence, config.max_gap_wait);

        let actor = PipelineActor {
            manager: ConnectionManager::new(connector, config.backend.clone(), config.heartbeat.clone()),
            config,
            sink,
            session: None,
            cancel_token: None,
            cancel_slot: Arc::clone(&cancel_slot),
            connection: None,
            connection_state: ConnectionState::Idle,
            transcript: TranscriptAssembler::new(),
            queue,
            playback_task: None,
            gap_deadline: None,
            events: events.clone(),
            status: status_tx,
            conn_tx,
            playback_tx,
        };
        let task = tokio::spawn(actor.run(cmd_rx, conn_rx, playback_rx));

        Self {
            cmd_tx,
            events,
            status,
            cancel_slot,
            task,
        }
    }

    /// WebSocket-backed controller built from the loaded config.
    pub fn from_config(config: &MurmurConfig, sink: Arc<dyn AudioSink>) -> Self {
        Self::new(Arc::new(WsConnector), sink, PipelineConfig::from(config))
    }

    /// Begin a new session. Fails with [`PipelineError::Busy`] while another
    /// session is Connecting or Streaming.
    pub async fn start(&self, params: SessionParams) -> Result<SessionId, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { params, reply }).await?;
        rx.await.map_err(|_| PipelineError::ActorGone)?
    }

    /// Stop the current session, close the connection and drain audio.
    /// Idempotent, and a no-op once the session is terminal; returns the
    /// resulting state.
    pub async fn cancel(&self) -> Result<PipelineState, PipelineError> {
        if let Ok(slot) = self.cancel_slot.lock() {
            if let Some(token) = slot.as_ref() {
                token.cancel();
            }
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { reply }).await?;
        rx.await.map_err(|_| PipelineError::ActorGone)
    }

    /// Silence audio still queued from a finished session. Returns how many
    /// segments were dropped. Does not touch the session state.
    pub async fn stop_audio(&self) -> Result<usize, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StopAudio { reply }).await?;
        rx.await.map_err(|_| PipelineError::ActorGone)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        self.status.borrow().state.clone()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.status.borrow().session
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }

    pub async fn transcript(&self) -> Result<String, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Transcript { reply }).await?;
        rx.await.map_err(|_| PipelineError::ActorGone)
    }

    /// Connection health plus playback counters, as JSON.
    pub async fn health(&self) -> Result<serde_json::Value, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Health { reply }).await?;
        rx.await.map_err(|_| PipelineError::ActorGone)
    }

    /// Wait until the session is terminal and its audio has finished.
    pub async fn wait_settled(&self) -> PipelineStatus {
        let mut rx = self.status.clone();
        let settled = match rx.wait_for(PipelineStatus::is_settled).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        settled
    }

    async fn send(&self, cmd: Command) -> Result<(), PipelineError> {
        self.cmd_tx.send(cmd).await.map_err(|_| PipelineError::ActorGone)
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct PipelineActor {
    config: PipelineConfig,
    manager: ConnectionManager,
    sink: Arc<dyn AudioSink>,
    session: Option<Session>,
    cancel_token: Option<CancellationToken>,
    cancel_slot: Arc<Mutex<Option<CancellationToken>>>,
    connection: Option<ConnectionHandle>,
    connection_state: ConnectionState,
    transcript: TranscriptAssembler,
    queue: AudioPlaybackQueue,
    playback_task: Option<JoinHandle<()>>,
    gap_deadline: Option<Instant>,
    events: broadcast::Sender<PipelineEvent>,
    status: watch::Sender<PipelineStatus>,
    conn_tx: mpsc::Sender<ConnectionEvent>,
    playback_tx: mpsc::Sender<PlaybackDone>,
}

impl PipelineActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut conn_rx: mpsc::Receiver<ConnectionEvent>,
        mut playback_rx: mpsc::Receiver<PlaybackDone>,
    ) {
        debug!("controller: actor started");

        loop {
            let gap = self.gap_deadline;

            tokio::select! {
                // Commands first so cancel() is never stuck behind a frame backlog
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.on_command(cmd).await,
                        None => break,
                    }
                }

                Some(event) = conn_rx.recv() => self.on_connection_event(event).await,

                Some(done) = playback_rx.recv() => self.on_playback_done(done),

                _ = tokio::time::sleep_until(gap.unwrap_or_else(Instant::now)), if gap.is_some() => {
                    self.gap_deadline = None;
                    self.pump_playback();
                }
            }

            self.publish_status();
        }

        self.teardown().await;
        debug!("controller: actor exiting");
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { params, reply } => {
                let result = self.start(params).await;
                self.publish_status();
                let _ = reply.send(result);
            }
            Command::Cancel { reply } => {
                let state = self.cancel().await;
                self.publish_status();
                let _ = reply.send(state);
            }
            Command::StopAudio { reply } => {
                let dropped = self.stop_audio();
                self.publish_status();
                let _ = reply.send(dropped);
            }
            Command::Transcript { reply } => {
                let _ = reply.send(self.transcript.text().to_string());
            }
            Command::Health { reply } => {
                let _ = reply.send(self.health_summary().await);
            }
        }
    }

    async fn start(&mut self, params: SessionParams) -> Result<SessionId, PipelineError> {
        if let Some(current) = &self.session {
            if current.state.is_active() {
                warn!(
                    "controller: start rejected, session {} is {}",
                    current.id, current.state
                );
                return Err(PipelineError::Busy(current.id.to_string()));
            }
        }

        // Audio left over from a Completed session stops here
        self.teardown().await;
        self.queue.reset(self.config.first_sequence);
        self.transcript.reset();

        let session = Session::new(params);
        let id = session.id;
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.cancel_slot.lock() {
            *slot = Some(token.clone());
        }

        self.connection = Some(self.manager.connect(
            id,
            &session.params,
            token.clone(),
            self.conn_tx.clone(),
        ));
        self.cancel_token = Some(token);
        self.connection_state = ConnectionState::Idle;
        self.session = Some(session);

        info!("controller: session {} started", id);
        self.emit(PipelineEvent::StateChanged {
            session: id,
            state: PipelineState::Connecting,
        });
        Ok(id)
    }

    async fn cancel(&mut self) -> PipelineState {
        let Some(session) = &self.session else {
            return PipelineState::Idle;
        };
        let id = session.id;

        if session.state.is_active() {
            self.teardown().await;
            let dropped = self.queue.drain();
            info!(
                "controller: session {} cancelled, dropped {} audio segment(s)",
                id, dropped
            );
            self.set_state(PipelineState::Cancelled);
        } else {
            trace!("controller: cancel on terminal session {} ignored", id);
        }

        self.current_state()
    }

    fn stop_audio(&mut self) -> usize {
        self.stop_playback();
        let dropped = self.queue.drain();
        if dropped > 0 {
            debug!("controller: stopped audio, dropped {} segment(s)", dropped);
        }
        dropped
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        let Some(current) = self.current_id() else {
            return;
        };
        if event.session() != current {
            trace!("controller: discarding event for stale session {}", event.session());
            return;
        }
        if self.cancel_token.as_ref().is_some_and(|t| t.is_cancelled()) {
            trace!("controller: discarding event after cancel");
            return;
        }

        let terminal = self.current_state().is_terminal();
        match event {
            ConnectionEvent::State { session, state } => {
                self.connection_state = state.clone();
                self.emit(PipelineEvent::ConnectionChanged { session, state: state.clone() });
                if state == ConnectionState::Streaming && self.current_state() == PipelineState::Connecting {
                    self.set_state(PipelineState::Streaming);
                }
            }
            _ if terminal => {
                trace!("controller: session {} is terminal, ignoring event", current);
            }
            ConnectionEvent::Handshake { result, .. } => self.on_connect_result(result).await,
            ConnectionEvent::Frame { frame, .. } => self.on_frame(frame).await,
            ConnectionEvent::Reconnected { previous, session } => self.on_reconnected(previous, session),
            ConnectionEvent::Lost { error, .. } => self.fail(error).await,
        }
    }

    async fn on_connect_result(&mut self, result: Result<(), ConnectError>) {
        match result {
            Ok(()) => debug!("controller: handshake complete"),
            Err(e) => self.fail(PipelineError::from(e)).await,
        }
    }

    async fn on_frame(&mut self, frame: InboundFrame) {
        let Some(session) = self.current_id() else {
            return;
        };

        match frame {
            InboundFrame::TextToken { text, .. } => {
                let full = self.transcript.append(&text).to_string();
                self.emit(PipelineEvent::TranscriptUpdated {
                    session,
                    token: text,
                    text: full,
                });
            }
            InboundFrame::AudioChunk { seq, payload } => {
                let segment = AudioSegment::new(seq, payload);
                if self.queue.enqueue(segment.clone()) == EnqueueOutcome::Accepted {
                    self.emit(PipelineEvent::AudioSegmentReady { session, segment });
                    self.pump_playback();
                }
            }
            InboundFrame::StreamEnd => {
                info!(
                    "controller: session {} completed ({} tokens, {} audio queued)",
                    session,
                    self.transcript.len(),
                    self.queue.pending_len()
                );
                self.set_state(PipelineState::Completed);
            }
            InboundFrame::ErrorNotice { message } => {
                self.fail(PipelineError::ErrorNotice(message)).await;
            }
            InboundFrame::ControlPing => {}
        }
    }

    fn on_reconnected(&mut self, previous: SessionId, session: SessionId) {
        if let Some(old) = self.session.take() {
            self.session = Some(old.successor(session));
        }
        self.transcript.reset();
        self.stop_playback();
        self.queue.reset(self.config.first_sequence);
        info!("controller: session {} continues as {}", previous, session);
        self.emit(PipelineEvent::Reconnected { previous, session });
    }

    fn on_playback_done(&mut self, done: PlaybackDone) {
        let PlaybackDone {
            session,
            mut segment,
            result,
        } = done;
        if self.current_id() != Some(session) {
            trace!("controller: discarding playback result for stale session");
            return;
        }
        let error = result.as_ref().err().map(|e| e.to_string());
        if self.queue.complete(segment.seq, result) {
            self.playback_task = None;
            segment.played = error.is_none();
            self.emit(PipelineEvent::AudioSegmentPlayed {
                session,
                segment,
                error,
            });
            self.pump_playback();
        }
    }

    fn pump_playback(&mut self) {
        let Some(session) = self.current_id() else {
            return;
        };

        match self.queue.poll(Instant::now()) {
            PlaybackAction::Play(segment) => {
                self.gap_deadline = None;
                let sink = Arc::clone(&self.sink);
                let done = self.playback_tx.clone();
                self.playback_task = Some(tokio::spawn(async move {
                    let result = sink.play(&segment).await;
                    let _ = done
                        .send(PlaybackDone {
                            session,
                            segment,
                            result,
                        })
                        .await;
                }));
            }
            PlaybackAction::Wait(deadline) => self.gap_deadline = Some(deadline),
            PlaybackAction::Busy | PlaybackAction::Idle => self.gap_deadline = None,
        }
    }

    async fn fail(&mut self, error: PipelineError) {
        let Some(session) = self.current_id() else {
            return;
        };
        warn!("controller: session {} failed: {}", session, error);
        self.teardown().await;
        self.queue.drain();
        self.set_state(PipelineState::Failed(error.to_string()));
        self.emit(PipelineEvent::Error { session, error });
    }

    /// Close the connection and stop rendering. Leaves queue contents alone.
    async fn teardown(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.connection.take() {
            handle.disconnect().await;
        }
        self.stop_playback();
    }

    fn stop_playback(&mut self) {
        if let Some(task) = self.playback_task.take() {
            task.abort();
        }
        self.gap_deadline = None;
    }

    async fn health_summary(&self) -> serde_json::Value {
        let connection = match &self.connection {
            Some(handle) => handle.health().health_summary().await,
            None => serde_json::json!({ "state": self.connection_state.as_str() }),
        };
        serde_json::json!({
            "session": self.current_id().map(|s| s.to_string()),
            "state": self.current_state().label(),
            "connection": connection,
            "transcript_tokens": self.transcript.len(),
            "playback": self.queue.stats(),
        })
    }

    fn set_state(&mut self, state: PipelineState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state == state {
            return;
        }
        debug!("controller: {} -> {}", session.state, state);
        session.state = state.clone();
        let id = session.id;
        self.emit(PipelineEvent::StateChanged { session: id, state });
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn current_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    fn current_state(&self) -> PipelineState {
        self.session
            .as_ref()
            .map(|s| s.state.clone())
            .unwrap_or_default()
    }

    fn publish_status(&self) {
        let next = PipelineStatus {
            session: self.current_id(),
            state: self.current_state(),
            connection: self.connection_state.clone(),
            audio_pending: self.queue.pending_len(),
            audio_playing: self.queue.is_playing(),
        };
        self.status.send_if_modified(move |current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
