//! ConnectionManager - channel lifecycle for one session lineage.
//!
//! # Architecture
//!
//! `connect()` spawns a reactor task that owns the channel and the heartbeat
//! timers. Everything it learns flows back to the controller as
//! [`ConnectionEvent`]s over an mpsc channel, each tagged with the
//! [`SessionId`] it belongs to.
//!
//! ```text
//!            ┌──────────── reactor task ────────────┐
//! Connector ─▶ open ─▶ send {prompt,json} ─▶ stream │──▶ ConnectionEvent
//!            │   ▲                            │     │
//!            │   └──── one reconnect ◀── Degraded   │
//!            └──────────────────────────────────────┘
//! ```
//!
//! The heartbeat timer lives inside the reactor, so every exit path (normal
//! end, error, `disconnect()`, or dropping the handle) stops it.

use std::sync::Arc;
use std::time::Duration;

use murmurconf::BackendConfig;
use murmurproto::{
    ConnectionState, InboundFrame, MessageDecoder, OutboundMessage, OutputMode, RawFrame,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectError, PipelineError};
use crate::heartbeat::{AckWatchdog, ConnectionHealth, HeartbeatPolicy};
use crate::session::{SessionId, SessionParams};
use crate::transport::{Channel, ChannelEvent, ConnectRequest, Connector};

/// Time allowed for a close handshake before the socket is just dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Everything the reactor reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    State {
        session: SessionId,
        state: ConnectionState,
    },
    /// Outcome of the initial handshake.
    Handshake {
        session: SessionId,
        result: Result<(), ConnectError>,
    },
    /// A decoded data or terminal frame. Pings never surface here.
    Frame {
        session: SessionId,
        frame: InboundFrame,
    },
    /// Reconnect succeeded under a new identity.
    Reconnected {
        previous: SessionId,
        session: SessionId,
    },
    /// The connection is gone for good.
    Lost {
        session: SessionId,
        error: PipelineError,
    },
}

impl ConnectionEvent {
    pub fn session(&self) -> SessionId {
        match self {
            ConnectionEvent::State { session, .. }
            | ConnectionEvent::Handshake { session, .. }
            | ConnectionEvent::Frame { session, .. }
            | ConnectionEvent::Lost { session, .. } => *session,
            ConnectionEvent::Reconnected { previous, .. } => *previous,
        }
    }
}

/// Opens connections. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    backend: BackendConfig,
    policy: HeartbeatPolicy,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, backend: BackendConfig, policy: HeartbeatPolicy) -> Self {
        Self {
            connector,
            backend,
            policy,
        }
    }

    pub fn policy(&self) -> &HeartbeatPolicy {
        &self.policy
    }

    /// Spawn the reactor for `session`. Handshake results arrive as events.
    ///
    /// `shutdown` is owned by the caller; tripping it stops the reactor at
    /// its next await point.
    pub fn connect(
        &self,
        session: SessionId,
        params: &SessionParams,
        shutdown: CancellationToken,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> ConnectionHandle {
        let health = Arc::new(ConnectionHealth::new());
        let reactor = Reactor {
            name: format!("session {}", short_id(session)),
            connector: Arc::clone(&self.connector),
            request: ConnectRequest::from_config(&self.backend, params.auth_token.clone()),
            initial: OutboundMessage::Generate(params.request()).to_json(),
            decoder: MessageDecoder::new(params.mode),
            policy: self.policy.clone(),
            health: Arc::clone(&health),
            events,
            shutdown: shutdown.clone(),
        };

        let task = tokio::spawn(reactor.run(session));

        ConnectionHandle {
            session,
            shutdown,
            health,
            task: Some(task),
        }
    }
}

/// Owning handle for a reactor task.
///
/// Dropping it aborts the task.
pub struct ConnectionHandle {
    session: SessionId,
    shutdown: CancellationToken,
    health: Arc<ConnectionHealth>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Session the connection was opened for (before any reconnect).
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn health(&self) -> Arc<ConnectionHealth> {
        Arc::clone(&self.health)
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Close the channel and wait for the reactor to exit.
    pub async fn disconnect(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("connection: reactor task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn short_id(session: SessionId) -> String {
    session.to_string().chars().take(8).collect()
}

/// Why a stream stopped.
enum StreamExit {
    /// Shutdown token tripped or controller gone.
    Shutdown,
    /// StreamEnd or ErrorNotice delivered.
    Finished,
    /// Heartbeat went silent.
    Silent(String),
    /// Socket failed or closed without a stream end.
    Broken(String),
}

struct Reactor {
    name: String,
    connector: Arc<dyn Connector>,
    request: ConnectRequest,
    initial: String,
    decoder: MessageDecoder,
    policy: HeartbeatPolicy,
    health: Arc<ConnectionHealth>,
    events: mpsc::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
}

impl Reactor {
    async fn run(self, mut session: SessionId) {
        debug!("{}: reactor started", self.name);

        self.set_state(session, ConnectionState::Connecting).await;
        let mut channel = match self.open().await {
            Ok(Some(ch)) => ch,
            Ok(None) => {
                debug!("{}: shut down during handshake", self.name);
                return;
            }
            Err(e) => {
                warn!("{}: connect failed: {}", self.name, e);
                self.emit(ConnectionEvent::Handshake {
                    session,
                    result: Err(e),
                })
                .await;
                self.set_state(session, ConnectionState::Closed).await;
                return;
            }
        };

        self.set_state(session, ConnectionState::Authenticated).await;
        self.emit(ConnectionEvent::Handshake {
            session,
            result: Ok(()),
        })
        .await;
        self.set_state(session, ConnectionState::Streaming).await;
        info!("{}: streaming from {}", self.name, self.request.redacted_url());

        let mut reconnects_used = 0u32;

        loop {
            let exit = self.stream(session, channel.as_mut()).await;

            let (reason, silent) = match exit {
                StreamExit::Shutdown => {
                    close_quietly(channel.as_mut()).await;
                    debug!("{}: reactor shut down", self.name);
                    return;
                }
                StreamExit::Finished => {
                    close_quietly(channel.as_mut()).await;
                    self.set_state(session, ConnectionState::Closed).await;
                    debug!("{}: stream finished", self.name);
                    return;
                }
                StreamExit::Silent(reason) => (reason, true),
                StreamExit::Broken(reason) => (reason, false),
            };

            warn!("{}: degraded: {}", self.name, reason);
            self.set_state(session, ConnectionState::Degraded(reason.clone()))
                .await;
            drop(channel);

            if reconnects_used >= self.policy.max_reconnects {
                self.give_up(session, silent, reason).await;
                return;
            }

            reconnects_used += 1;
            self.health.record_reconnect();
            let delay = self.policy.backoff_for_attempt(reconnects_used);
            info!(
                "{}: reconnecting in {:?} (attempt {}/{})",
                self.name, delay, reconnects_used, self.policy.max_reconnects
            );

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            channel = match self.open().await {
                Ok(Some(ch)) => ch,
                Ok(None) => return,
                Err(e) => {
                    let reason = format!("{}; reconnect failed: {}", reason, e);
                    if e.is_auth() {
                        self.lose(session, PipelineError::from(e)).await;
                    } else {
                        self.give_up(session, silent, reason).await;
                    }
                    return;
                }
            };

            let previous = session;
            session = SessionId::new();
            info!(
                "{}: reconnected as session {}",
                self.name,
                short_id(session)
            );
            self.emit(ConnectionEvent::Reconnected { previous, session })
                .await;
            self.set_state(session, ConnectionState::Streaming).await;
        }
    }

    /// Handshake plus initial request. `Ok(None)` means shutdown won the race.
    async fn open(&self) -> Result<Option<Box<dyn Channel>>, ConnectError> {
        let opened = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(None),
            r = self.connector.open(&self.request) => r,
        };
        let mut channel = opened?;

        trace!("{}: sending initial request", self.name);
        channel.send_text(self.initial.clone()).await?;
        Ok(Some(channel))
    }

    /// Pump one open channel until it ends, breaks, or goes silent.
    async fn stream(&self, session: SessionId, channel: &mut dyn Channel) -> StreamExit {
        let start = Instant::now();
        let mut watchdog = AckWatchdog::new(start, self.policy.ack_timeout);
        let mut ticker = tokio::time::interval_at(start + self.policy.interval, self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => return StreamExit::Shutdown,

                _ = tokio::time::sleep_until(watchdog.deadline()) => {
                    return StreamExit::Silent(format!(
                        "no heartbeat ack for {:?}",
                        watchdog.silence(Instant::now())
                    ));
                }

                received = channel.recv() => {
                    match received {
                        Ok(ChannelEvent::Frame(raw)) => {
                            if let Some(exit) = self.on_raw_frame(session, raw, &mut watchdog).await {
                                return exit;
                            }
                        }
                        Ok(ChannelEvent::Pong) => {
                            trace!("{}: pong", self.name);
                            watchdog.ack(Instant::now());
                            self.health.record_ack().await;
                        }
                        Ok(ChannelEvent::Closed { normal, reason }) => {
                            if normal && self.decoder.mode() == OutputMode::PlainText {
                                debug!("{}: plain-text stream closed by server", self.name);
                                return match self.forward(session, InboundFrame::StreamEnd).await {
                                    true => StreamExit::Finished,
                                    false => StreamExit::Shutdown,
                                };
                            }
                            let reason = reason.unwrap_or_else(|| "no reason".to_string());
                            return StreamExit::Broken(format!("closed before stream end: {}", reason));
                        }
                        Err(e) => return StreamExit::Broken(e.message().to_string()),
                    }
                }

                _ = ticker.tick() => {
                    trace!("{}: keepalive", self.name);
                    let sent = match self.decoder.mode() {
                        OutputMode::Json => channel.send_text(OutboundMessage::keepalive().to_json()).await,
                        // Plain-text replies have no envelope for a ping marker
                        OutputMode::PlainText => channel.send_ping().await,
                    };
                    if let Err(e) = sent {
                        return StreamExit::Broken(e.message().to_string());
                    }
                }
            }
        }
    }

    async fn on_raw_frame(
        &self,
        session: SessionId,
        raw: RawFrame,
        watchdog: &mut AckWatchdog,
    ) -> Option<StreamExit> {
        self.health.record_frame();
        let decoded = match self.decoder.decode(&raw) {
            Ok(d) => d,
            Err(e) => {
                let count = self.health.record_decode_error();
                warn!("{}: dropping malformed frame ({} so far): {}", self.name, count, e);
                return None;
            }
        };

        if decoded.resets_heartbeat {
            watchdog.ack(Instant::now());
            self.health.record_ack().await;
        }

        if decoded.frame == InboundFrame::ControlPing {
            trace!("{}: ping ack", self.name);
            return None;
        }

        let terminal = decoded.frame.is_terminal() || decoded.stream_end;
        if !self.forward(session, decoded.frame).await {
            return Some(StreamExit::Shutdown);
        }
        if decoded.stream_end && !self.forward(session, InboundFrame::StreamEnd).await {
            return Some(StreamExit::Shutdown);
        }
        terminal.then_some(StreamExit::Finished)
    }

    async fn forward(&self, session: SessionId, frame: InboundFrame) -> bool {
        self.emit(ConnectionEvent::Frame { session, frame }).await
    }

    async fn give_up(&self, session: SessionId, silent: bool, reason: String) {
        let error = if silent {
            PipelineError::ConnectionLost(reason)
        } else {
            PipelineError::Transport(reason)
        };
        self.lose(session, error).await;
    }

    async fn lose(&self, session: SessionId, error: PipelineError) {
        warn!("{}: giving up: {}", self.name, error);
        self.emit(ConnectionEvent::Lost { session, error }).await;
        self.set_state(session, ConnectionState::Closed).await;
    }

    async fn set_state(&self, session: SessionId, state: ConnectionState) {
        self.health.set_state(state.clone()).await;
        self.emit(ConnectionEvent::State { session, state }).await;
    }

    /// Send an event unless shutdown wins. Returns false if the event was not
    /// delivered.
    async fn emit(&self, event: ConnectionEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }
}

async fn close_quietly(channel: &mut dyn Channel) {
    if tokio::time::timeout(CLOSE_GRACE, channel.close()).await.is_err() {
        debug!("connection: close handshake timed out");
    }
}
