//! Live connection to one station.
//!
//! ```text
//!                connect() ok
//! Disconnected ──────────────> Connecting ──────────────> Connected
//!      ^                           │ attempts exhausted       │
//!      └───────────────────────────┘                          │
//!      ^      read error / peer closed / displaced / write failure
//!      └──────────────────────────────────────────────────────┘
//! ```
//!
//! A session owns one read task that turns lines into [`LinkEvent`]s. The
//! write half lives behind an async mutex so that commands from the
//! dispatcher, the barrier scheduler and local actions never interleave on
//! the wire.
//!
//! The link never reconnects on its own; the [`LinkRegistry`](crate::LinkRegistry)
//! supervisor calls [`StationLink::connect`] again once the link is
//! `Disconnected`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parklink_core::StationId;
use parklink_core::constants::{
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_RETRY_DELAY_MS,
};
use parklink_protocol::{Command, Message, OutboundFrame, parse_message};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::transport::{AnyConnector, AnyReader, AnyWriter, Connector, FrameReader, FrameWriter, ReadOutcome, Session};
use crate::{Result, TransportError};

/// Capacity of a link's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection behaviour of a link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Open attempts per `connect()` call.
    pub connect_attempts: u32,

    /// Delay between two attempts of the same `connect()` call.
    pub retry_delay: Duration,

    /// How often the registry looks for dropped links.
    pub reconnect_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// What a link reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A session was opened.
    Connected(StationId),

    /// The session ended.
    Disconnected(StationId),

    /// A message addressed to this station arrived.
    Message(StationId, Message),
}

/// Connection snapshot for monitoring.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub station_id: StationId,
    pub state: LinkState,
    pub endpoint: String,

    /// Other end of the current session.
    pub peer: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub uptime: Option<chrono::Duration>,

    /// Sessions opened since the link was created.
    pub sessions: u64,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }
}

#[derive(Debug)]
struct ActiveSession {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    peer: String,
    connected_at: DateTime<Utc>,
}

/// One station's connection: transport, read task and write path.
///
/// # Example
///
/// ```
/// use parklink_core::StationId;
/// use parklink_network::{AnyConnector, LinkConfig, LinkEvent, MockConnector, StationLink};
///
/// #[tokio::main]
/// async fn main() {
///     let station_id = StationId::new(1).unwrap();
///     let (connector, station) = MockConnector::new(station_id);
///     let (link, mut events) =
///         StationLink::new(station_id, AnyConnector::Mock(connector), LinkConfig::default());
///
///     assert!(link.connect().await);
///     assert_eq!(events.recv().await, Some(LinkEvent::Connected(station_id)));
///
///     station.send_line(r#"{"type":"button_press","button":"enter","parking_id":1}"#);
///     assert!(matches!(events.recv().await, Some(LinkEvent::Message(..))));
///
///     link.shutdown().await;
/// }
/// ```
#[derive(Debug)]
pub struct StationLink {
    station_id: StationId,
    config: LinkConfig,
    endpoint: String,

    /// Held for the whole of a `connect()` call.
    connector: tokio::sync::Mutex<AnyConnector>,

    /// Write half of the current session.
    writer: tokio::sync::Mutex<Option<AnyWriter>>,

    state: watch::Sender<LinkState>,
    session: Mutex<Option<ActiveSession>>,
    events: mpsc::Sender<LinkEvent>,

    /// Signalled whenever a session ends.
    lost: Arc<Notify>,
    sessions: AtomicU64,

    /// Set by `shutdown()`, cleared by the next `connect()`.
    closed: AtomicBool,
}

impl StationLink {
    /// Create a disconnected link and the receiver for its events.
    pub fn new(
        station_id: StationId,
        connector: AnyConnector,
        config: LinkConfig,
    ) -> (Arc<Self>, mpsc::Receiver<LinkEvent>) {
        Self::with_lost_signal(station_id, connector, config, Arc::new(Notify::new()))
    }

    pub(crate) fn with_lost_signal(
        station_id: StationId,
        connector: AnyConnector,
        config: LinkConfig,
        lost: Arc<Notify>,
    ) -> (Arc<Self>, mpsc::Receiver<LinkEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(LinkState::Disconnected);

        let link = Arc::new(Self {
            station_id,
            config,
            endpoint: connector.endpoint(),
            connector: tokio::sync::Mutex::new(connector),
            writer: tokio::sync::Mutex::new(None),
            state,
            session: Mutex::new(None),
            events,
            lost,
            sessions: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        (link, events_rx)
    }

    pub fn station_id(&self) -> StationId {
        self.station_id
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Open a session, trying up to `connect_attempts` times.
    ///
    /// Returns `true` when the link is connected afterwards. Failures are
    /// logged, never returned; the link stays `Disconnected`.
    pub async fn connect(self: &Arc<Self>) -> bool {
        let mut connector = self.connector.lock().await;
        self.closed.store(false, Ordering::Release);
        if self.is_connected() {
            return true;
        }

        // The previous read task must be gone before a new one starts.
        self.teardown_session().await;
        self.state.send_replace(LinkState::Connecting);

        let max_attempts = self.config.connect_attempts.max(1);
        for attempt in 1..=max_attempts {
            match connector.open().await {
                Ok(session) => {
                    self.start_session(session).await;
                    return true;
                }
                Err(e) => {
                    warn!(
                        station_id = %self.station_id,
                        endpoint = %self.endpoint,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Connect attempt failed"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        self.state.send_replace(LinkState::Disconnected);
        false
    }

    /// Send one command to the station.
    ///
    /// A transport failure drops the session and leaves the link
    /// `Disconnected`; reconnecting is the registry's job.
    ///
    /// # Errors
    /// - `TransportError::NotConnected` when no session is open
    /// - the transport error of the failed write otherwise
    pub async fn send(&self, command: Command) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(active) = writer.as_mut() else {
            return Err(TransportError::NotConnected(self.station_id));
        };

        trace!(station_id = %self.station_id, command = command.kind(), "Sending command");

        match active
            .write_frame(OutboundFrame::new(self.station_id, command))
            .await
        {
            Ok(()) => Ok(()),
            // Only encoding problems keep the session; socket errors arrive as `Io`.
            Err(e @ TransportError::Codec(_)) => Err(e),
            Err(e) => {
                warn!(station_id = %self.station_id, error = %e, "Write failed, dropping session");
                if let Some(mut dead) = writer.take() {
                    dead.close().await;
                }
                drop(writer);
                self.mark_lost();
                Err(e)
            }
        }
    }

    /// Close the session and wait for the read task to finish.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let _connector = self.connector.lock().await;
        self.teardown_session().await;
        self.close_writer().await;
        self.state.send_replace(LinkState::Disconnected);
        debug!(station_id = %self.station_id, "Link shut down");
    }

    /// Whether the link was shut down and not connected again since.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn status(&self) -> LinkStatus {
        let state = self.state();
        let session = self.lock_session();
        let current = session
            .as_ref()
            .filter(|_| state == LinkState::Connected);

        LinkStatus {
            station_id: self.station_id,
            state,
            endpoint: self.endpoint.clone(),
            peer: current.map(|s| s.peer.clone()),
            connected_at: current.map(|s| s.connected_at),
            uptime: current.map(|s| Utc::now() - s.connected_at),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }

    async fn start_session(self: &Arc<Self>, session: Session) {
        let Session {
            reader,
            writer,
            peer,
        } = session;

        *self.writer.lock().await = Some(writer);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).read_loop(reader, cancel.clone()));

        *self.lock_session() = Some(ActiveSession {
            cancel,
            task: Some(task),
            peer: peer.clone(),
            connected_at: Utc::now(),
        });
        self.sessions.fetch_add(1, Ordering::Relaxed);
        self.state.send_replace(LinkState::Connected);

        info!(station_id = %self.station_id, peer = %peer, "Station link connected");
        self.emit(LinkEvent::Connected(self.station_id)).await;
    }

    async fn read_loop(self: Arc<Self>, mut reader: AnyReader, cancel: CancellationToken) {
        let reason = loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break "closed locally".to_string(),
                outcome = reader.read_line() => outcome,
            };

            let line = match outcome {
                Ok(ReadOutcome::Line(line)) => line,
                Ok(ReadOutcome::Idle) => continue,
                Ok(ReadOutcome::Closed) => break "closed by station".to_string(),
                Ok(ReadOutcome::Displaced) => break "replaced by a new connection".to_string(),
                Err(e) => break e.to_string(),
            };

            let Some(event) = self.decode_line(&line) else {
                continue;
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break "closed locally".to_string(),
                sent = self.events.send(event) => {
                    if sent.is_err() {
                        trace!(station_id = %self.station_id, "No consumer for link events");
                    }
                }
            }
        };

        drop(reader);
        self.close_writer().await;
        self.state.send_replace(LinkState::Disconnected);
        info!(station_id = %self.station_id, reason = %reason, "Station link disconnected");

        if let Err(e) = self
            .events
            .try_send(LinkEvent::Disconnected(self.station_id))
        {
            debug!(station_id = %self.station_id, error = %e, "Disconnected event not delivered");
        }
        self.lost.notify_one();
    }

    /// Parse one line; `None` for lines that must be dropped.
    fn decode_line(&self, line: &str) -> Option<LinkEvent> {
        trace!(station_id = %self.station_id, line, "Received line");

        match parse_message(line) {
            Ok(inbound) if !inbound.is_for(self.station_id) => {
                debug!(
                    station_id = %self.station_id,
                    parking_id = ?inbound.parking_id,
                    "Dropping frame addressed to another station"
                );
                None
            }
            Ok(inbound) => Some(LinkEvent::Message(self.station_id, inbound.message)),
            Err(e) => {
                debug!(station_id = %self.station_id, error = %e, "Dropping unparseable frame");
                None
            }
        }
    }

    async fn emit(&self, event: LinkEvent) {
        if self.events.send(event).await.is_err() {
            trace!(station_id = %self.station_id, "No consumer for link events");
        }
    }

    /// Flag the link as down after a write failure; the read task cleans up.
    fn mark_lost(&self) {
        self.state.send_replace(LinkState::Disconnected);
        if let Some(session) = self.lock_session().as_ref() {
            session.cancel.cancel();
        }
    }

    async fn teardown_session(&self) {
        let task = {
            let mut session = self.lock_session();
            session.as_mut().and_then(|s| {
                s.cancel.cancel();
                s.task.take()
            })
        };

        if let Some(task) = task {
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(station_id = %self.station_id, error = %e, "Read task panicked"),
            }
        }
    }

    async fn close_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.close().await;
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
