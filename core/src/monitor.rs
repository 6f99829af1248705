// Live Subscription Bridge
//
// Relays messages from a subject on a dedicated connection to one streaming
// client. Each session owns exactly one relay task, which is the only writer
// into the session's bounded queue: keep-alive ticks, subscription messages
// and errors are serialised through it with `tokio::select!`.
//
// Session lifecycle:
//   Idle -> Dialing -> Subscribed -> Relaying -> Closed
//   Dialing | Relaying -> Errored -> Closed

use crate::envelope::MessageEnvelope;
use crate::profile::Auth;
use crate::transport::{Connection, Connector, Subscription};
use crate::{CobraError, Result};
use serde_json::json;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_SUBJECT: &str = ">";
pub const DEFAULT_SERVER: &str = "nats://localhost:4222";

/// How long a full queue may hold back the final `error` frame
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// What to do when the client reads slower than messages arrive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the event that did not fit and keep relaying
    #[default]
    DropNewest,
    /// End the session
    Close,
}

impl OverflowPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drop" | "drop_newest" => Some(OverflowPolicy::DropNewest),
            "close" => Some(OverflowPolicy::Close),
            _ => None,
        }
    }
}

/// Monitor configuration
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Interval between `ping` events
    pub keep_alive: Duration,
    /// Events buffered per session before the overflow policy applies
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(15),
            queue_capacity: 256,
            overflow: OverflowPolicy::DropNewest,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            keep_alive: std::env::var("COBRA_MONITOR_KEEPALIVE_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.keep_alive),
            queue_capacity: std::env::var("COBRA_MONITOR_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.queue_capacity),
            overflow: std::env::var("COBRA_MONITOR_OVERFLOW")
                .ok()
                .and_then(|v| OverflowPolicy::parse(&v))
                .unwrap_or(defaults.overflow),
        }
    }
}

/// Parameters of one monitor session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorRequest {
    /// Identifies the requesting connection profile, used for logging only
    pub connection_id: String,
    pub subject: String,
    pub servers: Vec<String>,
}

impl MonitorRequest {
    /// Missing or blank subject and servers fall back to `>` and the local server
    pub fn new(
        connection_id: impl Into<String>,
        subject: Option<String>,
        servers: Option<Vec<String>>,
    ) -> Self {
        let subject = subject
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        let servers = servers
            .map(|list| {
                list.into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_SERVER.to_string()]);
        Self {
            connection_id: connection_id.into(),
            subject,
            servers,
        }
    }

    /// Split a comma-separated server list
    pub fn parse_servers(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dialing,
    Subscribed,
    Relaying,
    Errored,
    Closed,
}

/// One frame delivered to the streaming client
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Connected { subject: String },
    Ping { timestamp: i64 },
    Message(MessageEnvelope),
    Error { message: String },
}

impl MonitorEvent {
    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Connected { .. } => "connected",
            MonitorEvent::Ping { .. } => "ping",
            MonitorEvent::Message(_) => "message",
            MonitorEvent::Error { .. } => "error",
        }
    }

    /// Event payload as a JSON document
    pub fn data(&self) -> Result<String> {
        let data = match self {
            MonitorEvent::Connected { subject } => json!({ "subject": subject }).to_string(),
            MonitorEvent::Ping { timestamp } => json!({ "timestamp": timestamp }).to_string(),
            MonitorEvent::Message(envelope) => serde_json::to_string(envelope)?,
            MonitorEvent::Error { message } => json!({ "message": message }).to_string(),
        };
        Ok(data)
    }
}

/// Opens monitor sessions, each on its own connection
pub struct MonitorBridge {
    connector: Arc<dyn Connector>,
    config: MonitorConfig,
    active: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
}

impl MonitorBridge {
    pub fn new(connector: Arc<dyn Connector>, config: MonitorConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            connector,
            config,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// End every running session. Sessions opened afterwards end immediately.
    pub fn shutdown(&self) {
        info!(target: "monitor", active = self.active_sessions(), "Shutting down monitor sessions");
        self.shutdown.send_replace(true);
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Sessions whose relay task is still running
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Start relaying `request.subject`. Must be called within a tokio runtime.
    pub fn open(&self, request: MonitorRequest) -> MonitorSession {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let dropped = Arc::new(AtomicU64::new(0));

        info!(
            target: "monitor",
            connection_id = %request.connection_id,
            subject = %request.subject,
            servers = ?request.servers,
            "Opening monitor session"
        );

        let relay = Relay {
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            subject: request.subject.clone(),
            request,
            tx,
            state: state_tx,
            dropped: Arc::clone(&dropped),
            shutdown: self.shutdown.subscribe(),
        };
        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            relay.run().await;
            active.fetch_sub(1, Ordering::AcqRel);
        });

        MonitorSession {
            events: rx,
            state: StateWatch(state_rx),
            dropped,
        }
    }
}

/// Receiving half of a monitor session. Dropping it ends the session.
pub struct MonitorSession {
    events: mpsc::Receiver<MonitorEvent>,
    state: StateWatch,
    dropped: Arc<AtomicU64>,
}

impl MonitorSession {
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.events.recv().await
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    /// A handle that keeps observing the state after the session is dropped
    pub fn state_watch(&self) -> StateWatch {
        self.state.clone()
    }

    /// Events discarded under `OverflowPolicy::DropNewest`
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl futures::Stream for MonitorSession {
    type Item = MonitorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

#[derive(Clone, Debug)]
pub struct StateWatch(watch::Receiver<SessionState>);

impl StateWatch {
    pub fn current(&self) -> SessionState {
        *self.0.borrow()
    }

    /// Resolves once the relay task has fully torn down
    pub async fn wait_closed(&mut self) {
        // The sender only drops after publishing Closed
        let _ = self.0.wait_for(|state| *state == SessionState::Closed).await;
    }
}

enum Stop {
    Disconnected,
    Shutdown,
    Overflow,
    Failed(String),
}

struct Relay {
    connector: Arc<dyn Connector>,
    config: MonitorConfig,
    request: MonitorRequest,
    subject: String,
    tx: mpsc::Sender<MonitorEvent>,
    state: watch::Sender<SessionState>,
    dropped: Arc<AtomicU64>,
    shutdown: watch::Receiver<bool>,
}

impl Relay {
    async fn run(self) {
        self.state.send_replace(SessionState::Dialing);
        let client_name = format!("Monitor - {}", self.subject);

        let connection = match self
            .connector
            .dial(&self.request.servers, &Auth::None, &client_name)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                self.fail(&e).await;
                self.state.send_replace(SessionState::Closed);
                return;
            }
        };

        let mut subscription = match connection.subscribe(&self.subject).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.fail(&e).await;
                close_connection(&connection).await;
                self.state.send_replace(SessionState::Closed);
                return;
            }
        };
        self.state.send_replace(SessionState::Subscribed);
        debug!(target: "monitor", subject = %self.subject, "Subscribed");

        let stop = match self.emit(MonitorEvent::Connected {
            subject: self.subject.clone(),
        }) {
            Ok(()) => {
                self.state.send_replace(SessionState::Relaying);
                self.relay(subscription.as_mut(), self.shutdown.clone()).await
            }
            Err(stop) => stop,
        };

        match &stop {
            Stop::Failed(message) => {
                warn!(target: "monitor", subject = %self.subject, error = %message, "Subscription failed");
                self.send_terminal(MonitorEvent::Error {
                    message: message.clone(),
                })
                .await;
                self.state.send_replace(SessionState::Errored);
            }
            Stop::Overflow => {
                warn!(target: "monitor", subject = %self.subject, "Client too slow, closing session");
            }
            Stop::Disconnected => {
                debug!(target: "monitor", subject = %self.subject, "Client disconnected");
            }
            Stop::Shutdown => {
                debug!(target: "monitor", subject = %self.subject, "Bridge shutting down");
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            debug!(target: "monitor", subject = %self.subject, error = %e, "Unsubscribe failed");
        }
        close_connection(&connection).await;
        self.state.send_replace(SessionState::Closed);
        info!(
            target: "monitor",
            connection_id = %self.request.connection_id,
            subject = %self.subject,
            dropped = self.dropped.load(Ordering::Relaxed),
            "Monitor session closed"
        );
    }

    async fn relay(
        &self,
        subscription: &mut dyn Subscription,
        shutdown: watch::Receiver<bool>,
    ) -> Stop {
        let period = self.config.keep_alive;
        let mut keep_alive = interval_at(Instant::now() + period, period);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stopped = shutdown_requested(shutdown);
        tokio::pin!(stopped);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.tx.closed() => return Stop::Disconnected,
                _ = &mut stopped => return Stop::Shutdown,
                _ = keep_alive.tick() => MonitorEvent::Ping {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
                next = subscription.next() => match next {
                    Some(Ok(message)) => MonitorEvent::Message(MessageEnvelope::from_message(&message)),
                    Some(Err(e)) => return Stop::Failed(e.to_string()),
                    None => return Stop::Failed("subscription ended".to_string()),
                },
            };
            if let Err(stop) = self.emit(event) {
                return stop;
            }
        }
    }

    fn emit(&self, event: MonitorEvent) -> std::result::Result<(), Stop> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Stop::Disconnected),
            Err(mpsc::error::TrySendError::Full(event)) => match self.config.overflow {
                OverflowPolicy::DropNewest => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        target: "monitor",
                        subject = %self.subject,
                        event = event.name(),
                        dropped,
                        "Queue full, dropping event"
                    );
                    Ok(())
                }
                OverflowPolicy::Close => Err(Stop::Overflow),
            },
        }
    }

    /// Report a setup failure to the client
    async fn fail(&self, error: &CobraError) {
        warn!(
            target: "monitor",
            connection_id = %self.request.connection_id,
            subject = %self.subject,
            error = %error,
            "Monitor setup failed"
        );
        self.send_terminal(MonitorEvent::Error {
            message: error.to_string(),
        })
        .await;
        self.state.send_replace(SessionState::Errored);
    }

    /// Deliver the final frame even when the queue is full, waiting a bounded
    /// time for the client to make room
    async fn send_terminal(&self, event: MonitorEvent) {
        match timeout(TERMINAL_SEND_TIMEOUT, self.tx.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!(target: "monitor", subject = %self.subject, "Client gone before final frame");
            }
            Err(_) => {
                warn!(target: "monitor", subject = %self.subject, "Timed out delivering final frame");
            }
        }
    }
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Bridge dropped without a shutdown request
        std::future::pending::<()>().await;
    }
}

async fn close_connection(connection: &Arc<dyn Connection>) {
    if let Err(e) = connection.close().await {
        warn!(target: "monitor", error = %e, "Failed to close monitor connection");
    }
}
