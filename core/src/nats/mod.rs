// async-nats transport
//
// Implements the transport boundary on top of the async-nats client:
// `NatsConnector` dials, `NatsConnection` wraps a live client, and the
// `jetstream` submodule provides the derived management and data clients.

mod jetstream;

pub use jetstream::{JetStreamData, JetStreamManagement};

use crate::profile::Auth;
use crate::transport::{
    Connection, Connector, DataClient, Headers, InboundMessage, ManagementClient, Subscription,
};
use crate::types::ServerInfo;
use crate::{CobraError, Result};
use async_nats::connection::State;
use async_nats::{ConnectOptions, HeaderMap, ServerAddr};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Dials NATS servers with async-nats
#[derive(Clone, Debug)]
pub struct NatsConnector {
    connect_timeout: Duration,
}

impl Default for NatsConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000))
    }
}

impl NatsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Reads `COBRA_CONNECT_TIMEOUT_MS`
    pub fn from_env() -> Self {
        std::env::var("COBRA_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|ms| Self::new(Duration::from_millis(ms)))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for NatsConnector {
    async fn dial(
        &self,
        servers: &[String],
        auth: &Auth,
        client_name: &str,
    ) -> Result<Arc<dyn Connection>> {
        let addrs = servers
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim().parse::<ServerAddr>().map_err(|e| {
                    CobraError::Validation(format!("invalid server url {s:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut options = ConnectOptions::new()
            .name(client_name)
            .connection_timeout(self.connect_timeout);
        options = match auth {
            Auth::None => options,
            Auth::UserPassword { user, pass } => options.user_and_password(user.clone(), pass.clone()),
            Auth::Token(token) => options.token(token.clone()),
        };

        let client = options
            .connect(addrs.as_slice())
            .await
            .map_err(|e| CobraError::Connection(e.to_string()))?;

        info!(
            target: "nats",
            client_name = %client_name,
            server = %client.server_info().server_name,
            "Connected to NATS"
        );
        Ok(Arc::new(NatsConnection::new(client)))
    }
}

/// A live async-nats client plus an explicit closed flag
pub struct NatsConnection {
    client: async_nats::Client,
    closed: AtomicBool,
}

impl NatsConnection {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CobraError::Transport("connection is closed".into()))
        }
    }
}

#[async_trait]
impl Connection for NatsConnection {
    /// Open until `close` is called. async-nats reconnects on its own and has
    /// no terminal closed state, so `Disconnected` is transient and reported
    /// only in the log.
    fn is_open(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let state = self.client.connection_state();
        if state != State::Connected {
            debug!(target: "nats", state = %state, "Client not connected, reconnect pending");
        }
        true
    }

    fn server_info(&self) -> ServerInfo {
        let info = self.client.server_info();
        ServerInfo {
            server_id: info.server_id,
            server_name: info.server_name,
            host: info.host,
            port: info.port,
            version: info.version,
            max_payload: info.max_payload,
            proto: info.proto,
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.client
            .drain()
            .await
            .map_err(|e| CobraError::Transport(e.to_string()))
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Option<Headers>,
    ) -> Result<()> {
        self.ensure_open()?;
        let result = match headers {
            Some(headers) if !headers.is_empty() => {
                self.client
                    .publish_with_headers(subject.to_string(), to_header_map(&headers), payload)
                    .await
            }
            _ => self.client.publish(subject.to_string(), payload).await,
        };
        result.map_err(|e| CobraError::Transport(e.to_string()))?;
        // Surface write errors to the caller instead of losing them in the buffer
        self.client
            .flush()
            .await
            .map_err(|e| CobraError::Transport(e.to_string()))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Option<Headers>,
        timeout: Duration,
    ) -> Result<InboundMessage> {
        self.ensure_open()?;
        let mut request = async_nats::Request::new()
            .payload(payload)
            .timeout(Some(timeout));
        if let Some(headers) = headers.filter(|h| !h.is_empty()) {
            request = request.headers(to_header_map(&headers));
        }

        let message = self
            .client
            .send_request(subject.to_string(), request)
            .await
            .map_err(|e| match e.kind() {
                async_nats::client::RequestErrorKind::TimedOut => {
                    CobraError::Timeout(format!("no reply on {subject} within {timeout:?}"))
                }
                async_nats::client::RequestErrorKind::NoResponders => {
                    CobraError::NotFound(format!("no responders on {subject}"))
                }
                _ => CobraError::Transport(e.to_string()),
            })?;
        Ok(from_message(message))
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>> {
        self.ensure_open()?;
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| CobraError::Transport(e.to_string()))?;
        debug!(target: "nats", subject = %subject, "Subscribed");
        Ok(Box::new(NatsSubscription { inner: subscriber }))
    }

    async fn management(&self) -> Result<Arc<dyn ManagementClient>> {
        self.ensure_open()?;
        Ok(Arc::new(JetStreamManagement::new(async_nats::jetstream::new(
            self.client.clone(),
        ))))
    }

    fn data(&self) -> Arc<dyn DataClient> {
        Arc::new(JetStreamData::new(async_nats::jetstream::new(
            self.client.clone(),
        )))
    }
}

struct NatsSubscription {
    inner: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<Result<InboundMessage>> {
        self.inner.next().await.map(|message| Ok(from_message(message)))
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.inner
            .unsubscribe()
            .await
            .map_err(|e| CobraError::Transport(e.to_string()))
    }
}

fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers.iter() {
        for value in values {
            map.append(name, value.as_str());
        }
    }
    map
}

fn from_message(message: async_nats::Message) -> InboundMessage {
    let headers = message.headers.as_ref().map(|map| {
        let mut headers = Headers::new();
        for (name, values) in map.iter() {
            for value in values {
                headers.append(name.to_string(), value.as_str());
            }
        }
        headers
    });
    InboundMessage {
        subject: message.subject.to_string(),
        payload: message.payload,
        headers,
    }
}
