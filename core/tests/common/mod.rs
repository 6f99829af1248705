//! Shared test doubles
//!
//! In-memory implementations of the transport traits:
//!
//! - `FakeConnector`: counts dials, can fail or stall, remembers every connection
//! - `FakeConnection`: records publishes, routes injected messages to matching subscriptions
//! - `FakeManagement` / `FakeData`: map-backed stream, consumer and bucket stores
#![allow(dead_code)]

use bytes::Bytes;
use cobra_core::transport::Subscription;
use cobra_core::types::{
    ConsumerConfig, ConsumerInfo, KvConfig, KvEntry, KvOperation, KvStatus, PublishAck,
    SequenceInfo, ServerInfo, StreamConfig, StreamInfo, StreamState,
};
use cobra_core::{
    Auth, CobraError, Connection, Connector, DataClient, Headers, InboundMessage,
    ManagementClient, Result,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const CREATED: &str = "2026-01-01T00:00:00+00:00";

/// Profile pointing at a server the fake connector always reaches
pub fn local_profile(id: &str) -> cobra_core::ConnectionProfile {
    cobra_core::ConnectionProfile::new(id, "Local", vec!["nats://localhost:4222".to_string()])
}

/// Pointer identity for trait objects
pub fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// NATS subject matching with `*` (one token) and `>` (one or more trailing tokens)
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern = pattern.split('.');
    let mut subject = subject.split('.');
    loop {
        match (pattern.next(), subject.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

#[derive(Clone, Debug)]
pub struct DialRecord {
    pub servers: Vec<String>,
    pub auth: Auth,
    pub client_name: String,
}

#[derive(Default)]
pub struct FakeConnector {
    dials: AtomicUsize,
    fail: AtomicBool,
    delay_ms: AtomicU64,
    records: Mutex<Vec<DialRecord>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connector whose dials all fail as if the server were unreachable
    pub fn unreachable() -> Arc<Self> {
        let connector = Self::new();
        connector.set_failing(true);
        connector
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_dial_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<DialRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn dial(
        &self,
        servers: &[String],
        auth: &Auth,
        client_name: &str,
    ) -> Result<Arc<dyn Connection>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.records.lock().unwrap().push(DialRecord {
            servers: servers.to_vec(),
            auth: auth.clone(),
            client_name: client_name.to_string(),
        });

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CobraError::Connection(format!(
                "could not connect to {}",
                servers.join(",")
            )));
        }

        let connection = Arc::new(FakeConnection::new());
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

// =============================================================================
// Connection
// =============================================================================

#[derive(Clone, Debug)]
pub struct Published {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<Headers>,
}

type Feed = mpsc::UnboundedSender<Result<InboundMessage>>;

pub struct FakeConnection {
    open: AtomicBool,
    close_calls: AtomicUsize,
    management_calls: AtomicUsize,
    management_delay_ms: AtomicU64,
    unsubscribes: Arc<AtomicUsize>,
    published: Mutex<Vec<Published>>,
    requests: Mutex<Vec<Duration>>,
    feeds: Mutex<Vec<(String, Feed)>>,
    pub management: Arc<FakeManagement>,
    pub data: Arc<FakeData>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            close_calls: AtomicUsize::new(0),
            management_calls: AtomicUsize::new(0),
            management_delay_ms: AtomicU64::new(0),
            unsubscribes: Arc::new(AtomicUsize::new(0)),
            published: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            feeds: Mutex::new(Vec::new()),
            management: Arc::new(FakeManagement::default()),
            data: Arc::new(FakeData::default()),
        }
    }

    /// Simulate the server dropping the connection
    pub fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn management_calls(&self) -> usize {
        self.management_calls.load(Ordering::SeqCst)
    }

    /// Stall `management()` before it returns the client
    pub fn set_management_delay(&self, delay: Duration) {
        self.management_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn request_timeouts(&self) -> Vec<Duration> {
        self.requests.lock().unwrap().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.feeds.lock().unwrap().len()
    }

    /// Deliver a message to every subscription whose pattern matches `subject`
    pub fn inject(&self, subject: &str, payload: impl Into<Bytes>) {
        self.inject_message(InboundMessage::new(subject, payload));
    }

    pub fn inject_message(&self, message: InboundMessage) {
        for (pattern, feed) in self.feeds.lock().unwrap().iter() {
            if subject_matches(pattern, &message.subject) {
                let _ = feed.send(Ok(message.clone()));
            }
        }
    }

    /// Make every subscription yield an error
    pub fn fail_subscriptions(&self, message: &str) {
        for (_, feed) in self.feeds.lock().unwrap().iter() {
            let _ = feed.send(Err(CobraError::Transport(message.to_string())));
        }
    }

    /// End every subscription as if the server had dropped it
    pub fn end_subscriptions(&self) {
        self.feeds.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl Connection for FakeConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            server_id: "NFAKE".to_string(),
            server_name: "fake".to_string(),
            host: "127.0.0.1".to_string(),
            port: 4222,
            version: "2.10.0".to_string(),
            max_payload: 1024 * 1024,
            proto: 1,
        }
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.feeds.lock().unwrap().clear();
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes, headers: Option<Headers>) -> Result<()> {
        self.published.lock().unwrap().push(Published {
            subject: subject.to_string(),
            payload,
            headers,
        });
        Ok(())
    }

    /// Echoes the payload back; subjects ending in `.timeout` never answer
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Option<Headers>,
        timeout: Duration,
    ) -> Result<InboundMessage> {
        self.requests.lock().unwrap().push(timeout);
        if subject.ends_with(".timeout") {
            return Err(CobraError::Timeout(format!("no reply on {subject}")));
        }
        let mut reply = InboundMessage::new(format!("_INBOX.{subject}"), payload);
        reply.headers = headers;
        Ok(reply)
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>> {
        if !self.is_open() {
            return Err(CobraError::Transport("connection is closed".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().push((subject.to_string(), tx));
        Ok(Box::new(FakeSubscription {
            rx,
            unsubscribes: self.unsubscribes.clone(),
        }))
    }

    async fn management(&self) -> Result<Arc<dyn ManagementClient>> {
        self.management_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.management_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.management.clone())
    }

    fn data(&self) -> Arc<dyn DataClient> {
        self.data.clone()
    }
}

pub struct FakeSubscription {
    rx: mpsc::UnboundedReceiver<Result<InboundMessage>>,
    unsubscribes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Subscription for FakeSubscription {
    async fn next(&mut self) -> Option<Result<InboundMessage>> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.rx.close();
        Ok(())
    }
}

// =============================================================================
// JetStream stores
// =============================================================================

#[derive(Default)]
pub struct FakeManagement {
    streams: Mutex<BTreeMap<String, StreamInfo>>,
    consumers: Mutex<BTreeMap<(String, String), ConsumerInfo>>,
}

impl FakeManagement {
    fn require_stream(&self, name: &str) -> Result<()> {
        if self.streams.lock().unwrap().contains_key(name) {
            Ok(())
        } else {
            Err(CobraError::NotFound(format!("stream {name} not found")))
        }
    }
}

#[async_trait::async_trait]
impl ManagementClient for FakeManagement {
    async fn list_streams(&self) -> Result<Vec<StreamInfo>> {
        Ok(self.streams.lock().unwrap().values().cloned().collect())
    }

    async fn add_stream(&self, config: StreamConfig) -> Result<StreamInfo> {
        let mut streams = self.streams.lock().unwrap();
        if streams.contains_key(&config.name) {
            return Err(CobraError::Transport("stream name already in use".into()));
        }
        let info = StreamInfo {
            config: config.clone(),
            created: CREATED.to_string(),
            state: StreamState::default(),
        };
        streams.insert(config.name, info.clone());
        Ok(info)
    }

    async fn delete_stream(&self, name: &str) -> Result<bool> {
        self.require_stream(name)?;
        self.consumers.lock().unwrap().retain(|(stream, _), _| stream != name);
        Ok(self.streams.lock().unwrap().remove(name).is_some())
    }

    async fn stream_info(&self, name: &str) -> Result<StreamInfo> {
        let streams = self.streams.lock().unwrap();
        let mut info = streams
            .get(name)
            .cloned()
            .ok_or_else(|| CobraError::NotFound(format!("stream {name} not found")))?;
        info.state.consumer_count = self
            .consumers
            .lock()
            .unwrap()
            .keys()
            .filter(|(stream, _)| stream == name)
            .count();
        Ok(info)
    }

    async fn list_consumers(&self, stream: &str) -> Result<Vec<ConsumerInfo>> {
        self.require_stream(stream)?;
        Ok(self
            .consumers
            .lock()
            .unwrap()
            .iter()
            .filter(|((s, _), _)| s == stream)
            .map(|(_, info)| info.clone())
            .collect())
    }

    async fn add_consumer(&self, stream: &str, config: ConsumerConfig) -> Result<ConsumerInfo> {
        self.require_stream(stream)?;
        let mut consumers = self.consumers.lock().unwrap();
        let name = config
            .durable_name
            .clone()
            .unwrap_or_else(|| format!("ephemeral-{}", consumers.len() + 1));
        let info = ConsumerInfo {
            stream_name: stream.to_string(),
            name: name.clone(),
            created: CREATED.to_string(),
            config,
            delivered: SequenceInfo::default(),
            ack_floor: SequenceInfo::default(),
            num_pending: 0,
            num_redelivered: 0,
            num_waiting: 0,
            num_ack_pending: 0,
        };
        consumers.insert((stream.to_string(), name), info.clone());
        Ok(info)
    }

    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<bool> {
        self.require_stream(stream)?;
        Ok(self
            .consumers
            .lock()
            .unwrap()
            .remove(&(stream.to_string(), consumer.to_string()))
            .is_some())
    }
}

struct Bucket {
    config: KvConfig,
    entries: BTreeMap<String, KvEntry>,
}

#[derive(Default)]
pub struct FakeData {
    buckets: Mutex<BTreeMap<String, Bucket>>,
    revision: AtomicU64,
    sequence: AtomicU64,
    published: Mutex<Vec<(String, Bytes)>>,
}

impl FakeData {
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().unwrap().clone()
    }

    fn status(name: &str, bucket: &Bucket) -> KvStatus {
        KvStatus {
            bucket: name.to_string(),
            values: bucket.entries.len() as u64,
            history: bucket.config.history,
            max_age_secs: bucket.config.max_age_secs,
            storage: bucket.config.storage,
            replicas: bucket.config.replicas,
            bytes: bucket.entries.values().map(|e| e.value.len() as u64).sum(),
        }
    }
}

fn missing_bucket(bucket: &str) -> CobraError {
    CobraError::NotFound(format!("bucket {bucket} not found"))
}

#[async_trait::async_trait]
impl DataClient for FakeData {
    async fn list_buckets(&self) -> Result<Vec<KvStatus>> {
        Ok(self
            .buckets
            .lock()
            .unwrap()
            .iter()
            .map(|(name, bucket)| Self::status(name, bucket))
            .collect())
    }

    async fn create_bucket(&self, config: KvConfig) -> Result<KvStatus> {
        let mut buckets = self.buckets.lock().unwrap();
        let name = config.bucket.clone();
        let bucket = buckets.entry(name.clone()).or_insert(Bucket {
            config,
            entries: BTreeMap::new(),
        });
        Ok(Self::status(&name, bucket))
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets
            .lock()
            .unwrap()
            .remove(bucket)
            .map(|_| ())
            .ok_or_else(|| missing_bucket(bucket))
    }

    async fn bucket_status(&self, bucket: &str) -> Result<KvStatus> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .map(|b| Self::status(bucket, b))
            .ok_or_else(|| missing_bucket(bucket))
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.lock().unwrap();
        let bucket = buckets.get(bucket).ok_or_else(|| missing_bucket(bucket))?;
        Ok(bucket.entries.keys().cloned().collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>> {
        let buckets = self.buckets.lock().unwrap();
        let bucket = buckets.get(bucket).ok_or_else(|| missing_bucket(bucket))?;
        Ok(bucket.entries.get(key).cloned())
    }

    async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<u64> {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.get_mut(bucket).ok_or_else(|| missing_bucket(bucket))?;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        bucket.entries.insert(
            key.to_string(),
            KvEntry {
                key: key.to_string(),
                value: String::from_utf8_lossy(&value).into_owned(),
                revision,
                created: CREATED.to_string(),
                delta: 0,
                operation: KvOperation::Put,
            },
        );
        Ok(revision)
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishAck> {
        self.published
            .lock()
            .unwrap()
            .push((subject.to_string(), payload));
        Ok(PublishAck {
            stream: "ORDERS".to_string(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            duplicate: false,
        })
    }
}
