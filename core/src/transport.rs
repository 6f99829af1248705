// Messaging transport boundary
//
// Everything the registry, the monitor bridge and the actions need from a
// messaging client. `crate::nats` implements these traits on top of
// async-nats; tests substitute in-memory fakes.

use crate::profile::Auth;
use crate::types::{
    ConsumerConfig, ConsumerInfo, KvConfig, KvEntry, KvStatus, PublishAck, ServerInfo,
    StreamConfig, StreamInfo,
};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Ordered header multimap. Names keep their first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, keeping any values already present for `name`
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One value per name: the first one received, or empty if none
    pub fn flatten(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(name, values)| (name.clone(), values.first().cloned().unwrap_or_default()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// A message delivered by a subscription or as a request reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<Headers>,
}

impl InboundMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Push-based subscription on a subject pattern
#[async_trait]
pub trait Subscription: Send {
    /// Next message in delivery order; `None` once the subscription is gone.
    /// Must be cancel safe: it is polled inside `tokio::select!`.
    async fn next(&mut self) -> Option<Result<InboundMessage>>;

    async fn unsubscribe(&mut self) -> Result<()>;
}

/// Establishes transport-level connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(
        &self,
        servers: &[String],
        auth: &Auth,
        client_name: &str,
    ) -> Result<Arc<dyn Connection>>;
}

/// One live network connection. Shared by every caller holding the same id.
#[async_trait]
pub trait Connection: Send + Sync {
    fn is_open(&self) -> bool;

    fn server_info(&self) -> ServerInfo;

    async fn close(&self) -> Result<()>;

    async fn publish(&self, subject: &str, payload: Bytes, headers: Option<Headers>)
        -> Result<()>;

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Option<Headers>,
        timeout: Duration,
    ) -> Result<InboundMessage>;

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>>;

    /// Stream and consumer administration client
    async fn management(&self) -> Result<Arc<dyn ManagementClient>>;

    /// Key-value and JetStream publish client
    fn data(&self) -> Arc<dyn DataClient>;
}

#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn list_streams(&self) -> Result<Vec<StreamInfo>>;
    async fn add_stream(&self, config: StreamConfig) -> Result<StreamInfo>;
    async fn delete_stream(&self, name: &str) -> Result<bool>;
    async fn stream_info(&self, name: &str) -> Result<StreamInfo>;
    async fn list_consumers(&self, stream: &str) -> Result<Vec<ConsumerInfo>>;
    async fn add_consumer(&self, stream: &str, config: ConsumerConfig) -> Result<ConsumerInfo>;
    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<bool>;
}

#[async_trait]
pub trait DataClient: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<KvStatus>>;
    async fn create_bucket(&self, config: KvConfig) -> Result<KvStatus>;
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;
    async fn bucket_status(&self, bucket: &str) -> Result<KvStatus>;
    async fn keys(&self, bucket: &str) -> Result<Vec<String>>;
    /// `None` when the key has never been written
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>>;
    /// Returns the new revision
    async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<u64>;
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishAck>;
}
