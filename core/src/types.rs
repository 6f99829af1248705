// Administrative types exchanged with the dashboard UI
//
// These mirror the JetStream API objects the UI renders, independent of the
// client library used to talk to the cluster.

use crate::{CobraError, Result};
use serde::{Deserialize, Serialize};

/// Information reported by the server a connection is attached to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_id: String,
    pub server_name: String,
    pub host: String,
    pub port: u16,
    pub version: String,
    pub max_payload: usize,
    pub proto: i8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    #[default]
    Limits,
    Interest,
    WorkQueue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    #[default]
    Old,
    New,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    None,
    All,
    #[default]
    Explicit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    #[default]
    All,
    Last,
    New,
    LastPerSubject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayPolicy {
    #[default]
    Instant,
    Original,
}

/// Stream configuration. Negative limits mean unlimited, a zero age means no expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    pub storage: StorageType,
    pub max_msgs: i64,
    pub max_bytes: i64,
    pub max_age_secs: u64,
    pub discard: DiscardPolicy,
    pub num_replicas: usize,
    pub no_ack: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_window_secs: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            subjects: Vec::new(),
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_msgs: -1,
            max_bytes: -1,
            max_age_secs: 0,
            discard: DiscardPolicy::Old,
            num_replicas: 1,
            no_ack: false,
            duplicate_window_secs: None,
        }
    }
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("stream", &self.name)?;
        if self.subjects.iter().all(|s| s.trim().is_empty()) {
            return Err(CobraError::Validation(
                "at least one subject is required".into(),
            ));
        }
        validate_range("replicas", self.num_replicas as i64, 1, 5)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub messages: u64,
    pub bytes: u64,
    pub first_seq: u64,
    pub last_seq: u64,
    pub consumer_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub config: StreamConfig,
    /// RFC 3339 creation time
    pub created: String,
    pub state: StreamState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver_group: Option<String>,
    pub deliver_policy: DeliverPolicy,
    pub ack_policy: AckPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_wait_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_deliver: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_subject: Option<String>,
    pub replay_policy: ReplayPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_waiting: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ack_pending: Option<i64>,
    pub flow_control: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_heartbeat_secs: Option<u64>,
    pub headers_only: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            durable_name: None,
            description: None,
            deliver_subject: None,
            deliver_group: None,
            deliver_policy: DeliverPolicy::All,
            ack_policy: AckPolicy::Explicit,
            ack_wait_secs: None,
            max_deliver: None,
            filter_subject: None,
            replay_policy: ReplayPolicy::Instant,
            max_waiting: None,
            max_ack_pending: None,
            flow_control: false,
            idle_heartbeat_secs: None,
            headers_only: false,
        }
    }
}

impl ConsumerConfig {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            durable_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.durable_name {
            validate_name("consumer", name)?;
        }
        // Flow control and heartbeats only apply to push consumers
        if self.flow_control && self.deliver_subject.is_none() {
            return Err(CobraError::Validation(
                "flow control requires a deliver subject".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceInfo {
    pub consumer_seq: u64,
    pub stream_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub stream_name: String,
    pub name: String,
    pub created: String,
    pub config: ConsumerConfig,
    pub delivered: SequenceInfo,
    pub ack_floor: SequenceInfo,
    pub num_pending: u64,
    pub num_redelivered: usize,
    pub num_waiting: usize,
    pub num_ack_pending: usize,
}

/// Key-value bucket configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub history: i64,
    /// Per-key TTL in seconds, zero keeps values forever
    pub max_age_secs: u64,
    pub replicas: usize,
    pub storage: StorageType,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            description: None,
            history: 1,
            max_age_secs: 0,
            replicas: 1,
            storage: StorageType::File,
        }
    }
}

impl KvConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("bucket", &self.bucket)?;
        validate_range("history", self.history, 1, 64)?;
        validate_range("replicas", self.replicas as i64, 1, 5)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvStatus {
    pub bucket: String,
    pub values: u64,
    pub history: i64,
    pub max_age_secs: u64,
    pub storage: StorageType,
    pub replicas: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KvOperation {
    Put,
    Del,
    Purge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    pub revision: u64,
    pub created: String,
    pub delta: u64,
    pub operation: KvOperation,
}

/// Reply to a request-reply exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub subject: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<std::collections::BTreeMap<String, String>>,
}

/// Acknowledgement of a JetStream publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    pub duplicate: bool,
}

/// Names of streams and buckets: alphanumerics, dash and underscore
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CobraError::Validation(format!("{kind} name is required")));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CobraError::Validation(format!(
            "{kind} name {name:?} may only contain alphanumerics, dash and underscore"
        )));
    }
    Ok(())
}

fn validate_range(field: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        return Err(CobraError::Validation(format!(
            "{field} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}
