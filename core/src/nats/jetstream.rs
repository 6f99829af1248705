// JetStream management and data clients
//
// Both wrap an async-nats `jetstream::Context`. Library types are converted
// to the dashboard's administrative types at this boundary.

use crate::transport::{DataClient, ManagementClient};
use crate::types::{
    AckPolicy, ConsumerConfig, ConsumerInfo, DeliverPolicy, DiscardPolicy, KvConfig, KvEntry,
    KvOperation, KvStatus, PublishAck, ReplayPolicy, RetentionPolicy, SequenceInfo,
    StorageType, StreamConfig, StreamInfo, StreamState,
};
use crate::{CobraError, Result};
use async_nats::jetstream::context::{GetStreamError, GetStreamErrorKind, KeyValueError};
use async_nats::jetstream::{self, consumer, kv, stream, Context};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use std::time::Duration;
use tracing::debug;

/// Streams backing key-value buckets carry this prefix
const KV_STREAM_PREFIX: &str = "KV_";

fn transport<E: std::fmt::Display>(err: E) -> CobraError {
    CobraError::Transport(err.to_string())
}

fn is_missing(err: &jetstream::Error) -> bool {
    let code = err.error_code();
    code == jetstream::ErrorCode::STREAM_NOT_FOUND || code == jetstream::ErrorCode::CONSUMER_NOT_FOUND
}

/// Stream lookups and deletes share one error type
fn stream_error(name: &str, err: GetStreamError) -> CobraError {
    match err.kind() {
        GetStreamErrorKind::JetStream(inner) if is_missing(&inner) => {
            CobraError::NotFound(format!("stream {name} not found"))
        }
        _ => transport(err),
    }
}

fn consumer_error(stream_name: &str, name: &str, err: stream::ConsumerError) -> CobraError {
    match err.kind() {
        stream::ConsumerErrorKind::JetStream(inner) if is_missing(&inner) => {
            CobraError::NotFound(format!("consumer {name} on stream {stream_name} not found"))
        }
        _ => transport(err),
    }
}

/// Bucket errors wrap the failed stream call as their source
fn missing_stream_source(source: Option<&(dyn std::error::Error + 'static)>) -> bool {
    source
        .and_then(|source| source.downcast_ref::<GetStreamError>())
        .is_some_and(|inner| {
            matches!(inner.kind(), GetStreamErrorKind::JetStream(api) if is_missing(&api))
        })
}

fn bucket_error(bucket: &str, err: KeyValueError) -> CobraError {
    if missing_stream_source(std::error::Error::source(&err)) {
        CobraError::NotFound(format!("bucket {bucket} not found"))
    } else {
        transport(err)
    }
}

/// Stream and consumer administration
pub struct JetStreamManagement {
    context: Context,
}

impl JetStreamManagement {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    async fn stream(&self, name: &str) -> Result<stream::Stream> {
        self.context
            .get_stream(name)
            .await
            .map_err(|e| stream_error(name, e))
    }
}

#[async_trait]
impl ManagementClient for JetStreamManagement {
    async fn list_streams(&self) -> Result<Vec<StreamInfo>> {
        let infos: Vec<stream::Info> = self
            .context
            .streams()
            .try_collect()
            .await
            .map_err(transport)?;
        Ok(infos.iter().map(stream_info_from).collect())
    }

    async fn add_stream(&self, config: StreamConfig) -> Result<StreamInfo> {
        debug!(target: "nats", stream = %config.name, "Creating stream");
        let stream = self
            .context
            .create_stream(stream_config_into(&config))
            .await
            .map_err(transport)?;
        Ok(stream_info_from(stream.cached_info()))
    }

    async fn delete_stream(&self, name: &str) -> Result<bool> {
        let status = self
            .context
            .delete_stream(name)
            .await
            .map_err(|e| stream_error(name, e))?;
        Ok(status.success)
    }

    async fn stream_info(&self, name: &str) -> Result<StreamInfo> {
        let mut stream = self.stream(name).await?;
        let info = stream.info().await.map_err(transport)?;
        Ok(stream_info_from(info))
    }

    async fn list_consumers(&self, stream_name: &str) -> Result<Vec<ConsumerInfo>> {
        let stream = self.stream(stream_name).await?;
        let infos: Vec<consumer::Info> = stream.consumers().try_collect().await.map_err(transport)?;
        Ok(infos.iter().map(consumer_info_from).collect())
    }

    async fn add_consumer(&self, stream_name: &str, config: ConsumerConfig) -> Result<ConsumerInfo> {
        let stream = self.stream(stream_name).await?;
        let consumer: consumer::Consumer<consumer::Config> = stream
            .create_consumer(consumer_config_into(&config))
            .await
            .map_err(transport)?;
        Ok(consumer_info_from(consumer.cached_info()))
    }

    async fn delete_consumer(&self, stream_name: &str, consumer: &str) -> Result<bool> {
        let stream = self.stream(stream_name).await?;
        let status = stream
            .delete_consumer(consumer)
            .await
            .map_err(|e| consumer_error(stream_name, consumer, e))?;
        Ok(status.success)
    }
}

/// Key-value buckets and JetStream publish
pub struct JetStreamData {
    context: Context,
}

impl JetStreamData {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    async fn store(&self, bucket: &str) -> Result<kv::Store> {
        self.context
            .get_key_value(bucket)
            .await
            .map_err(|e| bucket_error(bucket, e))
    }
}

#[async_trait]
impl DataClient for JetStreamData {
    async fn list_buckets(&self) -> Result<Vec<KvStatus>> {
        let names: Vec<String> = self
            .context
            .stream_names()
            .try_collect()
            .await
            .map_err(transport)?;

        let mut statuses = Vec::new();
        for name in names {
            if let Some(bucket) = name.strip_prefix(KV_STREAM_PREFIX) {
                statuses.push(self.bucket_status(bucket).await?);
            }
        }
        Ok(statuses)
    }

    async fn create_bucket(&self, config: KvConfig) -> Result<KvStatus> {
        debug!(target: "nats", bucket = %config.bucket, "Creating bucket");
        let store = self
            .context
            .create_key_value(kv::Config {
                bucket: config.bucket.clone(),
                description: config.description.clone().unwrap_or_default(),
                history: config.history,
                max_age: Duration::from_secs(config.max_age_secs),
                storage: storage_into(config.storage),
                num_replicas: config.replicas,
                ..Default::default()
            })
            .await
            .map_err(transport)?;
        let status = store.status().await.map_err(transport)?;
        Ok(kv_status_from(&status.bucket, &status.info))
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.context
            .delete_key_value(bucket)
            .await
            .map_err(|e| bucket_error(bucket, e))?;
        Ok(())
    }

    async fn bucket_status(&self, bucket: &str) -> Result<KvStatus> {
        let store = self.store(bucket).await?;
        let status = store.status().await.map_err(transport)?;
        Ok(kv_status_from(&status.bucket, &status.info))
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let store = self.store(bucket).await?;
        let keys = store.keys().await.map_err(transport)?;
        Box::pin(keys).try_collect().await.map_err(transport)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<KvEntry>> {
        let store = self.store(bucket).await?;
        let entry = store.entry(key).await.map_err(transport)?;
        Ok(entry.map(|entry| KvEntry {
            key: entry.key,
            value: String::from_utf8_lossy(&entry.value).into_owned(),
            revision: entry.revision,
            created: rfc3339(entry.created),
            delta: entry.delta,
            operation: match entry.operation {
                kv::Operation::Put => KvOperation::Put,
                kv::Operation::Delete => KvOperation::Del,
                kv::Operation::Purge => KvOperation::Purge,
            },
        }))
    }

    async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<u64> {
        let store = self.store(bucket).await?;
        store.put(key, value).await.map_err(transport)
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishAck> {
        let ack = self
            .context
            .publish(subject.to_string(), payload)
            .await
            .map_err(transport)?
            .await
            .map_err(transport)?;
        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }
}

fn rfc3339(time: time::OffsetDateTime) -> String {
    chrono::DateTime::from_timestamp(time.unix_timestamp(), time.nanosecond())
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn stream_info_from(info: &stream::Info) -> StreamInfo {
    StreamInfo {
        config: stream_config_from(&info.config),
        created: rfc3339(info.created),
        state: StreamState {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_seq: info.state.first_sequence,
            last_seq: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        },
    }
}

fn stream_config_from(config: &stream::Config) -> StreamConfig {
    StreamConfig {
        name: config.name.clone(),
        description: config.description.clone(),
        subjects: config.subjects.clone(),
        retention: match config.retention {
            stream::RetentionPolicy::Limits => RetentionPolicy::Limits,
            stream::RetentionPolicy::Interest => RetentionPolicy::Interest,
            stream::RetentionPolicy::WorkQueue => RetentionPolicy::WorkQueue,
        },
        storage: storage_from(&config.storage),
        max_msgs: config.max_messages,
        max_bytes: config.max_bytes,
        max_age_secs: config.max_age.as_secs(),
        discard: match config.discard {
            stream::DiscardPolicy::Old => DiscardPolicy::Old,
            stream::DiscardPolicy::New => DiscardPolicy::New,
        },
        num_replicas: config.num_replicas,
        no_ack: config.no_ack,
        duplicate_window_secs: Some(config.duplicate_window.as_secs()).filter(|s| *s > 0),
    }
}

fn stream_config_into(config: &StreamConfig) -> stream::Config {
    stream::Config {
        name: config.name.clone(),
        description: config.description.clone(),
        subjects: config.subjects.clone(),
        retention: match config.retention {
            RetentionPolicy::Limits => stream::RetentionPolicy::Limits,
            RetentionPolicy::Interest => stream::RetentionPolicy::Interest,
            RetentionPolicy::WorkQueue => stream::RetentionPolicy::WorkQueue,
        },
        storage: storage_into(config.storage),
        max_messages: config.max_msgs,
        max_bytes: config.max_bytes,
        max_age: Duration::from_secs(config.max_age_secs),
        discard: match config.discard {
            DiscardPolicy::Old => stream::DiscardPolicy::Old,
            DiscardPolicy::New => stream::DiscardPolicy::New,
        },
        num_replicas: config.num_replicas,
        no_ack: config.no_ack,
        duplicate_window: config
            .duplicate_window_secs
            .map(Duration::from_secs)
            .unwrap_or_default(),
        ..Default::default()
    }
}

fn storage_from(storage: &stream::StorageType) -> StorageType {
    match storage {
        stream::StorageType::File => StorageType::File,
        stream::StorageType::Memory => StorageType::Memory,
    }
}

fn storage_into(storage: StorageType) -> stream::StorageType {
    match storage {
        StorageType::File => stream::StorageType::File,
        StorageType::Memory => stream::StorageType::Memory,
    }
}

fn consumer_info_from(info: &consumer::Info) -> ConsumerInfo {
    ConsumerInfo {
        stream_name: info.stream_name.clone(),
        name: info.name.clone(),
        created: rfc3339(info.created),
        config: consumer_config_from(&info.config),
        delivered: SequenceInfo {
            consumer_seq: info.delivered.consumer_sequence,
            stream_seq: info.delivered.stream_sequence,
        },
        ack_floor: SequenceInfo {
            consumer_seq: info.ack_floor.consumer_sequence,
            stream_seq: info.ack_floor.stream_sequence,
        },
        num_pending: info.num_pending,
        num_redelivered: info.num_redelivered,
        num_waiting: info.num_waiting,
        num_ack_pending: info.num_ack_pending,
    }
}

fn consumer_config_from(config: &consumer::Config) -> ConsumerConfig {
    let positive = |v: i64| Some(v).filter(|v| *v > 0);
    let seconds = |d: Duration| Some(d.as_secs()).filter(|s| *s > 0);
    ConsumerConfig {
        durable_name: config.durable_name.clone(),
        description: config.description.clone(),
        deliver_subject: config.deliver_subject.clone(),
        deliver_group: config.deliver_group.clone(),
        deliver_policy: match config.deliver_policy {
            consumer::DeliverPolicy::Last => DeliverPolicy::Last,
            consumer::DeliverPolicy::New => DeliverPolicy::New,
            consumer::DeliverPolicy::LastPerSubject => DeliverPolicy::LastPerSubject,
            // Start-sequence and start-time policies are shown as "all"
            _ => DeliverPolicy::All,
        },
        ack_policy: match config.ack_policy {
            consumer::AckPolicy::None => AckPolicy::None,
            consumer::AckPolicy::All => AckPolicy::All,
            consumer::AckPolicy::Explicit => AckPolicy::Explicit,
        },
        ack_wait_secs: seconds(config.ack_wait),
        max_deliver: positive(config.max_deliver),
        filter_subject: Some(config.filter_subject.clone()).filter(|s| !s.is_empty()),
        replay_policy: match config.replay_policy {
            consumer::ReplayPolicy::Instant => ReplayPolicy::Instant,
            consumer::ReplayPolicy::Original => ReplayPolicy::Original,
        },
        max_waiting: positive(config.max_waiting),
        max_ack_pending: positive(config.max_ack_pending),
        flow_control: config.flow_control,
        idle_heartbeat_secs: seconds(config.idle_heartbeat),
        headers_only: config.headers_only,
    }
}

fn consumer_config_into(config: &ConsumerConfig) -> consumer::Config {
    let mut out = consumer::Config {
        durable_name: config.durable_name.clone(),
        name: config.durable_name.clone(),
        description: config.description.clone(),
        deliver_subject: config.deliver_subject.clone(),
        deliver_group: config.deliver_group.clone(),
        deliver_policy: match config.deliver_policy {
            DeliverPolicy::All => consumer::DeliverPolicy::All,
            DeliverPolicy::Last => consumer::DeliverPolicy::Last,
            DeliverPolicy::New => consumer::DeliverPolicy::New,
            DeliverPolicy::LastPerSubject => consumer::DeliverPolicy::LastPerSubject,
        },
        ack_policy: match config.ack_policy {
            AckPolicy::None => consumer::AckPolicy::None,
            AckPolicy::All => consumer::AckPolicy::All,
            AckPolicy::Explicit => consumer::AckPolicy::Explicit,
        },
        filter_subject: config.filter_subject.clone().unwrap_or_default(),
        replay_policy: match config.replay_policy {
            ReplayPolicy::Instant => consumer::ReplayPolicy::Instant,
            ReplayPolicy::Original => consumer::ReplayPolicy::Original,
        },
        flow_control: config.flow_control,
        headers_only: config.headers_only,
        ..Default::default()
    };
    if let Some(secs) = config.ack_wait_secs {
        out.ack_wait = Duration::from_secs(secs);
    }
    if let Some(max) = config.max_deliver {
        out.max_deliver = max;
    }
    if let Some(max) = config.max_waiting {
        out.max_waiting = max;
    }
    if let Some(max) = config.max_ack_pending {
        out.max_ack_pending = max;
    }
    if let Some(secs) = config.idle_heartbeat_secs {
        out.idle_heartbeat = Duration::from_secs(secs);
    }
    out
}

fn kv_status_from(bucket: &str, info: &stream::Info) -> KvStatus {
    KvStatus {
        bucket: bucket.to_string(),
        values: info.state.messages,
        history: info.config.max_messages_per_subject,
        max_age_secs: info.config.max_age.as_secs(),
        storage: storage_from(&info.config.storage),
        replicas: info.config.num_replicas,
        bytes: info.state.bytes,
    }
}
