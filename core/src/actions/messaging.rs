use super::{validate_subject, ActionResponse, Actions};
use crate::envelope::Payload;
use crate::profile::ConnectionProfile;
use crate::transport::Headers;
use crate::types::{PublishAck, Reply};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

impl Actions {
    /// Core publish. JSON payloads are re-encoded, anything else goes out as text.
    pub async fn publish(
        &self,
        profile: &ConnectionProfile,
        subject: &str,
        payload: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> ActionResponse<()> {
        self.run("publish", async {
            validate_subject(subject)?;
            let bytes = Payload::parse(payload).to_bytes()?;
            let headers = headers
                .filter(|h| !h.is_empty())
                .map(|h| h.into_iter().collect::<Headers>());
            let connection = self.registry.get_connection(profile).await?;
            connection.publish(subject, bytes, headers).await
        })
        .await
    }

    pub async fn request(
        &self,
        profile: &ConnectionProfile,
        subject: &str,
        payload: &str,
        timeout_ms: Option<u64>,
    ) -> ActionResponse<Reply> {
        self.run("request", async {
            validate_subject(subject)?;
            let bytes = Payload::parse(payload).to_bytes()?;
            let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS));
            let connection = self.registry.get_connection(profile).await?;
            let reply = connection.request(subject, bytes, None, timeout).await?;
            Ok(Reply {
                subject: reply.subject,
                data: String::from_utf8_lossy(&reply.payload).into_owned(),
                headers: reply.headers.as_ref().map(Headers::flatten),
            })
        })
        .await
    }

    /// Publish into a stream and wait for the server's acknowledgement
    pub async fn publish_to_stream(
        &self,
        profile: &ConnectionProfile,
        subject: &str,
        payload: &str,
    ) -> ActionResponse<PublishAck> {
        self.run("publish_to_stream", async {
            validate_subject(subject)?;
            let bytes = Payload::parse(payload).to_bytes()?;
            let data = self.registry.get_data_client(profile).await?;
            data.publish(subject, bytes).await
        })
        .await
    }
}
