use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::transport::InboundMessage;
use crate::Result;

/// Outgoing payload, classified once at the publish boundary.
///
/// Text typed into the dashboard is published as JSON when it parses as JSON
/// (re-encoded compactly) and as raw UTF-8 otherwise.
///
/// # Examples
///
/// ```
/// use cobra_core::envelope::Payload;
///
/// let json = Payload::parse(r#"{ "id": 1 }"#);
/// assert!(matches!(json, Payload::Json(_)));
/// assert_eq!(json.to_bytes().unwrap().as_ref(), br#"{"id":1}"#);
///
/// let text = Payload::parse("hello");
/// assert_eq!(text, Payload::Text("hello".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
}

impl Payload {
    pub fn parse(input: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(input) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(input.to_string()),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        match self {
            Payload::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Payload::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
        }
    }
}

/// A message observed on a monitored subject, as relayed to the UI.
///
/// # Fields
///
/// * `timestamp` - Capture time in milliseconds since epoch
/// * `subject` - Concrete subject the message was published to
/// * `data` - Payload decoded as UTF-8 (lossy)
/// * `size` - Payload length in bytes
/// * `headers` - First value of each header, omitted when the message had none
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub timestamp: i64,
    pub subject: String,
    pub data: String,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl MessageEnvelope {
    /// Build an envelope stamped with the current time
    pub fn from_message(message: &InboundMessage) -> Self {
        Self::captured_at(message, chrono::Utc::now().timestamp_millis())
    }

    pub fn captured_at(message: &InboundMessage, timestamp: i64) -> Self {
        Self {
            timestamp,
            subject: message.subject.clone(),
            data: String::from_utf8_lossy(&message.payload).into_owned(),
            size: message.payload.len(),
            headers: message.headers.as_ref().map(|h| h.flatten()),
        }
    }
}
