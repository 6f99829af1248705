// Cobra Core Library
// Connection registry, live monitor bridge and HTTP API for NATS/JetStream dashboards

pub mod actions;
pub mod dashboard;
pub mod envelope;
pub mod monitor;
pub mod nats;
pub mod profile;
pub mod registry;
pub mod transport;
pub mod types;

// Export core types
pub use actions::{ActionResponse, Actions};
pub use envelope::{MessageEnvelope, Payload};
pub use monitor::{MonitorBridge, MonitorConfig, MonitorEvent, MonitorRequest, MonitorSession};
pub use profile::{Auth, ConnectionProfile};
pub use registry::{ConnectionRegistry, RegistryConfig};
pub use transport::{Connection, Connector, DataClient, Headers, InboundMessage, ManagementClient};

// Error types
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CobraError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Discriminant of a [`CobraError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    NotFound,
    Validation,
    Transport,
    Serialization,
}

impl CobraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CobraError::Connection(_) => ErrorKind::Connection,
            CobraError::Timeout(_) => ErrorKind::Timeout,
            CobraError::NotFound(_) => ErrorKind::NotFound,
            CobraError::Validation(_) => ErrorKind::Validation,
            CobraError::Transport(_) => ErrorKind::Transport,
            CobraError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

pub type Result<T> = std::result::Result<T, CobraError>;
