// Dashboard actions
//
// One method per UI operation. Each resolves its clients through the shared
// connection registry and reports the outcome as an `ActionResponse`, so
// failures reach the UI as data instead of transport errors.

mod connection;
mod kv;
mod messaging;
mod streams;

use crate::registry::ConnectionRegistry;
use crate::{CobraError, ErrorKind, Result};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of an action as seen by the UI.
///
/// Serialises to `{"success":true,"data":...}` or
/// `{"success":false,"error":"..."}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResponse<T> {
    Success(T),
    Failure { kind: ErrorKind, error: String },
}

impl<T> ActionResponse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionResponse::Success(_))
    }

    /// Error kind of a failed action
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ActionResponse::Success(_) => None,
            ActionResponse::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ActionResponse::Success(data) => Some(data),
            ActionResponse::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ActionResponse::Success(_) => None,
            ActionResponse::Failure { error, .. } => Some(error),
        }
    }
}

impl<T> From<Result<T>> for ActionResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => ActionResponse::Success(data),
            Err(e) => ActionResponse::Failure {
                kind: e.kind(),
                error: failure_message(&e),
            },
        }
    }
}

impl<T: Serialize> Serialize for ActionResponse<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ActionResponse", 2)?;
        match self {
            ActionResponse::Success(data) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
            }
            ActionResponse::Failure { error, .. } => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

/// Message shown to the user. Not-found and validation messages are already
/// phrased for display and go out without the category prefix.
fn failure_message(error: &CobraError) -> String {
    match error {
        CobraError::NotFound(message) | CobraError::Validation(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Entry point for every dashboard operation
#[derive(Clone)]
pub struct Actions {
    registry: Arc<ConnectionRegistry>,
}

impl Actions {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    async fn run<T, F>(&self, operation: &'static str, action: F) -> ActionResponse<T>
    where
        F: Future<Output = Result<T>>,
    {
        match action.await {
            Ok(data) => {
                debug!(target: "actions", operation, "Action completed");
                ActionResponse::Success(data)
            }
            Err(e) => {
                warn!(target: "actions", operation, error = %e, "Action failed");
                ActionResponse::from(Err::<T, _>(e))
            }
        }
    }
}

pub(crate) fn validate_subject(subject: &str) -> Result<()> {
    if subject.trim().is_empty() {
        return Err(CobraError::Validation("subject is required".into()));
    }
    Ok(())
}
