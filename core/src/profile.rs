// Connection profiles
//
// A profile identifies one target cluster. Profiles are created by the UI and
// passed by value into every registry and action call.

use crate::{CobraError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials presented when dialing a cluster
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Auth {
    #[default]
    None,
    UserPassword {
        user: String,
        pass: String,
    },
    Token(String),
}

// Secrets never reach the logs.
impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::UserPassword { user, .. } => f
                .debug_struct("UserPassword")
                .field("user", user)
                .field("pass", &"***")
                .finish(),
            Auth::Token(_) => f.write_str("Token(***)"),
        }
    }
}

/// Target cluster description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ProfileWire", into = "ProfileWire")]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
    pub servers: Vec<String>,
    pub auth: Auth,
}

impl ConnectionProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, servers: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            servers,
            auth: Auth::None,
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CobraError::Validation("connection id is empty".into()));
        }
        if self.servers.iter().all(|s| s.trim().is_empty()) {
            return Err(CobraError::Validation(format!(
                "connection {} has no server urls",
                self.id
            )));
        }
        Ok(())
    }
}

// JSON shape used by the dashboard UI store
#[derive(Serialize, Deserialize)]
struct ProfileWire {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    servers: Vec<String>,
    #[serde(rename = "authType", default)]
    auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum AuthType {
    #[default]
    None,
    UserPass,
    Token,
}

impl From<ProfileWire> for ConnectionProfile {
    fn from(wire: ProfileWire) -> Self {
        let auth = match wire.auth_type {
            AuthType::None => Auth::None,
            AuthType::UserPass => Auth::UserPassword {
                user: wire.user.unwrap_or_default(),
                pass: wire.pass.unwrap_or_default(),
            },
            AuthType::Token => Auth::Token(wire.token.unwrap_or_default()),
        };
        Self {
            id: wire.id,
            name: wire.name,
            servers: wire.servers,
            auth,
        }
    }
}

impl From<ConnectionProfile> for ProfileWire {
    fn from(profile: ConnectionProfile) -> Self {
        let (auth_type, user, pass, token) = match profile.auth {
            Auth::None => (AuthType::None, None, None, None),
            Auth::UserPassword { user, pass } => (AuthType::UserPass, Some(user), Some(pass), None),
            Auth::Token(token) => (AuthType::Token, None, None, Some(token)),
        };
        Self {
            id: profile.id,
            name: profile.name,
            servers: profile.servers,
            auth_type,
            user,
            pass,
            token,
        }
    }
}
