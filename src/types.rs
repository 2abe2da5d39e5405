use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;
use ts_rs::TS;

use crate::notifications::{Notification, NotificationKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, TS)]
pub enum Role {
    Admin,
    Staff,
    Customer,
    #[default]
    Unknown,
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" | "administrator" => Self::Admin,
            "staff" | "employee" => Self::Staff,
            "customer" | "user" => Self::Customer,
            _ => Self::Unknown,
        }
    }
}

// Backends disagree on role casing, so accept any string instead of exact variant names.
impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Role::parse).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
}

/// What the UI is allowed to see of the session. Never carries tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub profile: Option<Profile>,
}

impl SessionSnapshot {
    pub fn anonymous() -> Self {
        Self {
            status: SessionStatus::Anonymous,
            profile: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"REDACTED")
            .field("refresh_token", &"REDACTED")
            .finish()
    }
}

/// `data` payload of the login and refresh endpoints.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub profile: Profile,
}

impl AuthPayload {
    pub fn token_pair(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.trim().to_string(),
            refresh_token: self.refresh_token.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "title")]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

pub fn export_bindings(dir: &Path) -> Result<(), ts_rs::ExportError> {
    SessionSnapshot::export_all_to(dir)?;
    Notification::export_all_to(dir)?;
    NotificationKind::export_all_to(dir)?;
    Ok(())
}
