mod backoff;
mod channel;
mod hub;

use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;

pub use backoff::ReconnectPolicy;
pub use channel::{ChannelError, HttpPushConnector, PushConnector, PushStream, NOTIFICATIONS_PATH};
pub use hub::{HubHandle, NotificationHub};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    OrderPlaced,
    OrderCompleted,
    OrderCancelled,
    Announcement,
    /// Any kind this client does not know yet.
    Other,
}

impl NotificationKind {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "orderPlaced" => Self::OrderPlaced,
            "orderCompleted" => Self::OrderCompleted,
            "orderCancelled" => Self::OrderCancelled,
            "announcement" => Self::Announcement,
            _ => Self::Other,
        }
    }
}

// Servers add kinds over time; unknown names must not fail the whole event.
impl<'de> Deserialize<'de> for NotificationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One event pushed by the server, e.g. "order 1042 completed".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Notification {
    pub fn summary(&self) -> String {
        let label = match self.kind {
            NotificationKind::OrderPlaced => "New order",
            NotificationKind::OrderCompleted => "Order completed",
            NotificationKind::OrderCancelled => "Order cancelled",
            NotificationKind::Announcement => "Announcement",
            NotificationKind::Other => "Notification",
        };
        match (&self.order_id, self.message.as_deref().map(str::trim)) {
            (Some(id), Some(msg)) if !msg.is_empty() => format!("{label} #{id}: {msg}"),
            (Some(id), _) => format!("{label} #{id}"),
            (None, Some(msg)) if !msg.is_empty() => format!("{label}: {msg}"),
            _ => label.to_string(),
        }
    }
}
