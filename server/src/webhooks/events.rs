//! Webhook Event Types
//!
//! Event names published to the configured webhook URL.

use serde::{Deserialize, Serialize};

/// Webhook event names, one per session event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEventType {
    /// Connection phase changed (connecting, open, close, reconnecting) or failed.
    #[serde(rename = "connection.update")]
    ConnectionUpdate,
    /// A batch of inbound messages arrived.
    #[serde(rename = "messages.upsert")]
    MessagesUpsert,
    /// Message state changed (edits, deletions, delivery status).
    #[serde(rename = "messages.update")]
    MessagesUpdate,
    /// Read/delivery receipts changed.
    #[serde(rename = "message-receipt.update")]
    MessageReceiptUpdate,
    /// History snapshot received after pairing.
    #[serde(rename = "messaging-history.set")]
    MessagingHistorySet,
}

impl WebhookEventType {
    /// Convert to the wire string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionUpdate => "connection.update",
            Self::MessagesUpsert => "messages.upsert",
            Self::MessagesUpdate => "messages.update",
            Self::MessageReceiptUpdate => "message-receipt.update",
            Self::MessagingHistorySet => "messaging-history.set",
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
