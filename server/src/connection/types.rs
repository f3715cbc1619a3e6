//! Connection Types

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::SessionHandle;
use crate::webhooks::WebhookTarget;

/// Default browser name shown in the linked-devices list.
pub const DEFAULT_CLIENT_NAME: &str = "Chrome";

const fn default_true() -> bool {
    true
}

fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.to_string()
}

/// Per-connection options, persisted with the auth state so the connection
/// can be recreated at boot.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default = "default_client_name")]
    pub client_name: String,
    pub webhook_url: String,
    pub webhook_verify_token: String,
    /// Attach downloaded media to inbound message webhooks.
    #[serde(default = "default_true")]
    pub include_media: bool,
    /// Ask for the full history on pairing and forward history snapshots.
    #[serde(default)]
    pub sync_full_history: bool,
    /// Set when the connection is restored at boot.
    #[serde(skip)]
    pub is_reconnect: bool,
}

impl ConnectionOptions {
    pub fn new(webhook_url: impl Into<String>, webhook_verify_token: impl Into<String>) -> Self {
        Self {
            client_name: default_client_name(),
            webhook_url: webhook_url.into(),
            webhook_verify_token: webhook_verify_token.into(),
            include_media: true,
            sync_full_history: false,
            is_reconnect: false,
        }
    }

    pub fn webhook_target(&self) -> WebhookTarget {
        WebhookTarget {
            url: self.webhook_url.clone(),
            verify_token: self.webhook_verify_token.clone(),
        }
    }

    /// Check the options before a connection is created.
    pub fn validate(&self) -> Result<(), String> {
        let url = self.webhook_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err("webhookUrl must be an http(s) URL".into());
        }
        if self.webhook_verify_token.is_empty() {
            return Err("webhookVerifyToken is required".into());
        }
        if self.client_name.trim().is_empty() {
            return Err("clientName must not be empty".into());
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("client_name", &self.client_name)
            .field("webhook_url", &self.webhook_url)
            .field("webhook_verify_token", &"***")
            .field("include_media", &self.include_media)
            .field("sync_full_history", &self.sync_full_history)
            .field("is_reconnect", &self.is_reconnect)
            .finish()
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition. Staying put is legal
    /// except out of `Closed`, which has no exits at all.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Closed, Connecting, Idle, Open, Reconnecting};
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Idle | Connecting)
            | (Connecting, Connecting | Open | Reconnecting)
            | (Open, Open | Reconnecting)
            | (Reconnecting, Reconnecting | Connecting | Open) => true,
            _ => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live session slot. Commands are only reachable through `Active`.
#[derive(Clone, Default)]
pub enum Session {
    #[default]
    NoSession,
    Active {
        handle: Arc<dyn SessionHandle>,
        /// Generation the handle was opened with; events from older
        /// generations are dropped.
        generation: u64,
    },
}

impl Session {
    pub fn handle(&self) -> Option<&Arc<dyn SessionHandle>> {
        match self {
            Self::Active { handle, .. } => Some(handle),
            Self::NoSession => None,
        }
    }

    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Leave `NoSession` behind and return the handle that was active.
    pub fn take(&mut self) -> Option<Arc<dyn SessionHandle>> {
        match std::mem::take(self) {
            Self::Active { handle, .. } => Some(handle),
            Self::NoSession => None,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => f.write_str("NoSession"),
            Self::Active { generation, .. } => f
                .debug_struct("Active")
                .field("generation", generation)
                .finish_non_exhaustive(),
        }
    }
}
