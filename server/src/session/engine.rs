//! Session Engine Contract
//!
//! The engine owns pairing, encryption and the wire protocol of one account.
//! The relay only sees it through [`SessionEngine`] (open a session) and
//! [`SessionHandle`] (commands on a live session), plus the typed
//! [`SessionEvent`] stream a session produces.

use std::sync::Arc;

use async_trait::async_trait;
use relay_common::{JidFilter, PhoneNumber, Presence};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use super::version::ClientVersion;

/// Session engine failures.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Engine connection failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Engine rejected {command}: {message}")]
    Command { command: String, message: String },

    #[error("Session closed")]
    Closed,

    /// The engine did not answer within the allotted time.
    #[error("Engine timed out during {0}")]
    Timeout(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

/// Coarse lifecycle label reported by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
    /// Only produced by the relay, never by the engine.
    Reconnecting,
}

/// Why a session closed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDisconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Connection-phase update as reported by the engine and forwarded to the
/// webhook after interpretation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionPhase>,
    /// Outer `Some` when the field is present at all; inner `None` when it
    /// is present but null.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub qr: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<LastDisconnect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new_login: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    /// Established identity (session user id), when the engine reports it.
    #[serde(default, skip_serializing)]
    pub me: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl ConnectionUpdate {
    pub fn phase(phase: ConnectionPhase) -> Self {
        Self {
            connection: Some(phase),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// `qr` is present with a null or empty value.
    pub fn has_empty_qr(&self) -> bool {
        matches!(&self.qr, Some(None)) || matches!(&self.qr, Some(Some(qr)) if qr.is_empty())
    }

    /// Non-empty QR challenge, if any.
    pub fn qr_challenge(&self) -> Option<&str> {
        match &self.qr {
            Some(Some(qr)) if !qr.is_empty() => Some(qr),
            _ => None,
        }
    }

    pub fn is_new_login(&self) -> bool {
        self.is_new_login.unwrap_or(false)
    }

    pub fn is_online(&self) -> bool {
        self.is_online.unwrap_or(false)
    }
}

/// Credentials and signal keys needed to resume a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    #[serde(default)]
    pub creds: Option<Value>,
    #[serde(default)]
    pub keys: Map<String, Value>,
}

/// Incremental change to an [`AuthState`]. A `null` key value deletes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub keys: Map<String, Value>,
}

/// Batch of inbound messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBatch {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Event produced by a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(ConnectionUpdate),
    #[serde(rename = "creds.update")]
    CredsUpdate(AuthUpdate),
    #[serde(rename = "messages.upsert")]
    MessagesReceived(MessageBatch),
    #[serde(rename = "messages.update")]
    MessagesChanged(Value),
    #[serde(rename = "message-receipt.update")]
    ReceiptChanged(Value),
    #[serde(rename = "messaging-history.set")]
    HistorySnapshot(Value),
}

impl SessionEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectionUpdate(_) => "connection.update",
            Self::CredsUpdate(_) => "creds.update",
            Self::MessagesReceived(_) => "messages.upsert",
            Self::MessagesChanged(_) => "messages.update",
            Self::ReceiptChanged(_) => "message-receipt.update",
            Self::HistorySnapshot(_) => "messaging-history.set",
        }
    }
}

/// Options a session is opened with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Browser name shown in the linked-devices list.
    pub client_name: String,
    pub sync_full_history: bool,
    pub mark_online_on_connect: bool,
    pub jid_filter: JidFilter,
    /// `None` lets the engine use its built-in version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<ClientVersion>,
}

/// Profile picture resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PictureKind {
    #[default]
    Preview,
    Image,
}

/// A freshly opened session: its command handle and event stream.
pub struct OpenedSession {
    pub handle: Arc<dyn SessionHandle>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Opens sessions.
#[async_trait]
pub trait SessionEngine: Send + Sync {
    /// Latest client version advertised upstream.
    async fn latest_client_version(&self) -> Result<ClientVersion, SessionError>;

    async fn open(
        &self,
        phone: &PhoneNumber,
        auth: AuthState,
        options: SessionOptions,
    ) -> Result<OpenedSession, SessionError>;
}

/// Commands on a live session.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Authenticated user id (`<digits>:<device>@s.whatsapp.net`), once paired.
    fn user_id(&self) -> Option<String>;

    /// Unlink the device upstream.
    async fn logout(&self) -> Result<(), SessionError>;

    /// Drop the session without unlinking. No further events are produced.
    async fn close(&self);

    async fn send_message(&self, jid: &str, content: Value) -> Result<Value, SessionError>;

    async fn send_presence(
        &self,
        presence: Presence,
        to_jid: Option<&str>,
    ) -> Result<(), SessionError>;

    async fn read_messages(&self, keys: &[Value]) -> Result<(), SessionError>;

    async fn chat_modify(&self, modification: Value, jid: &str) -> Result<Value, SessionError>;

    async fn fetch_message_history(
        &self,
        count: u32,
        oldest_key: Value,
        oldest_timestamp: i64,
    ) -> Result<Value, SessionError>;

    async fn send_receipts(&self, keys: &[Value], receipt_type: &str) -> Result<(), SessionError>;

    async fn profile_picture_url(
        &self,
        jid: &str,
        kind: PictureKind,
    ) -> Result<Option<String>, SessionError>;

    async fn on_whatsapp(&self, jids: &[String]) -> Result<Value, SessionError>;

    /// Download and decrypt a message's media. `None` when it has none.
    async fn download_media(&self, message: &Value) -> Result<Option<Vec<u8>>, SessionError>;
}
