//! Session Engine Bridge
//!
//! Talks to an out-of-process session engine over one WebSocket per session
//! (`{ENGINE_URL}/sessions/{digits}`).
//!
//! Frames sent:
//! - `{"type":"start","phone","auth","options"}` once, right after connecting
//! - `{"type":"command","id","command","args"}` for every command
//! - `{"type":"close"}` when the relay drops the session
//!
//! Frames received:
//! - `{"type":"event","event","data"}` session events
//! - `{"type":"response","id","result"|"error"}` command replies, matched to
//!   their command by `id`
//!
//! An unexpected disconnect is reported as a `close` connection update so
//! the connection reconnects like after any other transient failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use relay_common::{PhoneNumber, Presence};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::engine::{
    AuthState, ConnectionPhase, ConnectionUpdate, LastDisconnect, OpenedSession, PictureKind,
    SessionEngine, SessionError, SessionEvent, SessionHandle, SessionOptions,
};
use super::version::ClientVersion;

/// Status code reported when the engine socket drops unexpectedly.
const CONNECTION_LOST_STATUS: u16 = 428;

/// Default bound on the WebSocket handshake plus the start frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on a single command round trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Frames sent to the engine.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundFrame {
    Start {
        phone: String,
        auth: AuthState,
        options: SessionOptions,
    },
    Command {
        id: u64,
        command: &'static str,
        args: Value,
    },
    Close,
}

/// Reply to a command frame.
#[derive(Debug, Deserialize)]
struct ResponseFrame {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Frames received from the engine.
#[derive(Debug)]
enum InboundFrame {
    Event(SessionEvent),
    Response(ResponseFrame),
}

fn parse_frame(text: &str) -> Result<Option<InboundFrame>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    match value.get("type").and_then(Value::as_str) {
        Some("event") => Ok(Some(InboundFrame::Event(serde_json::from_value(value)?))),
        Some("response") => Ok(Some(InboundFrame::Response(serde_json::from_value(value)?))),
        _ => Ok(None),
    }
}

/// Turn a WebSocket base URL into its HTTP counterpart.
fn http_base(ws_url: &str) -> String {
    let base = ws_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        base.to_string()
    }
}

fn session_url(ws_url: &str, phone: &PhoneNumber) -> String {
    format!("{}/sessions/{}", ws_url.trim_end_matches('/'), phone.digits())
}

/// [`SessionEngine`] backed by a remote engine process.
#[derive(Clone)]
pub struct BridgeEngine {
    url: String,
    http: reqwest::Client,
    handshake_timeout: Duration,
    command_timeout: Duration,
}

impl BridgeEngine {
    pub fn new(url: impl Into<String>) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// Override the handshake and command timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, handshake: Duration, command: Duration) -> Self {
        self.handshake_timeout = handshake;
        self.command_timeout = command;
        self
    }

    async fn handshake(
        &self,
        url: &str,
        phone: &PhoneNumber,
        auth: AuthState,
        options: SessionOptions,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, SessionError> {
        let (mut stream, _) = connect_async(url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let start = OutboundFrame::Start {
            phone: phone.as_str().to_string(),
            auth,
            options,
        };
        stream
            .send(Message::Text(serde_json::to_string(&start)?.into()))
            .await?;
        Ok(stream)
    }
}

#[derive(Deserialize)]
struct VersionResponse {
    version: ClientVersion,
}

#[async_trait]
impl SessionEngine for BridgeEngine {
    async fn latest_client_version(&self) -> Result<ClientVersion, SessionError> {
        let url = format!("{}/version", http_base(&self.url));
        let response: VersionResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.version)
    }

    async fn open(
        &self,
        phone: &PhoneNumber,
        auth: AuthState,
        options: SessionOptions,
    ) -> Result<OpenedSession, SessionError> {
        let url = session_url(&self.url, phone);
        let stream = tokio::time::timeout(
            self.handshake_timeout,
            self.handshake(&url, phone, auth, options),
        )
        .await
        .map_err(|_| {
            warn!(
                phone = %phone,
                timeout_ms = self.handshake_timeout.as_millis() as u64,
                "Engine handshake timed out"
            );
            SessionError::Timeout("handshake".into())
        })??;
        info!(phone = %phone, "Engine session started");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SharedState::default());

        tokio::spawn(run_session(
            phone.clone(),
            stream,
            cmd_rx,
            events_tx,
            shared.clone(),
        ));

        let handle = BridgeHandle {
            phone: phone.clone(),
            cmd_tx,
            shared,
            command_timeout: self.command_timeout,
        };
        Ok(OpenedSession {
            handle: Arc::new(handle),
            events: events_rx,
        })
    }
}

#[derive(Default)]
struct SharedState {
    user_id: RwLock<Option<String>>,
    closing: AtomicBool,
    next_id: AtomicU64,
}

impl SharedState {
    fn set_user_id(&self, user_id: String) {
        if let Ok(mut guard) = self.user_id.write() {
            *guard = Some(user_id);
        }
    }

    /// Track the authenticated identity from events that carry it.
    fn observe(&self, event: &SessionEvent) {
        match event {
            SessionEvent::ConnectionUpdate(update) => {
                if let Some(me) = &update.me {
                    self.set_user_id(me.clone());
                }
            }
            SessionEvent::CredsUpdate(update) => {
                let id = update
                    .creds
                    .as_ref()
                    .and_then(|creds| creds.pointer("/me/id"))
                    .and_then(Value::as_str);
                if let Some(id) = id {
                    self.set_user_id(id.to_string());
                }
            }
            _ => {}
        }
    }
}

type Reply = oneshot::Sender<Result<Value, SessionError>>;

struct Outgoing {
    frame: OutboundFrame,
    reply: Option<Reply>,
}

/// Socket loop of one session: forwards commands, routes replies and events.
async fn run_session(
    phone: PhoneNumber,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut cmd_rx: mpsc::UnboundedReceiver<Outgoing>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    shared: Arc<SharedState>,
) {
    let (mut write, mut read) = stream.split();
    let mut pending: HashMap<u64, Reply> = HashMap::new();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_frame(text.as_str()) {
                        Ok(Some(InboundFrame::Event(event))) => {
                            shared.observe(&event);
                            debug!(phone = %phone, event = event.name(), "Engine event");
                            if events_tx.send(event).is_err() {
                                debug!(phone = %phone, "Event receiver dropped");
                            }
                        }
                        Ok(Some(InboundFrame::Response(response))) => {
                            if let Some(reply) = pending.remove(&response.id) {
                                let result = match response.error {
                                    Some(message) => Err(SessionError::Command {
                                        command: format!("command #{}", response.id),
                                        message,
                                    }),
                                    None => Ok(response.result),
                                };
                                let _ = reply.send(result);
                            } else {
                                warn!(phone = %phone, id = response.id, "Reply for unknown command");
                            }
                        }
                        Ok(None) => debug!(phone = %phone, "Ignoring untyped engine frame"),
                        Err(e) => warn!(phone = %phone, error = %e, "Failed to parse engine frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            warn!(phone = %phone, error = %e, "Failed to send pong");
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(phone = %phone, "Engine closed session socket");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(phone = %phone, error = %e, "Engine socket error");
                        break;
                    }
                    None => break,
                    Some(Ok(_)) => {}
                }
            }

            outgoing = cmd_rx.recv() => {
                let Some(outgoing) = outgoing else {
                    // Every handle is gone
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let is_close = matches!(outgoing.frame, OutboundFrame::Close);
                let id = match &outgoing.frame {
                    OutboundFrame::Command { id, .. } => Some(*id),
                    _ => None,
                };

                let sent = match serde_json::to_string(&outgoing.frame) {
                    Ok(json) => write.send(Message::Text(json.into())).await.map_err(SessionError::from),
                    Err(e) => Err(SessionError::from(e)),
                };

                match (sent, outgoing.reply, id) {
                    (Ok(()), Some(reply), Some(id)) => {
                        pending.insert(id, reply);
                    }
                    (Err(e), Some(reply), _) => {
                        let _ = reply.send(Err(e));
                    }
                    (Err(e), None, _) => {
                        warn!(phone = %phone, error = %e, "Failed to send frame to engine");
                    }
                    _ => {}
                }

                if is_close {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(SessionError::Closed));
    }

    if !shared.closing.load(Ordering::SeqCst) {
        warn!(phone = %phone, "Engine session socket lost");
        let update = ConnectionUpdate {
            connection: Some(ConnectionPhase::Close),
            last_disconnect: Some(LastDisconnect {
                status_code: Some(CONNECTION_LOST_STATUS),
                message: Some("Engine connection lost".into()),
                ..LastDisconnect::default()
            }),
            ..ConnectionUpdate::default()
        };
        let _ = events_tx.send(SessionEvent::ConnectionUpdate(update));
    }
}

/// [`SessionHandle`] for a bridged session.
pub struct BridgeHandle {
    phone: PhoneNumber,
    cmd_tx: mpsc::UnboundedSender<Outgoing>,
    shared: Arc<SharedState>,
    command_timeout: Duration,
}

impl BridgeHandle {
    async fn request(&self, command: &'static str, args: Value) -> Result<Value, SessionError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Outgoing {
                frame: OutboundFrame::Command { id, command, args },
                reply: Some(reply_tx),
            })
            .map_err(|_| SessionError::Closed)?;

        debug!(phone = %self.phone, command, id, "Engine command sent");
        // A late reply finds its receiver gone and is dropped by the socket loop
        let reply = tokio::time::timeout(self.command_timeout, reply_rx)
            .await
            .map_err(|_| {
                warn!(
                    phone = %self.phone,
                    command,
                    id,
                    timeout_ms = self.command_timeout.as_millis() as u64,
                    "Engine command timed out"
                );
                SessionError::Timeout(command.to_string())
            })?;
        reply
            .map_err(|_| SessionError::Closed)?
            .map_err(|e| match e {
                SessionError::Command { message, .. } => SessionError::Command {
                    command: command.to_string(),
                    message,
                },
                other => other,
            })
    }
}

#[async_trait]
impl SessionHandle for BridgeHandle {
    fn user_id(&self) -> Option<String> {
        self.shared
            .user_id
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.request("logout", json!({})).await.map(|_| ())
    }

    async fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Outgoing {
            frame: OutboundFrame::Close,
            reply: None,
        });
    }

    async fn send_message(&self, jid: &str, content: Value) -> Result<Value, SessionError> {
        self.request("sendMessage", json!({ "jid": jid, "content": content }))
            .await
    }

    async fn send_presence(
        &self,
        presence: Presence,
        to_jid: Option<&str>,
    ) -> Result<(), SessionError> {
        self.request(
            "sendPresenceUpdate",
            json!({ "type": presence, "toJid": to_jid }),
        )
        .await
        .map(|_| ())
    }

    async fn read_messages(&self, keys: &[Value]) -> Result<(), SessionError> {
        self.request("readMessages", json!({ "keys": keys }))
            .await
            .map(|_| ())
    }

    async fn chat_modify(&self, modification: Value, jid: &str) -> Result<Value, SessionError> {
        self.request("chatModify", json!({ "mod": modification, "jid": jid }))
            .await
    }

    async fn fetch_message_history(
        &self,
        count: u32,
        oldest_key: Value,
        oldest_timestamp: i64,
    ) -> Result<Value, SessionError> {
        self.request(
            "fetchMessageHistory",
            json!({
                "count": count,
                "oldestMsgKey": oldest_key,
                "oldestMsgTimestamp": oldest_timestamp,
            }),
        )
        .await
    }

    async fn send_receipts(&self, keys: &[Value], receipt_type: &str) -> Result<(), SessionError> {
        self.request("sendReceipts", json!({ "keys": keys, "type": receipt_type }))
            .await
            .map(|_| ())
    }

    async fn profile_picture_url(
        &self,
        jid: &str,
        kind: PictureKind,
    ) -> Result<Option<String>, SessionError> {
        let result = self
            .request("profilePictureUrl", json!({ "jid": jid, "type": kind }))
            .await?;
        Ok(result.as_str().map(String::from))
    }

    async fn on_whatsapp(&self, jids: &[String]) -> Result<Value, SessionError> {
        self.request("onWhatsApp", json!({ "jids": jids })).await
    }

    async fn download_media(&self, message: &Value) -> Result<Option<Vec<u8>>, SessionError> {
        let result = self
            .request("downloadMedia", json!({ "message": message }))
            .await?;
        let Some(encoded) = result.as_str() else {
            return Ok(None);
        };
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| SessionError::Command {
                command: "downloadMedia".into(),
                message: format!("invalid base64 media: {e}"),
            })
    }
}
