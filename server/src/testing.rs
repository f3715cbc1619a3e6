//! In-memory fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_common::{JidFilter, PhoneNumber, Presence};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::connection::{ConnectionDeps, ConnectionOptions};
use crate::session::{
    AuthState, AuthStateStore, AuthStoreError, AuthUpdate, ClientVersion, ClientVersionConfig,
    OpenedSession, PictureKind, SessionEngine, SessionError, SessionEvent, SessionHandle,
    SessionOptions, StoredConnection,
};
use crate::webhooks::{
    Clock, DeliveryOptions, TransportError, WebhookEvent, WebhookEventType, WebhookSink,
    WebhookSinkFactory, WebhookTarget, WebhookTransport,
};

// ============================================================================
// Webhook transport and clock
// ============================================================================

/// Transport answering from a script of statuses (`Ok`) and network errors
/// (`Err`). Once the script runs out the fallback status is used.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<u16, &'static str>>>,
    fallback: Option<u16>,
    requests: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<u16, &'static str>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(status: u16) -> Self {
        Self {
            fallback: Some(status),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<(String, Value)> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn post(&self, url: &str, body: &Value) -> Result<u16, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(TransportError::Other(message.to_string())),
            None => self
                .fallback
                .ok_or_else(|| TransportError::Other("script exhausted".into())),
        }
    }
}

/// Clock that records requested sleeps and returns immediately.
pub struct RecordingClock {
    jitter: Duration,
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn with_jitter(jitter: Duration) -> Self {
        Self {
            jitter,
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }

    fn jitter(&self) -> Duration {
        self.jitter
    }
}

// ============================================================================
// Webhook sink
// ============================================================================

/// Sink keeping every emitted event in order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(WebhookEvent, DeliveryOptions)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(WebhookEvent, DeliveryOptions)> {
        self.events.lock().unwrap().clone()
    }

    pub fn of_type(&self, event: WebhookEventType) -> Vec<(WebhookEvent, DeliveryOptions)> {
        self.events()
            .into_iter()
            .filter(|(e, _)| e.event == event)
            .collect()
    }

    /// `data` of every `connection.update` event.
    pub fn connection_updates(&self) -> Vec<Value> {
        self.of_type(WebhookEventType::ConnectionUpdate)
            .into_iter()
            .map(|(e, _)| e.data)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl WebhookSink for RecordingSink {
    fn emit(&self, event: WebhookEvent, options: DeliveryOptions) {
        self.events.lock().unwrap().push((event, options));
    }
}

/// Hands out the same [`RecordingSink`] to every connection.
#[derive(Default)]
pub struct RecordingSinkFactory {
    pub sink: Arc<RecordingSink>,
    pub targets: Mutex<Vec<(PhoneNumber, WebhookTarget)>>,
}

impl WebhookSinkFactory for RecordingSinkFactory {
    fn create(&self, phone: &PhoneNumber, target: WebhookTarget) -> Arc<dyn WebhookSink> {
        self.targets.lock().unwrap().push((phone.clone(), target));
        self.sink.clone()
    }
}

// ============================================================================
// Auth store
// ============================================================================

#[derive(Default)]
pub struct MemoryAuthStore {
    entries: Mutex<HashMap<PhoneNumber, (AuthState, ConnectionOptions)>>,
    pub loads: AtomicUsize,
    pub saves: AtomicUsize,
    pub clears: AtomicUsize,
    pub fail_loads: AtomicBool,
}

impl MemoryAuthStore {
    pub fn insert(&self, phone: PhoneNumber, options: ConnectionOptions) {
        self.entries
            .lock()
            .unwrap()
            .insert(phone, (AuthState::default(), options));
    }

    pub fn contains(&self, phone: &PhoneNumber) -> bool {
        self.entries.lock().unwrap().contains_key(phone)
    }

    pub fn creds(&self, phone: &PhoneNumber) -> Option<Value> {
        self.entries
            .lock()
            .unwrap()
            .get(phone)
            .and_then(|(state, _)| state.creds.clone())
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthStateStore for MemoryAuthStore {
    async fn load(
        &self,
        phone: &PhoneNumber,
        options: &ConnectionOptions,
    ) -> Result<AuthState, AuthStoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(AuthStoreError::Serde(
                serde_json::from_str::<Value>("{").unwrap_err(),
            ));
        }
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(phone.clone())
            .or_insert_with(|| (AuthState::default(), options.clone()));
        entry.1 = options.clone();
        Ok(entry.0.clone())
    }

    async fn save(&self, phone: &PhoneNumber, update: &AuthUpdate) -> Result<(), AuthStoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock().unwrap();
        if let Some((state, _)) = entries.get_mut(phone) {
            if let Some(creds) = &update.creds {
                state.creds = Some(creds.clone());
            }
            for (id, value) in &update.keys {
                if value.is_null() {
                    state.keys.remove(id);
                } else {
                    state.keys.insert(id.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn clear(&self, phone: &PhoneNumber) -> Result<(), AuthStoreError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().remove(phone);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredConnection>, AuthStoreError> {
        let mut stored: Vec<StoredConnection> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(phone, (_, options))| StoredConnection {
                phone: phone.clone(),
                options: options.clone(),
            })
            .collect();
        stored.sort_by(|a, b| a.phone.cmp(&b.phone));
        Ok(stored)
    }
}

// ============================================================================
// Session engine
// ============================================================================

/// Session handle recording every command.
#[derive(Default)]
pub struct FakeHandle {
    pub user_id: Mutex<Option<String>>,
    pub commands: Mutex<Vec<String>>,
    pub presences: Mutex<Vec<(Presence, Option<String>)>>,
    pub closed: AtomicBool,
    pub fail_commands: AtomicBool,
    /// `logout` never answers.
    pub hang_logout: AtomicBool,
    pub media: Mutex<Option<Vec<u8>>>,
}

impl FakeHandle {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn presences(&self) -> Vec<(Presence, Option<String>)> {
        self.presences.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, command: &str) -> Result<(), SessionError> {
        self.commands.lock().unwrap().push(command.to_string());
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(SessionError::Command {
                command: command.to_string(),
                message: "fake failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for FakeHandle {
    fn user_id(&self) -> Option<String> {
        self.user_id.lock().unwrap().clone()
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.record("logout")?;
        if self.hang_logout.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn send_message(&self, jid: &str, content: Value) -> Result<Value, SessionError> {
        self.record("sendMessage")?;
        Ok(json!({ "key": { "remoteJid": jid, "fromMe": true, "id": "SENT1" }, "message": content }))
    }

    async fn send_presence(
        &self,
        presence: Presence,
        to_jid: Option<&str>,
    ) -> Result<(), SessionError> {
        self.record("sendPresenceUpdate")?;
        self.presences
            .lock()
            .unwrap()
            .push((presence, to_jid.map(String::from)));
        Ok(())
    }

    async fn read_messages(&self, _keys: &[Value]) -> Result<(), SessionError> {
        self.record("readMessages")
    }

    async fn chat_modify(&self, _modification: Value, _jid: &str) -> Result<Value, SessionError> {
        self.record("chatModify")?;
        Ok(Value::Null)
    }

    async fn fetch_message_history(
        &self,
        _count: u32,
        _oldest_key: Value,
        _oldest_timestamp: i64,
    ) -> Result<Value, SessionError> {
        self.record("fetchMessageHistory")?;
        Ok(json!("HISTORY-REQ-1"))
    }

    async fn send_receipts(&self, _keys: &[Value], _receipt_type: &str) -> Result<(), SessionError> {
        self.record("sendReceipts")
    }

    async fn profile_picture_url(
        &self,
        _jid: &str,
        _kind: PictureKind,
    ) -> Result<Option<String>, SessionError> {
        self.record("profilePictureUrl")?;
        Ok(Some("https://pps.example.com/pic.jpg".into()))
    }

    async fn on_whatsapp(&self, jids: &[String]) -> Result<Value, SessionError> {
        self.record("onWhatsApp")?;
        Ok(Value::Array(
            jids.iter()
                .map(|jid| json!({ "exists": true, "jid": jid }))
                .collect(),
        ))
    }

    async fn download_media(&self, _message: &Value) -> Result<Option<Vec<u8>>, SessionError> {
        self.record("downloadMedia")?;
        Ok(self.media.lock().unwrap().clone())
    }
}

/// Engine opening [`FakeHandle`] sessions and keeping their event senders.
#[derive(Default)]
pub struct FakeEngine {
    pub opens: AtomicUsize,
    /// Number of upcoming `open` calls that fail.
    pub fail_opens: AtomicUsize,
    pub fail_version: AtomicBool,
    /// User id given to newly opened handles.
    pub user_id: Mutex<Option<String>>,
    pub media: Mutex<Option<Vec<u8>>>,
    pub handles: Mutex<Vec<Arc<FakeHandle>>>,
    pub senders: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
    pub last_options: Mutex<Option<SessionOptions>>,
}

impl FakeEngine {
    pub fn paired_as(user_id: &str) -> Self {
        let engine = Self::default();
        *engine.user_id.lock().unwrap() = Some(user_id.to_string());
        engine
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_handle(&self) -> Arc<FakeHandle> {
        self.handles.lock().unwrap().last().cloned().unwrap()
    }

    pub fn last_sender(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.senders.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl SessionEngine for FakeEngine {
    async fn latest_client_version(&self) -> Result<ClientVersion, SessionError> {
        if self.fail_version.load(Ordering::SeqCst) {
            return Err(SessionError::Connect("version endpoint down".into()));
        }
        Ok(ClientVersion([2, 3000, 1]))
    }

    async fn open(
        &self,
        _phone: &PhoneNumber,
        _auth: AuthState,
        options: SessionOptions,
    ) -> Result<OpenedSession, SessionError> {
        let failing = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SessionError::Connect("handshake failed".into()));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options);

        let handle = Arc::new(FakeHandle::default());
        *handle.user_id.lock().unwrap() = self.user_id.lock().unwrap().clone();
        *handle.media.lock().unwrap() = self.media.lock().unwrap().clone();
        let (tx, rx) = mpsc::unbounded_channel();
        self.handles.lock().unwrap().push(handle.clone());
        self.senders.lock().unwrap().push(tx);

        Ok(OpenedSession {
            handle,
            events: rx,
        })
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub fn phone(input: &str) -> PhoneNumber {
    PhoneNumber::parse(input).unwrap()
}

pub fn options() -> ConnectionOptions {
    ConnectionOptions::new("https://hooks.example.com/relay", "verify-token")
}

/// Fakes wired into [`ConnectionDeps`].
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub store: Arc<MemoryAuthStore>,
    pub sinks: Arc<RecordingSinkFactory>,
}

impl Harness {
    pub fn new(engine: FakeEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            store: Arc::new(MemoryAuthStore::default()),
            sinks: Arc::new(RecordingSinkFactory::default()),
        }
    }

    pub fn sink(&self) -> Arc<RecordingSink> {
        self.sinks.sink.clone()
    }

    pub fn deps(&self) -> ConnectionDeps {
        ConnectionDeps {
            engine: self.engine.clone(),
            auth_store: self.store.clone(),
            sinks: self.sinks.clone(),
            jid_filter: JidFilter::default(),
            client_version: ClientVersionConfig::default(),
        }
    }
}
