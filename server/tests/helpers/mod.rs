//! Reusable test helpers for integration tests.
//!
//! Provides in-memory implementations of the public collaborator traits and
//! `TestApp` for sending requests through the full axum router.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use relay_common::{JidFilter, PhoneNumber, Presence};
use relay_server::api::{create_router, AppState};
use relay_server::config::Config;
use relay_server::connection::{ConnectionDeps, ConnectionOptions};
use relay_server::registry::ConnectionRegistry;
use relay_server::session::{
    AuthState, AuthStateStore, AuthStoreError, AuthUpdate, ClientVersion, ClientVersionConfig,
    OpenedSession, PictureKind, SessionEngine, SessionError, SessionEvent, SessionHandle,
    SessionOptions, StoredConnection,
};
use relay_server::webhooks::{
    Clock, TransportError, WebhookDispatcher, WebhookSinkFactory, WebhookTransport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

// ============================================================================
// Session engine
// ============================================================================

#[derive(Default)]
pub struct StubHandle {
    pub user_id: Option<String>,
    pub commands: Mutex<Vec<String>>,
}

impl StubHandle {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: &str) {
        self.commands.lock().unwrap().push(command.to_string());
    }
}

#[async_trait]
impl SessionHandle for StubHandle {
    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.record("logout");
        Ok(())
    }

    async fn close(&self) {
        self.record("close");
    }

    async fn send_message(&self, jid: &str, content: Value) -> Result<Value, SessionError> {
        self.record("sendMessage");
        Ok(json!({ "key": { "remoteJid": jid, "id": "MSG1" }, "message": content }))
    }

    async fn send_presence(&self, _: Presence, _: Option<&str>) -> Result<(), SessionError> {
        self.record("sendPresenceUpdate");
        Ok(())
    }

    async fn read_messages(&self, _: &[Value]) -> Result<(), SessionError> {
        self.record("readMessages");
        Ok(())
    }

    async fn chat_modify(&self, _: Value, _: &str) -> Result<Value, SessionError> {
        self.record("chatModify");
        Ok(Value::Null)
    }

    async fn fetch_message_history(&self, _: u32, _: Value, _: i64) -> Result<Value, SessionError> {
        self.record("fetchMessageHistory");
        Ok(json!("REQ1"))
    }

    async fn send_receipts(&self, _: &[Value], _: &str) -> Result<(), SessionError> {
        self.record("sendReceipts");
        Ok(())
    }

    async fn profile_picture_url(
        &self,
        _: &str,
        kind: PictureKind,
    ) -> Result<Option<String>, SessionError> {
        self.record("profilePictureUrl");
        Ok(Some(format!("https://pps.example.com/{kind:?}.jpg")))
    }

    async fn on_whatsapp(&self, jids: &[String]) -> Result<Value, SessionError> {
        self.record("onWhatsApp");
        Ok(json!(jids
            .iter()
            .map(|jid| json!({ "jid": jid, "exists": true }))
            .collect::<Vec<_>>()))
    }

    async fn download_media(&self, _: &Value) -> Result<Option<Vec<u8>>, SessionError> {
        Ok(None)
    }
}

/// Engine handing out [`StubHandle`]s and keeping each session's sender.
#[derive(Default)]
pub struct StubEngine {
    pub user_id: Option<String>,
    pub opens: AtomicUsize,
    pub handles: Mutex<Vec<Arc<StubHandle>>>,
    pub senders: Mutex<HashMap<PhoneNumber, mpsc::UnboundedSender<SessionEvent>>>,
}

impl StubEngine {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_handle(&self) -> Arc<StubHandle> {
        self.handles.lock().unwrap().last().cloned().unwrap()
    }

    /// Push an event into the live session of `phone`.
    pub fn emit(&self, phone: &PhoneNumber, event: SessionEvent) {
        let sender = self.senders.lock().unwrap().get(phone).cloned().unwrap();
        sender.send(event).unwrap();
    }
}

#[async_trait]
impl SessionEngine for StubEngine {
    async fn latest_client_version(&self) -> Result<ClientVersion, SessionError> {
        Ok(ClientVersion([2, 3000, 1]))
    }

    async fn open(
        &self,
        phone: &PhoneNumber,
        _auth: AuthState,
        _options: SessionOptions,
    ) -> Result<OpenedSession, SessionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(StubHandle {
            user_id: self.user_id.clone(),
            ..StubHandle::default()
        });
        let (tx, rx) = mpsc::unbounded_channel();
        self.handles.lock().unwrap().push(handle.clone());
        self.senders.lock().unwrap().insert(phone.clone(), tx);
        Ok(OpenedSession {
            handle,
            events: rx,
        })
    }
}

// ============================================================================
// Auth store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    pub entries: Mutex<HashMap<PhoneNumber, ConnectionOptions>>,
    pub clears: AtomicUsize,
}

impl MemoryStore {
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthStateStore for MemoryStore {
    async fn load(
        &self,
        phone: &PhoneNumber,
        options: &ConnectionOptions,
    ) -> Result<AuthState, AuthStoreError> {
        self.entries
            .lock()
            .unwrap()
            .insert(phone.clone(), options.clone());
        Ok(AuthState::default())
    }

    async fn save(&self, _: &PhoneNumber, _: &AuthUpdate) -> Result<(), AuthStoreError> {
        Ok(())
    }

    async fn clear(&self, phone: &PhoneNumber) -> Result<(), AuthStoreError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().remove(phone);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredConnection>, AuthStoreError> {
        let mut stored: Vec<_> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(phone, options)| StoredConnection {
                phone: phone.clone(),
                options: options.clone(),
            })
            .collect();
        stored.sort_by(|a, b| a.phone.cmp(&b.phone));
        Ok(stored)
    }
}

// ============================================================================
// Webhook transport
// ============================================================================

/// Transport recording every POST and answering with a fixed status.
pub struct CapturingTransport {
    pub status: u16,
    pub requests: Mutex<Vec<(String, Value)>>,
}

impl CapturingTransport {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl WebhookTransport for CapturingTransport {
    async fn post(&self, url: &str, body: &Value) -> Result<u16, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        Ok(self.status)
    }
}

/// Clock that never waits.
pub struct InstantClock;

#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, _: Duration) {}

    fn jitter(&self) -> Duration {
        Duration::ZERO
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

/// Registry over stub collaborators, delivering webhooks through the real
/// dispatcher into a [`CapturingTransport`].
pub struct TestRelay {
    pub engine: Arc<StubEngine>,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<CapturingTransport>,
    pub registry: ConnectionRegistry,
}

impl TestRelay {
    pub fn new() -> Self {
        Self::with_engine(StubEngine::default())
    }

    pub fn with_engine(engine: StubEngine) -> Self {
        let engine = Arc::new(engine);
        let store = Arc::new(MemoryStore::default());
        let transport = Arc::new(CapturingTransport::new(200));
        let dispatcher = WebhookDispatcher::new(
            transport.clone(),
            Arc::new(InstantClock),
            Config::default_for_test().retry_policy,
        );
        let sinks: Arc<dyn WebhookSinkFactory> = Arc::new(dispatcher);
        let registry = ConnectionRegistry::new(ConnectionDeps {
            engine: engine.clone(),
            auth_store: store.clone(),
            sinks,
            jid_filter: JidFilter::default(),
            client_version: ClientVersionConfig::default(),
        });
        Self {
            engine,
            store,
            transport,
            registry,
        }
    }

    /// Wait until the transport has seen `count` deliveries.
    pub async fn wait_for_deliveries(&self, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            let bodies = self.transport.bodies();
            if bodies.len() >= count {
                return bodies;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {count} deliveries, saw {:?}",
            self.transport.bodies()
        );
    }
}

/// Full router over a [`TestRelay`].
pub struct TestApp {
    pub relay: TestRelay,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    pub fn with_config(config: Config) -> Self {
        let relay = TestRelay::new();
        let router = create_router(AppState::new(relay.registry.clone(), config));
        Self { relay, router }
    }

    /// Build a JSON request.
    pub fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub async fn body_to_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

/// Poll `condition` until it holds, panicking after about a second.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
