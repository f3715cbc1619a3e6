//! Connection State Machine
//!
//! Owns one account's lifecycle. Session events are drained one at a time
//! by a supervisor task, interpreted, and republished as webhook events.
//! Handler failures are logged with the phone number and handler name and
//! never stop the loop.
//!
//! Connection-update precedence, highest first:
//! 1. reconnect phase (new login, empty QR while connecting, boot restore)
//! 2. close (reconnect or full close)
//! 3. identity check on open
//! 4. QR challenge
//! 5. online flag

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use relay_common::{JidFilter, PhoneNumber, Presence};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::ConnectionError;
use super::media;
use super::presence::PresenceTimer;
use super::qr;
use super::reconnect::{ReconnectAttempt, ReconnectPolicy};
use super::types::{ConnectionOptions, ConnectionState, Session};
use crate::session::{
    resolve_client_version, AuthStateStore, ClientVersionConfig, ConnectionPhase,
    ConnectionUpdate, MessageBatch, PictureKind, SessionEngine, SessionEvent, SessionHandle,
    SessionOptions,
};
use crate::webhooks::{
    DeliveryOptions, WebhookEvent, WebhookEventType, WebhookSink, WebhookSinkFactory,
};

/// Error reported to the webhook when the paired account is not the
/// configured one.
pub const WRONG_PHONE_NUMBER: &str = "wrong_phone_number";

/// Longest wait for an upstream logout before the connection closes anyway.
pub const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Invoked once with the connection id after a full close.
pub type RemovalCallback = Box<dyn FnOnce(Uuid) + Send + Sync>;

/// Collaborators shared by every connection.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub engine: Arc<dyn SessionEngine>,
    pub auth_store: Arc<dyn AuthStateStore>,
    pub sinks: Arc<dyn WebhookSinkFactory>,
    pub jid_filter: JidFilter,
    pub client_version: ClientVersionConfig,
}

/// A reopened session whose events replace the current stream.
struct Reopened {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    generation: u64,
}

struct Inner {
    options: ConnectionOptions,
    state: ConnectionState,
    session: Session,
    reconnect_count: u32,
    /// Bumped on every opened session and on close.
    generation: u64,
    /// Set after an identity mismatch; connection updates are ignored.
    updates_detached: bool,
    presence: PresenceTimer,
}

impl Inner {
    fn set_state(&mut self, phone: &PhoneNumber, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if self.state.can_transition_to(next) {
            debug!(phone = %phone, from = %self.state, to = %next, "Connection state changed");
            self.state = next;
        } else {
            warn!(phone = %phone, from = %self.state, to = %next, "Ignoring invalid state transition");
        }
    }

    fn active_handle(&self) -> Result<Arc<dyn SessionHandle>, ConnectionError> {
        self.session
            .handle()
            .cloned()
            .ok_or(ConnectionError::NotConnected)
    }
}

/// One account's connection.
pub struct Connection {
    id: Uuid,
    phone: PhoneNumber,
    deps: ConnectionDeps,
    sink: Arc<dyn WebhookSink>,
    inner: Mutex<Inner>,
    on_close: StdMutex<Option<RemovalCallback>>,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("phone", &self.phone)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        phone: PhoneNumber,
        options: ConnectionOptions,
        deps: ConnectionDeps,
        on_close: Option<RemovalCallback>,
    ) -> Arc<Self> {
        let sink = deps.sinks.create(&phone, options.webhook_target());
        Arc::new(Self {
            id: Uuid::now_v7(),
            phone,
            deps,
            sink,
            inner: Mutex::new(Inner {
                options,
                state: ConnectionState::Idle,
                session: Session::NoSession,
                reconnect_count: 0,
                generation: 0,
                updates_detached: false,
                presence: PresenceTimer::default(),
            }),
            on_close: StdMutex::new(on_close),
            supervisor: StdMutex::new(None),
        })
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn phone(&self) -> &PhoneNumber {
        &self.phone
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.session.is_active()
    }

    pub async fn reconnect_count(&self) -> u32 {
        self.inner.lock().await.reconnect_count
    }

    pub async fn options(&self) -> ConnectionOptions {
        self.inner.lock().await.options.clone()
    }

    /// Open a session unless one is already active.
    ///
    /// A failing engine handshake is logged and leaves the connection idle;
    /// only auth store failures and a closed connection are reported.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let reopened = {
            let mut inner = self.inner.lock().await;
            if inner.state == ConnectionState::Closed {
                return Err(ConnectionError::Closed);
            }
            if inner.session.is_active() {
                return Ok(());
            }
            self.start_session(&mut inner).await?
        };

        if let Some(reopened) = reopened {
            self.spawn_supervisor(reopened);
        }
        Ok(())
    }

    /// Handle one event from the current session.
    pub async fn on_session_event(self: &Arc<Self>, event: SessionEvent) {
        let generation = self.inner.lock().await.generation;
        if let Some(reopened) = self.handle_event(event, generation).await {
            self.spawn_supervisor(reopened);
        }
    }

    fn spawn_supervisor(self: &Arc<Self>, reopened: Reopened) {
        let task = tokio::spawn(self.clone().supervise(reopened));
        let previous = self
            .supervisor
            .lock()
            .ok()
            .and_then(|mut slot| slot.replace(task));
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn supervise(self: Arc<Self>, reopened: Reopened) {
        let Reopened {
            mut events,
            mut generation,
        } = reopened;

        while let Some(event) = events.recv().await {
            if let Some(next) = self.handle_event(event, generation).await {
                events = next.events;
                generation = next.generation;
            }
        }
        debug!(phone = %self.phone, generation, "Session event stream ended");
    }

    async fn handle_event(&self, event: SessionEvent, generation: u64) -> Option<Reopened> {
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Closed || inner.generation != generation {
            debug!(
                phone = %self.phone,
                event = event.name(),
                generation,
                current = inner.generation,
                "Dropping event from stale session"
            );
            return None;
        }

        let handler = event.name();
        match self.dispatch(&mut inner, event).await {
            Ok(reopened) => reopened,
            Err(e) => {
                error!(phone = %self.phone, handler, error = %e, "Session event handler failed");
                None
            }
        }
    }

    async fn dispatch(
        &self,
        inner: &mut Inner,
        event: SessionEvent,
    ) -> Result<Option<Reopened>, ConnectionError> {
        match event {
            SessionEvent::ConnectionUpdate(update) => {
                return self.handle_connection_update(inner, update).await;
            }
            SessionEvent::CredsUpdate(update) => {
                self.deps.auth_store.save(&self.phone, &update).await?;
            }
            SessionEvent::MessagesReceived(batch) => {
                self.handle_messages_received(inner, batch).await?;
            }
            SessionEvent::MessagesChanged(data) => {
                self.emit(
                    WebhookEvent::new(WebhookEventType::MessagesUpdate, data),
                    DeliveryOptions::awaiting_response(),
                );
            }
            SessionEvent::ReceiptChanged(data) => {
                self.emit(
                    WebhookEvent::new(WebhookEventType::MessageReceiptUpdate, data),
                    DeliveryOptions::default(),
                );
            }
            SessionEvent::HistorySnapshot(data) => {
                // Snapshots never carry media, regardless of includeMedia
                if inner.options.sync_full_history {
                    self.emit(
                        WebhookEvent::new(WebhookEventType::MessagingHistorySet, data),
                        DeliveryOptions::default(),
                    );
                }
            }
        }
        Ok(None)
    }

    async fn handle_connection_update(
        &self,
        inner: &mut Inner,
        mut update: ConnectionUpdate,
    ) -> Result<Option<Reopened>, ConnectionError> {
        if inner.updates_detached {
            debug!(phone = %self.phone, "Connection updates detached, ignoring");
            return Ok(None);
        }

        let connecting = update.connection == Some(ConnectionPhase::Connecting);
        let is_reconnecting = update.is_new_login()
            || (connecting && (update.has_empty_qr() || inner.options.is_reconnect));
        if is_reconnecting {
            debug!(
                phone = %self.phone,
                is_new_login = update.is_new_login(),
                is_reconnect = inner.options.is_reconnect,
                connecting,
                "Reconnect phase"
            );
            inner.options.is_reconnect = false;
            self.handle_reconnecting(inner).await;
            return Ok(None);
        }

        if update.connection == Some(ConnectionPhase::Close) {
            let disconnect = update.last_disconnect.clone().unwrap_or_default();
            let decision =
                ReconnectPolicy::decide(disconnect.status_code, disconnect.message.as_deref());

            if decision.should_reconnect() {
                debug!(
                    phone = %self.phone,
                    status_code = ?disconnect.status_code,
                    message = ?disconnect.message,
                    "Session closed, reconnecting"
                );
                if !self.handle_reconnecting(inner).await {
                    return Ok(None);
                }
                // Auth state is kept for the new session
                if let Some(handle) = inner.session.take() {
                    handle.close().await;
                }
                return self.start_session(inner).await;
            }

            info!(
                phone = %self.phone,
                status_code = ?disconnect.status_code,
                message = ?disconnect.message,
                "Session closed for good"
            );
            self.full_close(inner).await;
        }

        if update.connection == Some(ConnectionPhase::Open) {
            let user_id = update
                .me
                .clone()
                .or_else(|| inner.session.handle().and_then(|h| h.user_id()));
            if let Some(user_id) = user_id {
                let matches = PhoneNumber::from_user_id(&user_id)
                    .map(|reported| reported.same_account(&self.phone))
                    .unwrap_or(false);
                if !matches {
                    self.handle_wrong_phone_number(inner, &user_id).await;
                    return Ok(None);
                }
            }
        }

        if let Some(challenge) = update.qr_challenge() {
            update.qr_data_url = Some(qr::to_data_url(challenge)?);
            update.connection = Some(ConnectionPhase::Connecting);
        }

        if update.is_online() {
            update.connection = Some(ConnectionPhase::Open);
        }

        if update.connection == Some(ConnectionPhase::Open) {
            inner.reconnect_count = 0;
            inner.set_state(&self.phone, ConnectionState::Open);
        }

        self.emit(
            WebhookEvent::new(
                WebhookEventType::ConnectionUpdate,
                serde_json::to_value(&update)?,
            ),
            DeliveryOptions::default(),
        );
        Ok(None)
    }

    /// Count a reconnect phase. Returns `false` when the ceiling was crossed
    /// and the connection was closed instead.
    async fn handle_reconnecting(&self, inner: &mut Inner) -> bool {
        match ReconnectPolicy::record_attempt(&mut inner.reconnect_count) {
            ReconnectAttempt::Exhausted => {
                warn!(
                    phone = %self.phone,
                    "Reconnect count exceeded limit, resetting connection"
                );
                self.full_close(inner).await;
                false
            }
            ReconnectAttempt::Continue { attempt } => {
                debug!(phone = %self.phone, attempt, "Reconnecting");
                inner.set_state(&self.phone, ConnectionState::Reconnecting);
                self.emit(
                    WebhookEvent::new(
                        WebhookEventType::ConnectionUpdate,
                        json!({ "connection": ConnectionPhase::Reconnecting }),
                    ),
                    DeliveryOptions::default(),
                );
                true
            }
        }
    }

    async fn handle_wrong_phone_number(&self, inner: &mut Inner, user_id: &str) {
        warn!(
            phone = %self.phone,
            reported = %user_id,
            "Paired account does not match configured phone number"
        );
        self.emit(
            WebhookEvent::new(
                WebhookEventType::ConnectionUpdate,
                json!({ "error": WRONG_PHONE_NUMBER }),
            ),
            DeliveryOptions::default(),
        );
        inner.updates_detached = true;
        if let Err(e) = self.logout_locked(inner).await {
            error!(phone = %self.phone, handler = "handleWrongPhoneNumber", error = %e, "Forced logout failed");
        }
    }

    async fn handle_messages_received(
        &self,
        inner: &Inner,
        mut batch: MessageBatch,
    ) -> Result<(), ConnectionError> {
        let received = batch.messages.len();
        batch.messages.retain(|message| {
            message
                .pointer("/key/remoteJid")
                .and_then(Value::as_str)
                .is_none_or(|jid| !self.deps.jid_filter.should_ignore(jid))
        });
        if batch.messages.is_empty() {
            debug!(phone = %self.phone, received, "Every message in batch was filtered out");
            return Ok(());
        }

        let mut event = WebhookEvent::new(
            WebhookEventType::MessagesUpsert,
            serde_json::to_value(&batch)?,
        );
        if inner.options.include_media {
            if let Some(handle) = inner.session.handle() {
                if let Some(media) =
                    media::download_all(&self.phone, handle.as_ref(), &batch.messages).await
                {
                    event = event.with_extra(json!({ "media": media }));
                }
            }
        }

        self.emit(event, DeliveryOptions::default());
        Ok(())
    }

    fn emit(&self, event: WebhookEvent, options: DeliveryOptions) {
        self.sink.emit(event, options);
    }

    /// Open a session, treating a failed engine handshake as recoverable:
    /// it is logged and `Ok(None)` is returned.
    async fn start_session(&self, inner: &mut Inner) -> Result<Option<Reopened>, ConnectionError> {
        match self.open_session(inner).await {
            Ok(reopened) => Ok(Some(reopened)),
            Err(ConnectionError::SessionStartup(reason)) => {
                error!(
                    phone = %self.phone,
                    handler = "connect",
                    error = %reason,
                    "Failed to create session"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load auth state and open a session.
    async fn open_session(&self, inner: &mut Inner) -> Result<Reopened, ConnectionError> {
        let auth = self.deps.auth_store.load(&self.phone, &inner.options).await?;

        let version = match self.deps.engine.latest_client_version().await {
            Ok(latest) => Some(resolve_client_version(latest, &self.deps.client_version)),
            Err(e) => {
                error!(
                    phone = %self.phone,
                    handler = "fetchClientVersion",
                    error = %e,
                    "Failed to fetch latest client version, using engine default"
                );
                None
            }
        };

        let options = SessionOptions {
            client_name: inner.options.client_name.clone(),
            sync_full_history: inner.options.sync_full_history,
            mark_online_on_connect: false,
            jid_filter: self.deps.jid_filter,
            version,
        };

        let opened = self
            .deps
            .engine
            .open(&self.phone, auth, options)
            .await
            .map_err(|e| ConnectionError::SessionStartup(e.to_string()))?;

        inner.generation += 1;
        inner.session = Session::Active {
            handle: opened.handle,
            generation: inner.generation,
        };
        inner.set_state(&self.phone, ConnectionState::Connecting);
        info!(phone = %self.phone, generation = inner.generation, "Session opened");
        Ok(Reopened {
            events: opened.events,
            generation: inner.generation,
        })
    }

    /// Clear auth state, drop the session, reset the counter and notify the
    /// registry. Runs at most once.
    async fn full_close(&self, inner: &mut Inner) {
        if inner.state == ConnectionState::Closed {
            return;
        }

        inner.presence.cancel();
        if let Some(handle) = inner.session.take() {
            handle.close().await;
        }
        if let Err(e) = self.deps.auth_store.clear(&self.phone).await {
            error!(phone = %self.phone, handler = "close", error = %e, "Failed to clear auth state");
        }
        inner.reconnect_count = 0;
        inner.generation += 1;
        inner.set_state(&self.phone, ConnectionState::Closed);
        info!(phone = %self.phone, "Connection closed");

        let callback = self.on_close.lock().ok().and_then(|mut slot| slot.take());
        if let Some(callback) = callback {
            callback(self.id);
        }
    }

    /// Unlink the account upstream and close the connection.
    ///
    /// The upstream call runs without the connection lock. If the session
    /// was replaced or shut down meanwhile, the connection is not closed.
    pub async fn logout(&self) -> Result<(), ConnectionError> {
        let (handle, generation) = {
            let inner = self.inner.lock().await;
            (inner.active_handle()?, inner.generation)
        };
        self.logout_upstream(handle.as_ref(), "logout").await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            debug!(
                phone = %self.phone,
                generation,
                current = inner.generation,
                "Session changed during logout, not closing"
            );
            return Ok(());
        }
        self.full_close(&mut inner).await;
        Ok(())
    }

    async fn logout_locked(&self, inner: &mut Inner) -> Result<(), ConnectionError> {
        let handle = inner.active_handle()?;
        self.logout_upstream(handle.as_ref(), "handleWrongPhoneNumber")
            .await;
        self.full_close(inner).await;
        Ok(())
    }

    /// Best-effort upstream logout, bounded by [`LOGOUT_TIMEOUT`].
    async fn logout_upstream(&self, handle: &dyn SessionHandle, handler: &'static str) {
        match tokio::time::timeout(LOGOUT_TIMEOUT, handle.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(phone = %self.phone, handler, error = %e, "Session logout failed");
            }
            Err(_) => {
                warn!(
                    phone = %self.phone,
                    handler,
                    timeout_secs = LOGOUT_TIMEOUT.as_secs(),
                    "Session logout timed out"
                );
            }
        }
    }

    /// Stop the event loop and presence timer without logging out. Auth
    /// state is kept so the connection is restored on next boot.
    pub async fn shutdown(&self) {
        let supervisor = self.supervisor.lock().ok().and_then(|mut slot| slot.take());
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }

        let mut inner = self.inner.lock().await;
        inner.presence.cancel();
        if let Some(handle) = inner.session.take() {
            handle.close().await;
        }
        inner.generation += 1;
        debug!(phone = %self.phone, "Connection shut down");
    }

    async fn handle(&self) -> Result<Arc<dyn SessionHandle>, ConnectionError> {
        self.inner.lock().await.active_handle()
    }

    pub async fn send_message(&self, jid: &str, content: Value) -> Result<Value, ConnectionError> {
        Ok(self.handle().await?.send_message(jid, content).await?)
    }

    /// Announce a presence. `available` is withdrawn automatically after a
    /// minute unless another presence is sent first.
    pub async fn send_presence(
        &self,
        presence: Presence,
        to_jid: Option<String>,
    ) -> Result<(), ConnectionError> {
        let (handle, generation) = {
            let inner = self.inner.lock().await;
            (inner.active_handle()?, inner.generation)
        };
        if handle.user_id().is_none() {
            debug!(phone = %self.phone, "Not paired yet, presence skipped");
            return Ok(());
        }

        handle.send_presence(presence, to_jid.as_deref()).await?;

        let mut inner = self.inner.lock().await;
        if inner.generation == generation {
            inner
                .presence
                .on_presence_sent(&self.phone, presence, handle, to_jid);
        }
        Ok(())
    }

    pub async fn read_messages(&self, keys: &[Value]) -> Result<(), ConnectionError> {
        Ok(self.handle().await?.read_messages(keys).await?)
    }

    pub async fn chat_modify(&self, modification: Value, jid: &str) -> Result<Value, ConnectionError> {
        Ok(self.handle().await?.chat_modify(modification, jid).await?)
    }

    pub async fn fetch_message_history(
        &self,
        count: u32,
        oldest_key: Value,
        oldest_timestamp: i64,
    ) -> Result<Value, ConnectionError> {
        Ok(self
            .handle()
            .await?
            .fetch_message_history(count, oldest_key, oldest_timestamp)
            .await?)
    }

    pub async fn send_receipts(&self, keys: &[Value], receipt_type: &str) -> Result<(), ConnectionError> {
        Ok(self.handle().await?.send_receipts(keys, receipt_type).await?)
    }

    pub async fn profile_picture_url(
        &self,
        jid: &str,
        kind: PictureKind,
    ) -> Result<Option<String>, ConnectionError> {
        Ok(self.handle().await?.profile_picture_url(jid, kind).await?)
    }

    pub async fn on_whatsapp(&self, jids: &[String]) -> Result<Value, ConnectionError> {
        Ok(self.handle().await?.on_whatsapp(jids).await?)
    }

    #[cfg(test)]
    pub(crate) async fn presence_timer_pending(&self) -> bool {
        self.inner.lock().await.presence.is_pending()
    }
}
