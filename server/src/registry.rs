//! Connection Registry
//!
//! Live connections keyed by the canonical account number, so both spellings
//! of a Brazilian mobile number (with and without the ninth digit) share one
//! entry. A connection removes its own entry when it fully closes, so a
//! later `connect` for the same number starts clean.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::join_all;
use relay_common::PhoneNumber;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionDeps, ConnectionError, ConnectionOptions, RemovalCallback};

/// Keyed by [`PhoneNumber::canonical`].
type ConnectionMap = DashMap<String, Arc<Connection>>;

/// Result of [`ConnectionRegistry::logout_all`].
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutAllReport {
    pub logged_out: Vec<PhoneNumber>,
    pub failed: Vec<LogoutFailure>,
}

#[derive(Debug, Serialize)]
pub struct LogoutFailure {
    pub phone: PhoneNumber,
    pub error: String,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<ConnectionMap>,
    deps: ConnectionDeps,
}

impl ConnectionRegistry {
    pub fn new(deps: ConnectionDeps) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            deps,
        }
    }

    /// Create a connection for `phone` and open its session.
    ///
    /// An entry with a live session is rejected; an entry left idle by a
    /// failed handshake is replaced.
    pub async fn connect(
        &self,
        phone: PhoneNumber,
        options: ConnectionOptions,
    ) -> Result<Arc<Connection>, ConnectionError> {
        options.validate().map_err(ConnectionError::InvalidOptions)?;

        if let Some(existing) = self.get(&phone) {
            if existing.is_connected().await {
                return Err(ConnectionError::AlreadyConnected);
            }
            existing.shutdown().await;
        }

        let connection = Connection::new(
            phone.clone(),
            options,
            self.deps.clone(),
            Some(self.removal_callback(phone.clone())),
        );
        if let Some(previous) = self.connections.insert(phone.canonical(), connection.clone()) {
            if previous.id() != connection.id() && previous.is_connected().await {
                // Lost a race with a concurrent connect for the same number
                warn!(phone = %phone, "Replacing a concurrently created connection");
                previous.shutdown().await;
            }
        }

        if let Err(e) = connection.connect().await {
            error!(phone = %phone, error = %e, "Failed to connect");
            self.remove(&phone, connection.id());
            return Err(e);
        }
        Ok(connection)
    }

    fn removal_callback(&self, phone: PhoneNumber) -> RemovalCallback {
        let connections: Weak<ConnectionMap> = Arc::downgrade(&self.connections);
        let key = phone.canonical();
        Box::new(move |id| {
            if let Some(connections) = connections.upgrade() {
                if connections.remove_if(&key, |_, c| c.id() == id).is_some() {
                    info!(phone = %phone, "Connection removed from registry");
                }
            }
        })
    }

    fn remove(&self, phone: &PhoneNumber, id: Uuid) {
        self.connections.remove_if(&phone.canonical(), |_, c| c.id() == id);
    }

    pub fn get(&self, phone: &PhoneNumber) -> Option<Arc<Connection>> {
        self.connections
            .get(&phone.canonical())
            .map(|entry| entry.value().clone())
    }

    /// Like [`Self::get`], failing with `NotConnected` for unknown numbers.
    pub fn require(&self, phone: &PhoneNumber) -> Result<Arc<Connection>, ConnectionError> {
        self.get(phone).ok_or(ConnectionError::NotConnected)
    }

    pub fn contains(&self, phone: &PhoneNumber) -> bool {
        self.connections.contains_key(&phone.canonical())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub async fn logout(&self, phone: &PhoneNumber) -> Result<(), ConnectionError> {
        self.require(phone)?.logout().await
    }

    /// Log out every connection. Failures are collected, never short-circuit.
    pub async fn logout_all(&self) -> LogoutAllReport {
        let mut report = LogoutAllReport::default();
        for connection in self.snapshot() {
            let phone = connection.phone().clone();
            match connection.logout().await {
                Ok(()) => report.logged_out.push(phone),
                Err(e) => {
                    warn!(phone = %phone, error = %e, "Logout failed");
                    report.failed.push(LogoutFailure {
                        phone,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            logged_out = report.logged_out.len(),
            failed = report.failed.len(),
            "Logged out all connections"
        );
        report
    }

    /// Recreate every connection found in the auth store. Returns how many
    /// were restored.
    pub async fn reconnect_all(&self) -> Result<usize, ConnectionError> {
        let stored = self.deps.auth_store.list().await?;
        info!(count = stored.len(), "Restoring stored connections");

        let attempts = stored.into_iter().map(|entry| {
            let mut options = entry.options;
            options.is_reconnect = true;
            let phone = entry.phone;
            async move {
                match self.connect(phone.clone(), options).await {
                    Ok(_) => true,
                    Err(e) => {
                        error!(phone = %phone, handler = "reconnectAll", error = %e, "Failed to restore connection");
                        false
                    }
                }
            }
        });
        let restored = join_all(attempts).await.into_iter().filter(|ok| *ok).count();
        Ok(restored)
    }

    /// Stop every connection without logging out.
    pub async fn shutdown(&self) {
        let connections = self.snapshot();
        info!(count = connections.len(), "Shutting down connections");
        join_all(connections.iter().map(|c| c.shutdown())).await;
        self.connections.clear();
    }
}
