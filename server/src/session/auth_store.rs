//! Auth State Store
//!
//! Per-account credential storage. Redis layout (`{p}` = key prefix):
//! - `{p}:auth:{phone}:creds` - credentials JSON
//! - `{p}:auth:{phone}:keys` - hash of signal key id to JSON value
//! - `{p}:auth:{phone}:meta` - connection options JSON
//! - `{p}:auth:accounts` - set of every stored phone number

use std::collections::HashMap;

use async_trait::async_trait;
use fred::prelude::{Client, HashesInterface, KeysInterface, SetsInterface};
use relay_common::PhoneNumber;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::engine::{AuthState, AuthUpdate};
use crate::connection::ConnectionOptions;

/// Auth store failures.
#[derive(Error, Debug)]
pub enum AuthStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A connection found in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConnection {
    pub phone: PhoneNumber,
    pub options: ConnectionOptions,
}

/// Per-account keyed credential storage.
#[async_trait]
pub trait AuthStateStore: Send + Sync {
    /// Load the auth state and record the options the connection runs with.
    async fn load(
        &self,
        phone: &PhoneNumber,
        options: &ConnectionOptions,
    ) -> Result<AuthState, AuthStoreError>;

    async fn save(&self, phone: &PhoneNumber, update: &AuthUpdate) -> Result<(), AuthStoreError>;

    /// Remove everything stored for the account.
    async fn clear(&self, phone: &PhoneNumber) -> Result<(), AuthStoreError>;

    /// Every account with stored state.
    async fn list(&self) -> Result<Vec<StoredConnection>, AuthStoreError>;
}

/// Redis-backed [`AuthStateStore`].
#[derive(Clone)]
pub struct RedisAuthStateStore {
    client: Client,
    prefix: String,
}

impl RedisAuthStateStore {
    pub fn new(client: Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn creds_key(&self, phone: &PhoneNumber) -> String {
        format!("{}:auth:{phone}:creds", self.prefix)
    }

    fn keys_key(&self, phone: &PhoneNumber) -> String {
        format!("{}:auth:{phone}:keys", self.prefix)
    }

    fn meta_key(&self, phone: &PhoneNumber) -> String {
        format!("{}:auth:{phone}:meta", self.prefix)
    }

    fn accounts_key(&self) -> String {
        format!("{}:auth:accounts", self.prefix)
    }
}

#[async_trait]
impl AuthStateStore for RedisAuthStateStore {
    async fn load(
        &self,
        phone: &PhoneNumber,
        options: &ConnectionOptions,
    ) -> Result<AuthState, AuthStoreError> {
        let meta = serde_json::to_string(options)?;
        self.client
            .set::<(), _, _>(self.meta_key(phone), meta, None, None, false)
            .await?;
        self.client
            .sadd::<(), _, _>(self.accounts_key(), phone.as_str())
            .await?;

        let creds: Option<String> = self.client.get(self.creds_key(phone)).await?;
        let creds = creds.map(|raw| serde_json::from_str(&raw)).transpose()?;

        let raw_keys: HashMap<String, String> = self.client.hgetall(self.keys_key(phone)).await?;
        let mut keys = Map::new();
        for (id, raw) in raw_keys {
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    keys.insert(id, value);
                }
                Err(e) => warn!(phone = %phone, key = %id, error = %e, "Skipping corrupt auth key"),
            }
        }

        debug!(
            phone = %phone,
            has_creds = creds.is_some(),
            keys = keys.len(),
            "Auth state loaded"
        );
        Ok(AuthState { creds, keys })
    }

    async fn save(&self, phone: &PhoneNumber, update: &AuthUpdate) -> Result<(), AuthStoreError> {
        if let Some(creds) = &update.creds {
            self.client
                .set::<(), _, _>(
                    self.creds_key(phone),
                    serde_json::to_string(creds)?,
                    None,
                    None,
                    false,
                )
                .await?;
        }

        let mut upserts: HashMap<String, String> = HashMap::new();
        let mut deletes: Vec<String> = Vec::new();
        for (id, value) in &update.keys {
            if value.is_null() {
                deletes.push(id.clone());
            } else {
                upserts.insert(id.clone(), serde_json::to_string(value)?);
            }
        }

        if !upserts.is_empty() {
            self.client
                .hset::<(), _, _>(self.keys_key(phone), upserts)
                .await?;
        }
        if !deletes.is_empty() {
            self.client
                .hdel::<(), _, _>(self.keys_key(phone), deletes)
                .await?;
        }
        Ok(())
    }

    async fn clear(&self, phone: &PhoneNumber) -> Result<(), AuthStoreError> {
        self.client
            .del::<(), _>(vec![
                self.creds_key(phone),
                self.keys_key(phone),
                self.meta_key(phone),
            ])
            .await?;
        self.client
            .srem::<(), _, _>(self.accounts_key(), phone.as_str())
            .await?;
        debug!(phone = %phone, "Auth state cleared");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredConnection>, AuthStoreError> {
        let members: Vec<String> = self.client.smembers(self.accounts_key()).await?;
        let mut stored = Vec::with_capacity(members.len());

        for member in members {
            let phone = match PhoneNumber::parse(&member) {
                Ok(phone) => phone,
                Err(e) => {
                    warn!(member = %member, error = %e, "Skipping invalid stored phone number");
                    continue;
                }
            };
            let meta: Option<String> = self.client.get(self.meta_key(&phone)).await?;
            let Some(meta) = meta else {
                warn!(phone = %phone, "Stored connection has no metadata, skipping");
                continue;
            };
            match serde_json::from_str::<ConnectionOptions>(&meta) {
                Ok(options) => stored.push(StoredConnection { phone, options }),
                Err(e) => warn!(phone = %phone, error = %e, "Skipping corrupt connection metadata"),
            }
        }

        stored.sort_by(|a, b| a.phone.cmp(&b.phone));
        Ok(stored)
    }
}
