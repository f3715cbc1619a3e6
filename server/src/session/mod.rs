//! Session Engine Integration
//!
//! The session engine contract, its WebSocket bridge, client version
//! resolution and the Redis-backed auth state store.

pub mod auth_store;
pub mod bridge;
pub mod engine;
pub mod version;

pub use auth_store::{AuthStateStore, AuthStoreError, RedisAuthStateStore, StoredConnection};
pub use bridge::BridgeEngine;
pub use engine::{
    AuthState, AuthUpdate, ConnectionPhase, ConnectionUpdate, LastDisconnect, MessageBatch,
    OpenedSession, PictureKind, SessionEngine, SessionError, SessionEvent, SessionHandle,
    SessionOptions,
};
pub use version::{resolve_client_version, ClientVersion, ClientVersionConfig};
