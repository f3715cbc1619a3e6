//! Connection Errors

use thiserror::Error;

use crate::session::{AuthStoreError, SessionError};

/// Errors surfaced by direct connection commands.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No active session for the account.
    #[error("Phone number not connected")]
    NotConnected,

    /// The account already has an active session.
    #[error("Phone number already connected")]
    AlreadyConnected,

    /// The connection reached its terminal state.
    #[error("Connection is closed")]
    Closed,

    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Invalid connection options: {0}")]
    InvalidOptions(String),

    /// Session engine handshake failed.
    #[error("Session startup failed: {0}")]
    SessionStartup(String),

    #[error("Auth store error: {0}")]
    AuthStore(#[from] AuthStoreError),

    #[error("Session engine error: {0}")]
    Engine(#[from] SessionError),

    #[error("QR rendering failed: {0}")]
    Qr(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<relay_common::Error> for ConnectionError {
    fn from(err: relay_common::Error) -> Self {
        match err {
            relay_common::Error::InvalidPhoneNumber(input) => Self::InvalidPhoneNumber(input),
            other => Self::InvalidOptions(other.to_string()),
        }
    }
}
