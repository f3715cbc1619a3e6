//! Common Error Types

use thiserror::Error;

/// Errors raised while parsing shared types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Phone number is not a valid E.164 number.
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    /// Presence value is not recognised.
    #[error("Invalid presence: {0}")]
    InvalidPresence(String),
}

/// Result alias for common operations.
pub type Result<T> = std::result::Result<T, Error>;
