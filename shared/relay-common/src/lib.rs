//! Relay Common Library
//!
//! Shared types and utilities used by the session server and its clients.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
