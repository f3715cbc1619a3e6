//! Connection Lifecycle
//!
//! Per-account state machine driving a session engine: reconnect policy,
//! identity checks, QR rendering, presence timer and webhook emission.

pub mod error;
pub mod machine;
pub mod media;
pub mod presence;
pub mod qr;
pub mod reconnect;
pub mod types;


pub use error::ConnectionError;
pub use machine::{
    Connection, ConnectionDeps, RemovalCallback, LOGOUT_TIMEOUT, WRONG_PHONE_NUMBER,
};
pub use reconnect::{
    DisconnectReason, ReconnectDecision, ReconnectPolicy, MAX_RECONNECT_ATTEMPTS,
    QR_ATTEMPTS_ENDED,
};
pub use types::{ConnectionOptions, ConnectionState, Session};
