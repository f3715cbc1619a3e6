//! Reconnect Policy
//!
//! Decides whether a closed session is worth reopening. Only an explicit
//! logout or an exhausted QR pairing window end a connection; every other
//! close is transient.

use serde::Serialize;

/// Reconnect-phase events tolerated before the connection is reset.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Disconnect message reported once every pairing QR code expired unread.
pub const QR_ATTEMPTS_ENDED: &str = "QR refs attempts ended";

/// Known disconnect status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    LoggedOut,
    BadSession,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    Forbidden,
    MultideviceMismatch,
    RestartRequired,
    UnavailableService,
    Unknown(u16),
}

impl DisconnectReason {
    pub const fn from_code(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            403 => Self::Forbidden,
            408 => Self::ConnectionLost,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::UnavailableService,
            515 => Self::RestartRequired,
            other => Self::Unknown(other),
        }
    }
}

/// Outcome of [`ReconnectPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectDecision {
    /// The close ends the connection for good.
    pub terminal: bool,
}

impl ReconnectDecision {
    pub const fn should_reconnect(&self) -> bool {
        !self.terminal
    }
}

/// Result of counting one reconnect-phase event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAttempt {
    /// Still under the ceiling; the `reconnecting` phase is announced.
    Continue { attempt: u32 },
    /// The ceiling was crossed; the connection must be reset.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconnectPolicy;

impl ReconnectPolicy {
    /// Classify a close by its status code and message.
    pub fn decide(status_code: Option<u16>, message: Option<&str>) -> ReconnectDecision {
        let logged_out = status_code.map(DisconnectReason::from_code) == Some(DisconnectReason::LoggedOut);
        let qr_expired = message == Some(QR_ATTEMPTS_ENDED);
        ReconnectDecision {
            terminal: logged_out || qr_expired,
        }
    }

    /// Count a reconnect-phase event against `counter`.
    pub fn record_attempt(counter: &mut u32) -> ReconnectAttempt {
        *counter += 1;
        if *counter > MAX_RECONNECT_ATTEMPTS {
            ReconnectAttempt::Exhausted
        } else {
            ReconnectAttempt::Continue { attempt: *counter }
        }
    }
}
