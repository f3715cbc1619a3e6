//! Presence Types

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Presence an account can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    /// Online.
    Available,
    /// Offline.
    Unavailable,
    /// Typing in a chat.
    Composing,
    /// Recording a voice note in a chat.
    Recording,
    /// Stopped typing or recording.
    Paused,
}

impl Presence {
    /// Parse from the lowercase wire form.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "unavailable" => Some(Self::Unavailable),
            "composing" => Some(Self::Composing),
            "recording" => Some(Self::Recording),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    /// Lowercase wire form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
            Self::Composing => "composing",
            Self::Recording => "recording",
            Self::Paused => "paused",
        }
    }

    /// Whether this presence changes the account-wide online state.
    pub const fn is_online_state(&self) -> bool {
        matches!(self, Self::Available | Self::Unavailable)
    }
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Presence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s).ok_or_else(|| Error::InvalidPresence(s.to_string()))
    }
}
