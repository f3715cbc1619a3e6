//! JID Classification
//!
//! Messages are routed by a JID (`user@server`). The server part tells what
//! kind of chat a message belongs to.

use serde::{Deserialize, Serialize};

/// Status updates are published through this broadcast JID.
const STATUS_BROADCAST_JID: &str = "status@broadcast";

/// Kind of chat a JID routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JidKind {
    /// One-to-one chat with a person.
    User,
    /// Group chat.
    Group,
    /// Status updates.
    Status,
    /// Broadcast list (other than status).
    Broadcast,
    /// Channel / newsletter.
    Newsletter,
    /// Bot account.
    Bot,
    /// Meta AI assistant.
    MetaAi,
    /// Anything else.
    Other,
}

impl JidKind {
    /// Classify a JID by its server part.
    ///
    /// ```
    /// use relay_common::JidKind;
    ///
    /// assert_eq!(JidKind::classify("123-456@g.us"), JidKind::Group);
    /// assert_eq!(JidKind::classify("status@broadcast"), JidKind::Status);
    /// ```
    pub fn classify(jid: &str) -> Self {
        if jid == STATUS_BROADCAST_JID {
            return Self::Status;
        }
        let Some((_, server)) = jid.rsplit_once('@') else {
            return Self::Other;
        };
        match server {
            "s.whatsapp.net" | "c.us" | "lid" => Self::User,
            "g.us" => Self::Group,
            "broadcast" => Self::Broadcast,
            "newsletter" => Self::Newsletter,
            "bot" => Self::Bot,
            "meta.ai" => Self::MetaAi,
            _ => Self::Other,
        }
    }
}

/// Which originating chat kinds to drop before any webhook is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JidFilter {
    pub ignore_group_messages: bool,
    pub ignore_status_messages: bool,
    pub ignore_broadcast_messages: bool,
    pub ignore_newsletter_messages: bool,
    pub ignore_bot_messages: bool,
    pub ignore_meta_ai_messages: bool,
}

impl Default for JidFilter {
    fn default() -> Self {
        Self {
            ignore_group_messages: true,
            ignore_status_messages: true,
            ignore_broadcast_messages: true,
            ignore_newsletter_messages: true,
            ignore_bot_messages: true,
            ignore_meta_ai_messages: true,
        }
    }
}

impl JidFilter {
    /// Filter that lets everything through.
    pub const fn allow_all() -> Self {
        Self {
            ignore_group_messages: false,
            ignore_status_messages: false,
            ignore_broadcast_messages: false,
            ignore_newsletter_messages: false,
            ignore_bot_messages: false,
            ignore_meta_ai_messages: false,
        }
    }

    /// Whether traffic routed through `jid` should be dropped.
    pub fn should_ignore(&self, jid: &str) -> bool {
        match JidKind::classify(jid) {
            JidKind::Group => self.ignore_group_messages,
            JidKind::Status => self.ignore_status_messages,
            JidKind::Broadcast => self.ignore_broadcast_messages,
            JidKind::Newsletter => self.ignore_newsletter_messages,
            JidKind::Bot => self.ignore_bot_messages,
            JidKind::MetaAi => self.ignore_meta_ai_messages,
            JidKind::User | JidKind::Other => false,
        }
    }
}
