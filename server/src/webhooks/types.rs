//! Webhook Types
//!
//! Outbound events, delivery options, retry policy and outcomes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::events::WebhookEventType;
use super::sanitize;

/// Event published to a webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEvent {
    pub event: WebhookEventType,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl WebhookEvent {
    /// Create an event without extra data.
    pub const fn new(event: WebhookEventType, data: Value) -> Self {
        Self {
            event,
            data,
            extra: None,
        }
    }

    /// Attach extra data (e.g. downloaded media).
    #[must_use]
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Event as a JSON value, before sanitization.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("event".into(), Value::String(self.event.as_str().into()));
        map.insert("data".into(), self.data.clone());
        if let Some(extra) = &self.extra {
            map.insert("extra".into(), extra.clone());
        }
        Value::Object(map)
    }

    /// Sanitized wire body: `{event, data, extra?, webhookVerifyToken, awaitResponse?}`.
    pub fn to_body(&self, verify_token: &str, options: DeliveryOptions) -> Value {
        let mut body = sanitize::for_delivery(&self.to_value());
        if let Value::Object(map) = &mut body {
            map.insert(
                "webhookVerifyToken".into(),
                Value::String(verify_token.to_string()),
            );
            if options.await_response {
                map.insert("awaitResponse".into(), Value::Bool(true));
            }
        }
        body
    }
}

/// Per-delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// Ask the receiver to process the event before answering.
    pub await_response: bool,
}

impl DeliveryOptions {
    /// Options with `awaitResponse: true`.
    pub const fn awaiting_response() -> Self {
        Self {
            await_response: true,
        }
    }
}

/// Where a connection's events are delivered.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub url: String,
    pub verify_token: String,
}

impl std::fmt::Debug for WebhookTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookTarget")
            .field("url", &self.url)
            .field("verify_token", &"***")
            .finish()
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub retry_interval_ms: u64,
    /// Multiplier applied to the delay after every retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval_ms: 5000,
            backoff_factor: 3.0,
        }
    }
}

impl RetryPolicy {
    /// Total attempts, first one included.
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry `retry_index` (0-based), jitter excluded:
    /// `retry_interval_ms * backoff_factor^retry_index`.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let millis = self.retry_interval_ms as f64 * self.backoff_factor.powi(exponent);
        // `as` saturates for values beyond u64
        Duration::from_millis(millis as u64)
    }
}

/// Result of a delivery sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A 2xx response was received.
    Delivered { attempts: u32, status: u16 },
    /// Every attempt failed.
    Failed { attempts: u32 },
}

impl DeliveryOutcome {
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts, .. } | Self::Failed { attempts } => *attempts,
        }
    }

    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Transport-level webhook failures (no response received).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Transport error: {0}")]
    Other(String),
}
