//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use relay_common::JidFilter;
use serde::Serialize;
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::session::ClientVersionConfig;
use crate::webhooks::RetryPolicy;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:3025")
    pub bind_address: String,

    /// Redis connection URL
    pub redis_url: String,

    /// Namespace for every Redis key
    pub redis_key_prefix: String,

    /// Session engine bridge endpoint
    pub engine_url: String,

    /// Static API key required as `x-api-key` (optional)
    pub api_key: Option<String>,

    /// Webhook retry policy, validated at load
    pub retry_policy: RetryPolicy,

    /// Per-attempt webhook HTTP timeout
    pub webhook_timeout: Duration,

    /// Message-origin filter
    pub jid_filter: JidFilter,

    /// Engine client version pinning
    pub client_version: ClientVersionConfig,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable value");
            None
        }
    }
}

/// `"true"` enables, anything else set disables, unset falls back to `default`.
fn flag(name: &str, default: bool) -> bool {
    env::var(name).map_or(default, |v| v.trim() == "true")
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let bind_address = var_or("BIND_ADDRESS", "0.0.0.0:3025");
        bind_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("BIND_ADDRESS is not a socket address: {bind_address}"))?;

        let client_version = var_or("CLIENT_VERSION", "default");

        Ok(Self {
            bind_address,
            redis_url: var_or("REDIS_URL", "redis://localhost:6379"),
            redis_key_prefix: var_or("REDIS_KEY_PREFIX", "relay"),
            engine_url: var_or("ENGINE_URL", "ws://localhost:3030"),
            api_key: env::var("API_KEY").ok().filter(|k| !k.is_empty()),
            retry_policy: validate_retry_policy(
                parse_var("WEBHOOK_RETRY_POLICY_MAX_RETRIES"),
                parse_var("WEBHOOK_RETRY_POLICY_RETRY_INTERVAL"),
                parse_var("WEBHOOK_RETRY_POLICY_BACKOFF_FACTOR"),
            ),
            webhook_timeout: Duration::from_secs(
                parse_var::<u64>("WEBHOOK_TIMEOUT_SECS")
                    .filter(|secs| *secs > 0)
                    .unwrap_or(10),
            ),
            jid_filter: JidFilter {
                ignore_group_messages: flag("IGNORE_GROUP_MESSAGES", true),
                ignore_status_messages: flag("IGNORE_STATUS_MESSAGES", true),
                ignore_broadcast_messages: flag("IGNORE_BROADCAST_MESSAGES", true),
                ignore_newsletter_messages: flag("IGNORE_NEWSLETTER_MESSAGES", true),
                ignore_bot_messages: flag("IGNORE_BOT_MESSAGES", true),
                ignore_meta_ai_messages: flag("IGNORE_META_AI_MESSAGES", true),
            },
            client_version: ClientVersionConfig {
                client_version: (client_version != "default").then_some(client_version),
                override_client_version: flag("OVERRIDE_CLIENT_VERSION", false),
            },
        })
    }

    /// Check if API key auth is enabled.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Configuration safe to expose and log: secrets stripped.
    #[must_use]
    pub fn status(&self) -> ConfigStatus {
        ConfigStatus {
            package_info: PackageInfo {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                description: env!("CARGO_PKG_DESCRIPTION"),
            },
            bind_address: self.bind_address.clone(),
            redis: RedisStatus {
                url: strip_credentials(&self.redis_url),
                key_prefix: self.redis_key_prefix.clone(),
            },
            engine_url: strip_credentials(&self.engine_url),
            api_key_required: self.has_api_key(),
            webhook: WebhookStatus {
                retry_policy: self.retry_policy,
                timeout_secs: self.webhook_timeout.as_secs(),
            },
            jid_filter: self.jid_filter,
            client_version: self.client_version.clone(),
        }
    }

    /// Create a default configuration for testing.
    ///
    /// Redis: `docker run -d --name relay-test-redis -p 6380:6379 redis:7`
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:3025".into(),
            redis_url: "redis://localhost:6380".into(),
            redis_key_prefix: "relay-test".into(),
            engine_url: "ws://localhost:3030".into(),
            api_key: None,
            retry_policy: RetryPolicy::default(),
            webhook_timeout: Duration::from_secs(10),
            jid_filter: JidFilter::default(),
            client_version: ClientVersionConfig::default(),
        }
    }
}

/// Build the retry policy, replacing invalid values with defaults.
///
/// A backoff factor between 0 and 1 is raised to 1 so delays never shrink.
fn validate_retry_policy(
    max_retries: Option<u32>,
    retry_interval_ms: Option<u64>,
    backoff_factor: Option<f64>,
) -> RetryPolicy {
    let defaults = RetryPolicy::default();

    let retry_interval_ms = match retry_interval_ms {
        Some(0) => {
            warn!(
                default = defaults.retry_interval_ms,
                "Webhook retry interval must be positive, using default"
            );
            defaults.retry_interval_ms
        }
        Some(ms) => ms,
        None => defaults.retry_interval_ms,
    };

    let backoff_factor = match backoff_factor {
        Some(f) if !f.is_finite() || f <= 0.0 => {
            warn!(
                value = f,
                default = defaults.backoff_factor,
                "Webhook backoff factor must be positive, using default"
            );
            defaults.backoff_factor
        }
        Some(f) if f < 1.0 => {
            warn!(value = f, "Webhook backoff factor below 1, using 1");
            1.0
        }
        Some(f) => f,
        None => defaults.backoff_factor,
    };

    RetryPolicy {
        max_retries: max_retries.unwrap_or(defaults.max_retries),
        retry_interval_ms,
        backoff_factor,
    }
}

/// Drop `user:password@` from a URL.
fn strip_credentials(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}

/// Sanitized configuration served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStatus {
    pub package_info: PackageInfo,
    pub bind_address: String,
    pub redis: RedisStatus,
    pub engine_url: String,
    pub api_key_required: bool,
    pub webhook: WebhookStatus,
    pub jid_filter: JidFilter,
    pub client_version: ClientVersionConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatus {
    pub url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookStatus {
    pub retry_policy: RetryPolicy,
    pub timeout_secs: u64,
}
