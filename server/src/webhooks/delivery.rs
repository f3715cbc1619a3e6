//! Webhook Delivery
//!
//! Delivers one event to a webhook URL with bounded retries:
//! - up to `max_retries + 1` POST attempts;
//! - a non-2xx response counts as a failed attempt, not an error;
//! - before retry `k` the dispatcher waits `retry_interval * backoff^k` plus
//!   up to one second of jitter;
//! - exhausting every attempt is logged and reported, never raised.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sanitize;
use super::types::{
    DeliveryOptions, DeliveryOutcome, RetryPolicy, TransportError, WebhookEvent, WebhookTarget,
};

/// Upper bound (exclusive) of the random jitter added to each retry delay.
const MAX_JITTER_MS: u64 = 1000;

/// Sends a JSON body and reports the HTTP status.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &str, body: &Value) -> Result<u16, TransportError>;
}

/// `reqwest`-backed transport with a per-request timeout.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, url: &str, body: &Value) -> Result<u16, TransportError> {
        let response = self.client.post(url).json(body).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Time source for retry waits.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);

    /// Random extra delay added to each retry.
    fn jitter(&self) -> Duration;
}

/// Real clock: tokio timers and uniform jitter in `[0, 1000)` ms.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn jitter(&self) -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(0..MAX_JITTER_MS))
    }
}

/// Delivers webhook events with retry and backoff.
#[derive(Clone)]
pub struct WebhookDispatcher {
    transport: Arc<dyn WebhookTransport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl WebhookDispatcher {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            clock,
            policy,
        }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `event` to `target`. Never fails; the outcome says how it went.
    pub async fn deliver(
        &self,
        target: &WebhookTarget,
        event: &WebhookEvent,
        options: DeliveryOptions,
    ) -> DeliveryOutcome {
        let delivery_id = Uuid::now_v7();
        let body = event.to_body(&target.verify_token, options);
        let logged = sanitize::for_log(&event.to_value());
        let max_retries = self.policy.max_retries;

        debug!(
            delivery_id = %delivery_id,
            event = %event.event,
            await_response = options.await_response,
            payload = %logged,
            "Sending webhook"
        );

        for attempt in 0..=max_retries {
            match self.transport.post(&target.url, &body).await {
                Ok(status) if (200..300).contains(&status) => {
                    debug!(
                        delivery_id = %delivery_id,
                        event = %event.event,
                        status,
                        attempts = attempt + 1,
                        "Webhook delivered"
                    );
                    return DeliveryOutcome::Delivered {
                        attempts: attempt + 1,
                        status,
                    };
                }
                Ok(status) => {
                    error!(
                        delivery_id = %delivery_id,
                        event = %event.event,
                        status,
                        payload = %logged,
                        "Webhook responded with error status"
                    );
                }
                Err(e) => {
                    error!(
                        delivery_id = %delivery_id,
                        event = %event.event,
                        error = %e,
                        payload = %logged,
                        "Webhook request failed"
                    );
                }
            }

            if attempt < max_retries {
                let delay = self.policy.delay_for(attempt);
                info!(
                    delivery_id = %delivery_id,
                    event = %event.event,
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying webhook delivery"
                );
                self.clock
                    .sleep(delay.saturating_add(self.clock.jitter()))
                    .await;
            }
        }

        warn!(
            delivery_id = %delivery_id,
            event = %event.event,
            url = %target.url,
            payload = %logged,
            "Webhook delivery exhausted all retries"
        );

        DeliveryOutcome::Failed {
            attempts: self.policy.max_attempts(),
        }
    }
}
