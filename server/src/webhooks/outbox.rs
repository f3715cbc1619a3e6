//! Per-Connection Webhook Outbox
//!
//! Events are queued without blocking the connection's event loop and
//! delivered by one worker task per connection, so deliveries for a single
//! account keep the order their events occurred in while a slow retry
//! sequence on one account never holds up another.

use std::sync::Arc;

use relay_common::PhoneNumber;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::delivery::WebhookDispatcher;
use super::types::{DeliveryOptions, WebhookEvent, WebhookTarget};

/// Destination for a connection's outbound events.
pub trait WebhookSink: Send + Sync {
    /// Queue an event. Never blocks and never fails.
    fn emit(&self, event: WebhookEvent, options: DeliveryOptions);
}

/// Builds the sink for a new connection.
pub trait WebhookSinkFactory: Send + Sync {
    fn create(&self, phone: &PhoneNumber, target: WebhookTarget) -> Arc<dyn WebhookSink>;
}

struct QueuedEvent {
    event: WebhookEvent,
    options: DeliveryOptions,
}

/// Ordered queue drained by a dedicated delivery task.
pub struct WebhookOutbox {
    phone: PhoneNumber,
    tx: mpsc::UnboundedSender<QueuedEvent>,
}

impl WebhookOutbox {
    /// Spawn the delivery worker. Must be called inside a tokio runtime.
    /// The worker drains what is queued and stops once the outbox is dropped.
    pub fn spawn(phone: PhoneNumber, target: WebhookTarget, dispatcher: WebhookDispatcher) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedEvent>();
        let worker_phone = phone.clone();

        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                let outcome = dispatcher
                    .deliver(&target, &queued.event, queued.options)
                    .await;
                debug!(
                    phone = %worker_phone,
                    event = %queued.event.event,
                    attempts = outcome.attempts(),
                    delivered = outcome.is_delivered(),
                    "Webhook outbox entry processed"
                );
            }
            debug!(phone = %worker_phone, "Webhook outbox drained");
        });

        Self { phone, tx }
    }
}

impl WebhookSink for WebhookOutbox {
    fn emit(&self, event: WebhookEvent, options: DeliveryOptions) {
        if self.tx.send(QueuedEvent { event, options }).is_err() {
            warn!(phone = %self.phone, "Webhook outbox worker is gone, event dropped");
        }
    }
}

impl WebhookSinkFactory for WebhookDispatcher {
    fn create(&self, phone: &PhoneNumber, target: WebhookTarget) -> Arc<dyn WebhookSink> {
        Arc::new(WebhookOutbox::spawn(phone.clone(), target, self.clone()))
    }
}
