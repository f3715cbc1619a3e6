//! Webhook Delivery Engine
//!
//! Sanitized HTTP POST delivery of connection events with bounded retry,
//! exponential backoff and jitter, ordered per connection.

pub mod delivery;
pub mod events;
pub mod outbox;
pub mod sanitize;
pub mod types;

pub use delivery::{Clock, HttpTransport, TokioClock, WebhookDispatcher, WebhookTransport};
pub use events::WebhookEventType;
pub use outbox::{WebhookOutbox, WebhookSink, WebhookSinkFactory};
pub use types::{
    DeliveryOptions, DeliveryOutcome, RetryPolicy, TransportError, WebhookEvent, WebhookTarget,
};
