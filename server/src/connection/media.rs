//! Inbound Media
//!
//! Downloads the media attached to inbound messages so it can travel with
//! the webhook as `extra.media` (message id to base64 content).

use base64::Engine as _;
use relay_common::PhoneNumber;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::session::SessionHandle;

/// Message content kinds that carry downloadable media.
const MEDIA_KINDS: &[&str] = &[
    "imageMessage",
    "videoMessage",
    "audioMessage",
    "documentMessage",
    "stickerMessage",
    "ptvMessage",
];

/// Whether a message carries downloadable media.
pub fn has_media(message: &Value) -> bool {
    let Some(content) = message.get("message").and_then(Value::as_object) else {
        return false;
    };
    MEDIA_KINDS.iter().any(|kind| content.contains_key(*kind))
        || content
            .get("documentWithCaptionMessage")
            .and_then(|inner| inner.pointer("/message/documentMessage"))
            .is_some()
}

/// Download every message's media. Failures are logged and skipped.
/// `None` when nothing was downloaded.
pub async fn download_all(
    phone: &PhoneNumber,
    handle: &dyn SessionHandle,
    messages: &[Value],
) -> Option<Map<String, Value>> {
    let mut media = Map::new();

    for message in messages.iter().filter(|m| has_media(m)) {
        let Some(id) = message.pointer("/key/id").and_then(Value::as_str) else {
            continue;
        };
        match handle.download_media(message).await {
            Ok(Some(bytes)) => {
                debug!(phone = %phone, message_id = %id, size = bytes.len(), "Media downloaded");
                media.insert(
                    id.to_string(),
                    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
                );
            }
            Ok(None) => {}
            Err(e) => warn!(
                phone = %phone,
                message_id = %id,
                error = %e,
                "Failed to download media"
            ),
        }
    }

    (!media.is_empty()).then_some(media)
}
