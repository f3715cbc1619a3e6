//! Payload Sanitization
//!
//! Strips key material, media hashes and thumbnails from payloads before
//! they are transmitted or logged. Removal is recursive through objects and
//! arrays, so a sensitive field is dropped however deeply it is nested.

use serde_json::Value;

/// Fields never sent to a webhook nor written to a log line.
pub const SENSITIVE_KEYS: &[&str] = &[
    "fileSha256",
    "jpegThumbnail",
    "fileEncSha256",
    "scansSidecar",
    "midQualityFileSha256",
    "mediaKey",
    "senderKeyHash",
    "recipientKeyHash",
    "messageSecret",
    "thumbnailSha256",
    "thumbnailEncSha256",
    "appStateSyncKeyShare",
];

/// Fields delivered to the webhook but kept out of logs.
pub const LOG_ONLY_OMIT_KEYS: &[&str] = &["qr", "qrDataUrl"];

/// Remove every field named in `omit_keys` from `value`, at any depth.
pub fn sanitize(value: &Value, omit_keys: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !omit_keys.contains(&key.as_str()))
                .map(|(key, inner)| (key.clone(), sanitize(inner, omit_keys)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| sanitize(v, omit_keys)).collect()),
        other => other.clone(),
    }
}

/// Sanitize a payload for transmission.
pub fn for_delivery(value: &Value) -> Value {
    sanitize(value, SENSITIVE_KEYS)
}

/// Sanitize a payload for a log line.
pub fn for_log(value: &Value) -> Value {
    let delivered = sanitize(value, SENSITIVE_KEYS);
    sanitize(&delivered, LOG_ONLY_OMIT_KEYS)
}
