//! QR Rendering
//!
//! Pairing challenges are forwarded as `data:image/png;base64,...` URLs so
//! the webhook receiver can display them directly.

use std::io::Cursor;

use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;

use super::error::ConnectionError;

/// Smallest rendered side, in pixels.
const MIN_DIMENSION: u32 = 264;

/// Render `challenge` as a PNG QR code data URL.
pub fn to_data_url(challenge: &str) -> Result<String, ConnectionError> {
    let code = QrCode::new(challenge.as_bytes()).map_err(|e| ConnectionError::Qr(e.to_string()))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ConnectionError::Qr(e.to_string()))?;

    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}
