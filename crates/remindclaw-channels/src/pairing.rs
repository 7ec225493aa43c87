//! Pairing challenge rendering: the raw WhatsApp pairing string becomes a
//! scannable PNG, delivered to observers as a `data:` URL.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;

use remindclaw_core::error::{RemindClawError, Result};

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Smallest edge of the rendered code, in pixels.
const MIN_SIZE: u32 = 256;

/// Encode `payload` as a QR code PNG data URL.
pub fn qr_data_url(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| RemindClawError::Channel(format!("QR encode: {e}")))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_SIZE, MIN_SIZE)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| RemindClawError::Channel(format!("QR render: {e}")))?;
    Ok(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(&png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_data_url_is_decodable_png() {
        let url = qr_data_url("2@AbCdEf,Gh1jKl,MnOpQr==").unwrap();
        let encoded = url.strip_prefix(DATA_URL_PREFIX).unwrap();
        let png = STANDARD.decode(encoded).unwrap();

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert!(decoded.width() >= MIN_SIZE);
        assert_eq!(decoded.width(), decoded.height());
    }

    #[test]
    fn test_distinct_payloads_render_differently() {
        assert_ne!(qr_data_url("2@first").unwrap(), qr_data_url("2@second").unwrap());
    }

    #[test]
    fn test_oversized_payload_is_error() {
        let payload = "x".repeat(8000);
        assert!(qr_data_url(&payload).is_err());
    }
}
