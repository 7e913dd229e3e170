//! crates/liveness_core/src/image.rs
//!
//! Captured frames and ID document images travel as opaque, base64-encoded
//! payloads. This module decodes them, enforces the size bound and checks that
//! the bytes at least look like an image format the collaborators accept.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;

use crate::error::VerificationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// Detects the format from the leading magic bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(PNG_MAGIC) {
            Some(ImageFormat::Png)
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }
}

/// A decoded image. Cloning is cheap: the bytes are reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    bytes: Bytes,
    format: ImageFormat,
}

impl ImageFrame {
    /// Wraps raw bytes, rejecting empty or unrecognised payloads.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self, VerificationError> {
        let bytes = data.into();
        if bytes.is_empty() {
            return Err(VerificationError::InvalidImage("image payload is empty".to_string()));
        }
        let format = ImageFormat::sniff(&bytes).ok_or_else(|| {
            VerificationError::InvalidImage("unsupported or corrupt image data".to_string())
        })?;
        Ok(Self { bytes, format })
    }

    /// Decodes a base64 payload (bare or as a `data:` URL) no larger than `max_bytes`.
    pub fn from_base64(encoded: &str, max_bytes: usize) -> Result<Self, VerificationError> {
        let payload = strip_data_url(encoded.trim());

        // Reject obviously oversized payloads before allocating for them.
        let estimate = base64::decoded_len_estimate(payload.len());
        if estimate > max_bytes.saturating_add(3) {
            return Err(VerificationError::PayloadTooLarge {
                size: estimate,
                limit: max_bytes,
            });
        }

        let decoded = STANDARD
            .decode(payload)
            .map_err(|e| VerificationError::InvalidImage(format!("invalid base64: {}", e)))?;
        if decoded.len() > max_bytes {
            return Err(VerificationError::PayloadTooLarge {
                size: decoded.len(),
                limit: max_bytes,
            });
        }
        Self::from_bytes(decoded)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Renders the frame as a `data:` URL, the form vision model APIs accept inline.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            STANDARD.encode(&self.bytes)
        )
    }
}

fn strip_data_url(value: &str) -> &str {
    match value.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => value,
    }
}
