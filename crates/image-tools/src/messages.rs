//! Request and reply messages exchanged with callers.
//!
//! Every message is a flat JSON object. Image payloads are base64 text.

use serde::{Deserialize, Serialize};

/// OCR request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRequest {
    /// Base64-encoded image.
    pub image: String,

    /// Mimetype of the encoded image (e.g. `image/png`).
    pub mimetype: String,
}

/// Brightness adjustment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrightnessRequest {
    /// Base64-encoded image.
    pub image: String,

    /// Mimetype of the encoded image.
    pub mimetype: String,

    /// Multiplicative brightness factor; `1.0` leaves the image unchanged.
    pub factor: f32,
}

/// Autocrop request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCropRequest {
    /// Base64-encoded image; the format is detected from content.
    pub image: String,
}

/// Autocrop reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCropReply {
    /// Base64-encoded cropped image, same format as the input.
    pub image: String,
}

/// Scale request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleRequest {
    /// Base64-encoded image.
    pub image: String,

    /// Mimetype of the encoded image.
    pub mimetype: String,

    /// Scale factor applied to both sides.
    pub factor: f32,
}

/// Reply carrying an encoded result and its mimetype.
///
/// Used by OCR (`text/plain`, recognised text), brightness and scale
/// (image mimetype, base64 image).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaReply {
    pub mimetype: String,
    pub data: String,
}

impl MediaReply {
    pub fn new(mimetype: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mimetype: mimetype.into(),
            data: data.into(),
        }
    }
}
