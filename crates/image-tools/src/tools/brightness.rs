//! Brightness adjustment tool.

use image::DynamicImage;

use crate::error::ToolError;
use crate::messages::{BrightnessRequest, MediaReply};
use crate::payload;
use crate::registry::ToolAdapter;

/// Multiplies the RGB channels of an image by a constant factor.
#[derive(Debug, Default, Clone)]
pub struct BrightnessTool;

impl BrightnessTool {
    pub fn new() -> Self {
        Self
    }

    /// Scale every colour channel by `factor`, leaving alpha untouched.
    pub fn adjust(image: &DynamicImage, factor: f32) -> DynamicImage {
        let mut rgba = image.to_rgba8();
        for pixel in rgba.pixels_mut() {
            for channel in pixel.0.iter_mut().take(3) {
                *channel = (*channel as f32 * factor).round().clamp(0.0, 255.0) as u8;
            }
        }
        DynamicImage::ImageRgba8(rgba)
    }
}

impl ToolAdapter for BrightnessTool {
    type Request = BrightnessRequest;
    type Reply = MediaReply;

    fn name(&self) -> &'static str {
        "brightness"
    }

    fn apply(&self, request: BrightnessRequest) -> Result<MediaReply, ToolError> {
        if !request.factor.is_finite() || request.factor < 0.0 {
            return Err(ToolError::InvalidInput(format!(
                "brightness factor must be a finite non-negative number, got {}",
                request.factor
            )));
        }

        let bytes = payload::decode_base64(&request.image)?;
        let (image, format) = payload::load_as(&bytes, &request.mimetype)?;

        tracing::debug!(
            width = image.width(),
            height = image.height(),
            factor = request.factor,
            "Adjusting brightness"
        );

        let adjusted = Self::adjust(&image, request.factor);
        let encoded = payload::write(&adjusted, format)?;

        Ok(MediaReply::new(
            payload::mimetype_of(format),
            payload::encode_base64(&encoded),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::fixtures::{image_with_block, png_base64};

    fn request(factor: f32) -> BrightnessRequest {
        let img = image_with_block(4, 4, [100, 50, 200, 255], None);
        BrightnessRequest {
            image: png_base64(&img),
            mimetype: "image/png".to_string(),
            factor,
        }
    }

    fn first_pixel(reply: &MediaReply) -> [u8; 4] {
        let bytes = payload::decode_base64(&reply.data).unwrap();
        let (img, _) = payload::load(&bytes).unwrap();
        img.to_rgba8().get_pixel(0, 0).0
    }

    #[test]
    fn test_brighten_clamps() {
        let reply = BrightnessTool::new().apply(request(2.0)).unwrap();
        assert_eq!(reply.mimetype, "image/png");
        assert_eq!(first_pixel(&reply), [200, 100, 255, 255]);
    }

    #[test]
    fn test_darken() {
        let reply = BrightnessTool::new().apply(request(0.5)).unwrap();
        assert_eq!(first_pixel(&reply), [50, 25, 100, 255]);
    }

    #[test]
    fn test_identity_factor() {
        let reply = BrightnessTool::new().apply(request(1.0)).unwrap();
        assert_eq!(first_pixel(&reply), [100, 50, 200, 255]);
    }

    #[test]
    fn test_rejects_negative_factor() {
        let result = BrightnessTool::new().apply(request(-1.0));
        assert!(matches!(result, Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_corrupt_image() {
        let req = BrightnessRequest {
            image: payload::encode_base64(b"corrupt bytes"),
            mimetype: "image/png".to_string(),
            factor: 1.5,
        };
        assert!(BrightnessTool::new().apply(req).is_err());
    }

    #[test]
    fn test_rejects_unsupported_mimetype() {
        let mut req = request(1.0);
        req.mimetype = "application/pdf".to_string();
        assert!(matches!(
            BrightnessTool::new().apply(req),
            Err(ToolError::UnsupportedFormat(_))
        ));
    }
}
