//! Image scaling tool.

use image::imageops::FilterType;

use crate::error::ToolError;
use crate::messages::{MediaReply, ScaleRequest};
use crate::payload;
use crate::registry::ToolAdapter;

/// Largest side, in pixels, a scaled image may have.
pub const MAX_DIMENSION: u32 = 16_384;

/// Resizes an image by a uniform factor.
#[derive(Debug, Default, Clone)]
pub struct ScaleTool;

impl ScaleTool {
    pub fn new() -> Self {
        Self
    }

    /// Target dimensions for `(width, height)` scaled by `factor`.
    pub fn target_dimensions(width: u32, height: u32, factor: f32) -> Result<(u32, u32), ToolError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ToolError::InvalidInput(format!(
                "scale factor must be a finite positive number, got {}",
                factor
            )));
        }

        let scale = |side: u32| ((side as f64 * factor as f64).round() as u64).max(1);
        let (w, h) = (scale(width), scale(height));
        if w > MAX_DIMENSION as u64 || h > MAX_DIMENSION as u64 {
            return Err(ToolError::InvalidInput(format!(
                "scaled size {}x{} exceeds the {} px limit",
                w, h, MAX_DIMENSION
            )));
        }
        Ok((w as u32, h as u32))
    }
}

impl ToolAdapter for ScaleTool {
    type Request = ScaleRequest;
    type Reply = MediaReply;

    fn name(&self) -> &'static str {
        "scale"
    }

    fn apply(&self, request: ScaleRequest) -> Result<MediaReply, ToolError> {
        let bytes = payload::decode_base64(&request.image)?;
        let (image, format) = payload::load_as(&bytes, &request.mimetype)?;
        let (width, height) = Self::target_dimensions(image.width(), image.height(), request.factor)?;

        tracing::debug!(
            from_width = image.width(),
            from_height = image.height(),
            to_width = width,
            to_height = height,
            "Scaling image"
        );

        let scaled = image.resize_exact(width, height, FilterType::Lanczos3);
        let encoded = payload::write(&scaled, format)?;

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

    fn scale(factor: f32) -> Result<MediaReply, ToolError> {
        let img = image_with_block(10, 6, [0, 128, 255, 255], None);
        ScaleTool::new().apply(ScaleRequest {
            image: png_base64(&img),
            mimetype: "image/png".to_string(),
            factor,
        })
    }

    fn dimensions(reply: &MediaReply) -> (u32, u32) {
        let (img, _) = payload::load(&payload::decode_base64(&reply.data).unwrap()).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_scale_up() {
        let reply = scale(2.0).unwrap();
        assert_eq!(reply.mimetype, "image/png");
        assert_eq!(dimensions(&reply), (20, 12));
    }

    #[test]
    fn test_scale_down_keeps_one_pixel() {
        let reply = scale(0.01).unwrap();
        assert_eq!(dimensions(&reply), (1, 1));
    }

    #[test]
    fn test_rejects_bad_factor() {
        assert!(matches!(scale(0.0), Err(ToolError::InvalidInput(_))));
        assert!(matches!(scale(f32::NAN), Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_oversized_target() {
        assert!(ScaleTool::target_dimensions(10_000, 10, 2.0).is_err());
        assert_eq!(ScaleTool::target_dimensions(100, 50, 1.5).unwrap(), (150, 75));
    }
}
