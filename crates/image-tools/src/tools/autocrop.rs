//! Automatic border cropping tool.

use image::{DynamicImage, GenericImageView};

use crate::error::ToolError;
use crate::messages::{AutoCropReply, AutoCropRequest};
use crate::payload;
use crate::registry::ToolAdapter;

/// Trims the uniform border around an image.
///
/// The border colour is taken from the top-left pixel. Every row and column
/// consisting only of that colour is removed from the outside in.
#[derive(Debug, Default, Clone)]
pub struct AutoCropTool;

impl AutoCropTool {
    pub fn new() -> Self {
        Self
    }

    /// Bounding box `(x, y, width, height)` of the content, or `None` when the
    /// whole image is border.
    pub fn content_bounds(image: &DynamicImage) -> Option<(u32, u32, u32, u32)> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let border = image.get_pixel(0, 0);
        let mut min_x = width;
        let mut min_y = height;
        let mut max_x = 0;
        let mut max_y = 0;

        for (x, y, pixel) in image.pixels() {
            if pixel != border {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        if min_x > max_x || min_y > max_y {
            return None;
        }
        Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }
}

impl ToolAdapter for AutoCropTool {
    type Request = AutoCropRequest;
    type Reply = AutoCropReply;

    fn name(&self) -> &'static str {
        "autocrop"
    }

    fn apply(&self, request: AutoCropRequest) -> Result<AutoCropReply, ToolError> {
        let bytes = payload::decode_base64(&request.image)?;
        let (image, format) = payload::load(&bytes)?;

        let Some((x, y, w, h)) = Self::content_bounds(&image) else {
            tracing::debug!("Image is uniform, returning unchanged");
            return Ok(AutoCropReply {
                image: payload::encode_base64(&bytes),
            });
        };

        tracing::debug!(x, y, width = w, height = h, "Cropping to content");
        let cropped = image.crop_imm(x, y, w, h);
        let encoded = payload::write(&cropped, format)?;

        Ok(AutoCropReply {
            image: payload::encode_base64(&encoded),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::fixtures::{image_with_block, png_base64};

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const RED: [u8; 4] = [255, 0, 0, 255];

    #[test]
    fn test_crops_to_block() {
        let img = image_with_block(10, 8, WHITE, Some((2, 3, 4, 2, RED)));
        let reply = AutoCropTool::new()
            .apply(AutoCropRequest { image: png_base64(&img) })
            .unwrap();

        let (cropped, _) = payload::load(&payload::decode_base64(&reply.image).unwrap()).unwrap();
        assert_eq!(cropped.dimensions(), (4, 2));
        assert_eq!(cropped.to_rgba8().get_pixel(0, 0).0, RED);
    }

    #[test]
    fn test_uniform_image_unchanged() {
        let img = image_with_block(5, 5, WHITE, None);
        let original = png_base64(&img);
        let reply = AutoCropTool::new()
            .apply(AutoCropRequest { image: original.clone() })
            .unwrap();
        assert_eq!(reply.image, original);
    }

    #[test]
    fn test_content_bounds() {
        let img = image_with_block(6, 6, WHITE, Some((0, 5, 6, 1, RED)));
        assert_eq!(AutoCropTool::content_bounds(&img), Some((0, 5, 6, 1)));
        assert_eq!(AutoCropTool::content_bounds(&image_with_block(3, 3, RED, None)), None);
    }

    #[test]
    fn test_rejects_invalid_base64() {
        let result = AutoCropTool::new().apply(AutoCropRequest {
            image: "***".to_string(),
        });
        assert!(matches!(result, Err(ToolError::InvalidInput(_))));
    }
}
