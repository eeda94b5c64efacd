//! Image payload helpers shared by the tools.
//!
//! Images travel as base64 text inside JSON messages. These helpers convert
//! between that text form, raw bytes and decoded [`DynamicImage`]s while
//! keeping track of the image format so replies can be re-encoded the same way.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::error::ToolError;

/// Formats the tools accept and produce.
const SUPPORTED_FORMATS: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Bmp];

/// Decode base64 text into raw bytes.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, ToolError> {
    Ok(STANDARD.decode(text.trim())?)
}

/// Encode raw bytes as base64 text.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Resolve a mimetype such as `image/png` into a supported format.
pub fn format_from_mimetype(mimetype: &str) -> Result<ImageFormat, ToolError> {
    ImageFormat::from_mime_type(mimetype.trim())
        .filter(|format| SUPPORTED_FORMATS.contains(format))
        .ok_or_else(|| ToolError::UnsupportedFormat(format!("mimetype '{}'", mimetype)))
}

/// Mimetype for a format.
pub fn mimetype_of(format: ImageFormat) -> &'static str {
    format.to_mime_type()
}

/// Decode image bytes, detecting the format from content.
pub fn load(bytes: &[u8]) -> Result<(DynamicImage, ImageFormat), ToolError> {
    let format = image::guess_format(bytes)?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(ToolError::UnsupportedFormat(format!("{:?}", format)));
    }
    let image = image::load_from_memory_with_format(bytes, format)?;
    Ok((image, format))
}

/// Decode image bytes using the format named by the request's mimetype.
pub fn load_as(bytes: &[u8], mimetype: &str) -> Result<(DynamicImage, ImageFormat), ToolError> {
    let format = format_from_mimetype(mimetype)?;
    let image = image::load_from_memory_with_format(bytes, format)?;
    Ok((image, format))
}

/// Encode an image into the given format.
pub fn write(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ToolError> {
    let mut buf = Cursor::new(Vec::new());
    // JPEG has no alpha channel.
    if format == ImageFormat::Jpeg && image.color().has_alpha() {
        DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, format)?;
    } else {
        image.write_to(&mut buf, format)?;
    }
    Ok(buf.into_inner())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    use super::{encode_base64, write};

    /// A `width` x `height` image filled with `fill`, with an optional
    /// differently coloured inner rectangle `(x, y, w, h)`.
    pub fn image_with_block(
        width: u32,
        height: u32,
        fill: [u8; 4],
        block: Option<(u32, u32, u32, u32, [u8; 4])>,
    ) -> DynamicImage {
        let mut img = RgbaImage::from_pixel(width, height, Rgba(fill));
        if let Some((bx, by, bw, bh, color)) = block {
            for y in by..by + bh {
                for x in bx..bx + bw {
                    img.put_pixel(x, y, Rgba(color));
                }
            }
        }
        DynamicImage::ImageRgba8(img)
    }

    pub fn png_base64(image: &DynamicImage) -> String {
        encode_base64(&write(image, ImageFormat::Png).unwrap())
    }
}
