//! Built-in tool implementations.
//!
//! This module provides implementations for the image tools:
//! - `ocr` - Recognise text with the Tesseract engine
//! - `brightness` - Scale colour channels by a factor
//! - `autocrop` - Trim uniform borders
//! - `scale` - Resize by a factor

mod autocrop;
mod brightness;
pub mod ocr;
pub mod scale;

pub use self::autocrop::AutoCropTool;
pub use self::brightness::BrightnessTool;
pub use self::ocr::OcrTool;
pub use self::scale::ScaleTool;
