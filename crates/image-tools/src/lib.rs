//! Image tool adapters.
//!
//! Each tool maps a typed request to a typed reply synchronously:
//! - [`tools::OcrTool`] - text recognition
//! - [`tools::BrightnessTool`] - brightness adjustment
//! - [`tools::AutoCropTool`] - border cropping
//! - [`tools::ScaleTool`] - resizing
//!
//! The [`ToolAdapter`] trait is the only contract the worker core relies on.

pub mod error;
pub mod messages;
pub mod payload;
pub mod registry;
pub mod tools;

pub use error::ToolError;
pub use registry::{ToolAdapter, ToolKind};
