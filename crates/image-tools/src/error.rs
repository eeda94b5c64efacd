//! Tool adapter error types.

use thiserror::Error;

/// Errors that can occur while applying an image tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Request fields are structurally valid but semantically unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Mimetype or detected image format is not supported.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Image decoding or encoding failed.
    #[error("Image error: {0}")]
    Image(String),

    /// External process (e.g. the OCR engine) failed.
    #[error("Process error: {0}")]
    Process(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::Json(e.to_string())
    }
}

impl From<image::ImageError> for ToolError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::Unsupported(inner) => ToolError::UnsupportedFormat(inner.to_string()),
            other => ToolError::Image(other.to_string()),
        }
    }
}

impl From<base64::DecodeError> for ToolError {
    fn from(e: base64::DecodeError) -> Self {
        ToolError::InvalidInput(format!("image payload is not valid base64: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ToolError::InvalidInput("factor must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid input: factor must be positive");

        let err = ToolError::Process("tesseract exited with 1".to_string());
        assert_eq!(err.to_string(), "Process error: tesseract exited with 1");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let tool_err: ToolError = io_err.into();
        assert!(matches!(tool_err, ToolError::Io(_)));
    }

    #[test]
    fn test_error_from_base64() {
        use base64::Engine;
        let err = base64::engine::general_purpose::STANDARD
            .decode("not base64!!")
            .unwrap_err();
        let tool_err: ToolError = err.into();
        assert!(matches!(tool_err, ToolError::InvalidInput(_)));
    }
}
