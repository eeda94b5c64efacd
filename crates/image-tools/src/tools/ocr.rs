//! OCR tool backed by the Tesseract command-line engine.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::ToolError;
use crate::messages::{MediaReply, OcrRequest};
use crate::payload;
use crate::registry::ToolAdapter;

/// Default OCR engine binary.
pub const DEFAULT_BINARY: &str = "tesseract";

/// Default recognition language.
pub const DEFAULT_LANGUAGE: &str = "eng";

/// Recognises text in an image by running the OCR engine on a temporary file.
#[derive(Debug, Clone)]
pub struct OcrTool {
    binary: PathBuf,
    language: String,
}

impl OcrTool {
    /// Create an OCR tool using `binary` and the recognition `language`.
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Run the engine on an image file and return the recognised text.
    fn recognize(&self, image_path: &Path) -> Result<String, ToolError> {
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                ToolError::Process(format!(
                    "Failed to spawn OCR engine '{}': {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::Process(format!(
                "OCR engine exited with code {}: {}",
                exit_code,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for OcrTool {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY, DEFAULT_LANGUAGE)
    }
}

impl ToolAdapter for OcrTool {
    type Request = OcrRequest;
    type Reply = MediaReply;

    fn name(&self) -> &'static str {
        "ocr"
    }

    fn apply(&self, request: OcrRequest) -> Result<MediaReply, ToolError> {
        let bytes = payload::decode_base64(&request.image)?;
        // Fail on unreadable images before paying for a process spawn.
        let (_, format) = payload::load_as(&bytes, &request.mimetype)?;

        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let mut file = tempfile::Builder::new()
            .prefix("ocr-")
            .suffix(&format!(".{}", extension))
            .tempfile()
            .map_err(|e| ToolError::Io(format!("Failed to create temp file: {}", e)))?;
        file.write_all(&bytes)?;
        file.flush()?;

        let text = self.recognize(file.path())?;
        tracing::debug!(chars = text.chars().count(), "OCR finished");

        Ok(MediaReply::new("text/plain", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::fixtures::{image_with_block, png_base64};

    fn valid_request() -> OcrRequest {
        OcrRequest {
            image: png_base64(&image_with_block(8, 8, [255, 255, 255, 255], None)),
            mimetype: "image/png".to_string(),
        }
    }

    #[test]
    fn test_defaults() {
        let tool = OcrTool::default();
        assert_eq!(tool.binary(), Path::new("tesseract"));
        assert_eq!(tool.language(), "eng");
        assert_eq!(tool.name(), "ocr");
    }

    #[test]
    fn test_missing_engine_is_process_error() {
        let tool = OcrTool::new("/nonexistent/ocr-engine", "eng");
        let result = tool.apply(valid_request());
        assert!(matches!(result, Err(ToolError::Process(_))));
    }

    #[test]
    fn test_corrupt_image_rejected_before_spawn() {
        let tool = OcrTool::new("/nonexistent/ocr-engine", "eng");
        let result = tool.apply(OcrRequest {
            image: payload::encode_base64(b"\x89PNG but not really"),
            mimetype: "image/png".to_string(),
        });
        assert!(result.is_err());
        assert!(!matches!(result, Err(ToolError::Process(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_engine_stdout_becomes_reply() {
        // `echo` prints its arguments, standing in for the engine.
        let tool = OcrTool::new("echo", "deu");
        let reply = tool.apply(valid_request()).unwrap();
        assert_eq!(reply.mimetype, "text/plain");
        assert!(reply.data.ends_with("stdout -l deu"));
    }

    #[cfg(unix)]
    #[test]
    fn test_engine_failure_is_process_error() {
        let tool = OcrTool::new("false", "eng");
        let result = tool.apply(valid_request());
        assert!(matches!(result, Err(ToolError::Process(msg)) if msg.contains("exited with code 1")));
    }
}
