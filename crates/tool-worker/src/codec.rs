//! Request/reply codec and job handlers.
//!
//! A [`JobHandler`] turns a raw request body into a raw reply body. The JSON
//! handler wraps any [`ToolAdapter`]: decode the request, apply the tool,
//! encode the reply.

use image_tools::tools::{AutoCropTool, BrightnessTool, OcrTool, ScaleTool};
use image_tools::{ToolAdapter, ToolKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Processes one request body on a pool thread.
pub trait JobHandler: Send + Sync + 'static {
    /// Tool name used in logs.
    fn tool_name(&self) -> &'static str;

    /// Decode, process and encode one job.
    ///
    /// Fails with [`WorkerError::Decode`] on malformed bodies and
    /// [`WorkerError::Processing`] on tool failures.
    fn handle(&self, body: &[u8]) -> Result<Vec<u8>, WorkerError>;
}

/// Decode a UTF-8 JSON request body.
pub fn decode<R: DeserializeOwned>(body: &[u8]) -> Result<R, WorkerError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| WorkerError::Decode(format!("body is not valid UTF-8: {}", e)))?;
    serde_json::from_str(text).map_err(|e| WorkerError::Decode(format!("invalid request: {}", e)))
}

/// Encode a reply as UTF-8 JSON.
pub fn encode<R: Serialize>(reply: &R) -> Result<Vec<u8>, WorkerError> {
    serde_json::to_vec(reply).map_err(|e| WorkerError::Processing(format!("failed to encode reply: {}", e)))
}

/// JSON handler around a tool adapter.
pub struct JsonHandler<T> {
    tool: T,
}

impl<T: ToolAdapter> JsonHandler<T> {
    pub fn new(tool: T) -> Self {
        Self { tool }
    }
}

impl<T: ToolAdapter> JobHandler for JsonHandler<T> {
    fn tool_name(&self) -> &'static str {
        self.tool.name()
    }

    fn handle(&self, body: &[u8]) -> Result<Vec<u8>, WorkerError> {
        let request: T::Request = decode(body)?;
        let reply = self.tool.apply(request)?;
        encode(&reply)
    }
}

/// Handler backed by a closure over raw bodies.
pub struct FnHandler<F> {
    name: &'static str,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, WorkerError> + Send + Sync + 'static,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, WorkerError> + Send + Sync + 'static,
{
    fn tool_name(&self) -> &'static str {
        self.name
    }

    fn handle(&self, body: &[u8]) -> Result<Vec<u8>, WorkerError> {
        (self.f)(body)
    }
}

/// Build the handler for the configured tool.
pub fn handler_for(config: &WorkerConfig) -> Arc<dyn JobHandler> {
    match config.tool {
        ToolKind::Ocr => Arc::new(JsonHandler::new(OcrTool::new(
            config.ocr_binary.clone(),
            config.ocr_language.clone(),
        ))),
        ToolKind::Brightness => Arc::new(JsonHandler::new(BrightnessTool::new())),
        ToolKind::Autocrop => Arc::new(JsonHandler::new(AutoCropTool::new())),
        ToolKind::Scale => Arc::new(JsonHandler::new(ScaleTool::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_tools::messages::{AutoCropRequest, MediaReply, ScaleRequest};
    use image_tools::ToolError;

    struct UpperTool;

    impl ToolAdapter for UpperTool {
        type Request = AutoCropRequest;
        type Reply = MediaReply;

        fn name(&self) -> &'static str {
            "upper"
        }

        fn apply(&self, request: AutoCropRequest) -> Result<MediaReply, ToolError> {
            if request.image.is_empty() {
                return Err(ToolError::InvalidInput("empty image".to_string()));
            }
            Ok(MediaReply::new("text/plain", request.image.to_uppercase()))
        }
    }

    #[test]
    fn test_json_handler_success() {
        let handler = JsonHandler::new(UpperTool);
        let reply = handler.handle(br#"{"image":"abc"}"#).unwrap();
        let reply: MediaReply = decode(&reply).unwrap();
        assert_eq!(reply, MediaReply::new("text/plain", "ABC"));
        assert_eq!(handler.tool_name(), "upper");
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        let handler = JsonHandler::new(UpperTool);
        assert!(matches!(handler.handle(b"{not json"), Err(WorkerError::Decode(_))));
        assert!(matches!(handler.handle(&[0xff, 0xfe, 0x00]), Err(WorkerError::Decode(_))));
        assert!(matches!(handler.handle(br#"{"other":1}"#), Err(WorkerError::Decode(_))));
    }

    #[test]
    fn test_tool_failure_is_processing_error() {
        let handler = JsonHandler::new(UpperTool);
        assert!(matches!(
            handler.handle(br#"{"image":""}"#),
            Err(WorkerError::Processing(_))
        ));
    }

    #[test]
    fn test_decode_encode() {
        let request = ScaleRequest {
            image: "QUJD".to_string(),
            mimetype: "image/png".to_string(),
            factor: 0.5,
        };
        let decoded: ScaleRequest = decode(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_handler_for_each_tool() {
        for kind in ToolKind::ALL {
            let config = WorkerConfig::defaults(kind);
            assert_eq!(handler_for(&config).tool_name(), kind.as_str());
        }
    }

    #[test]
    fn test_fn_handler() {
        let handler = FnHandler::new("echo", |body: &[u8]| Ok(body.to_vec()));
        assert_eq!(handler.handle(b"x").unwrap(), b"x".to_vec());
        assert_eq!(handler.tool_name(), "echo");
    }
}
