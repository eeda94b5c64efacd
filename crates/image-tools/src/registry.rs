//! Tool adapter capability and the set of known tools.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::ToolError;

/// A synchronous image tool.
///
/// Adapters may be slow (CPU- or process-bound) and are always invoked from a
/// blocking worker thread, never from the broker connection task.
pub trait ToolAdapter: Send + Sync + 'static {
    /// Decoded request payload.
    type Request: Serialize + DeserializeOwned + Send;

    /// Reply payload produced on success.
    type Reply: Serialize + DeserializeOwned + Send;

    /// Tool name used in logs.
    fn name(&self) -> &'static str;

    /// Apply the tool to a single request.
    fn apply(&self, request: Self::Request) -> Result<Self::Reply, ToolError>;
}

/// Kinds of tool a worker process can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Ocr,
    Brightness,
    Autocrop,
    Scale,
}

impl ToolKind {
    /// All known tool kinds.
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Ocr,
        ToolKind::Brightness,
        ToolKind::Autocrop,
        ToolKind::Scale,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Ocr => "ocr",
            ToolKind::Brightness => "brightness",
            ToolKind::Autocrop => "autocrop",
            ToolKind::Scale => "scale",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ToolKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                ToolError::InvalidInput(format!(
                    "unknown tool '{}', expected one of: ocr, brightness, autocrop, scale",
                    s
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    impl ToolAdapter for EchoTool {
        type Request = String;
        type Reply = String;

        fn name(&self) -> &'static str {
            "echo"
        }

        fn apply(&self, request: String) -> Result<String, ToolError> {
            if request.is_empty() {
                return Err(ToolError::InvalidInput("empty".to_string()));
            }
            Ok(request)
        }
    }

    #[test]
    fn test_tool_kind_parse() {
        assert_eq!("ocr".parse::<ToolKind>().unwrap(), ToolKind::Ocr);
        assert_eq!(" Scale ".parse::<ToolKind>().unwrap(), ToolKind::Scale);
        assert_eq!("AUTOCROP".parse::<ToolKind>().unwrap(), ToolKind::Autocrop);
        assert!("blur".parse::<ToolKind>().is_err());
    }

    #[test]
    fn test_tool_kind_display_round_trips() {
        for kind in ToolKind::ALL {
            assert_eq!(kind.to_string().parse::<ToolKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_adapter_contract() {
        let tool = EchoTool;
        assert_eq!(tool.name(), "echo");
        assert_eq!(tool.apply("hi".to_string()).unwrap(), "hi");
        assert!(matches!(tool.apply(String::new()), Err(ToolError::InvalidInput(_))));
    }
}
