//! Structured errors returned by every inspection operation
//!
//! Each error carries a stable `E_*` code, a message and an actionable hint.
//! Size and capability errors also carry a machine-readable [`Suggestion`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::common::Error;

/// Result type for inspection operations
pub type InspectResult<T> = std::result::Result<T, InspectError>;

/// Stable error codes, serialized as `E_*` strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_NO_SESSION")]
    NoSession,
    #[serde(rename = "E_NOT_PAUSED")]
    NotPaused,
    #[serde(rename = "E_INVALID_PARAMS")]
    InvalidParams,
    #[serde(rename = "E_MISSING_REQUIRED_PARAM")]
    MissingRequiredParam,
    #[serde(rename = "E_LARGE_DATA")]
    LargeData,
    #[serde(rename = "E_MEMORY_BUDGET_EXCEEDED")]
    MemoryBudgetExceeded,
    #[serde(rename = "E_UNSUPPORTED_LANGUAGE")]
    UnsupportedLanguage,
    #[serde(rename = "E_NO_THREADS")]
    NoThreads,
    #[serde(rename = "E_NO_STACK")]
    NoStack,
    #[serde(rename = "E_NO_FRAMES")]
    NoFrames,
    #[serde(rename = "E_INVALID_REFERENCE")]
    InvalidReference,
    #[serde(rename = "E_STALE_REFERENCE")]
    StaleReference,
    #[serde(rename = "E_MODIFICATION_FAILED")]
    ModificationFailed,
    #[serde(rename = "E_READ_ONLY")]
    ReadOnly,
    #[serde(rename = "E_UNSUPPORTED_OPERATION")]
    UnsupportedOperation,
    #[serde(rename = "E_EVALUATE_FAILED")]
    EvaluateFailed,
    #[serde(rename = "E_NOT_EXPANDABLE")]
    NotExpandable,
    #[serde(rename = "E_BUSY")]
    Busy,
    #[serde(rename = "E_UNSUPPORTED_CAPABILITY")]
    UnsupportedCapability,
    #[serde(rename = "E_SESSION_TERMINATED")]
    SessionTerminated,
    #[serde(rename = "E_UNKNOWN")]
    Unknown,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "E_NO_SESSION",
            Self::NotPaused => "E_NOT_PAUSED",
            Self::InvalidParams => "E_INVALID_PARAMS",
            Self::MissingRequiredParam => "E_MISSING_REQUIRED_PARAM",
            Self::LargeData => "E_LARGE_DATA",
            Self::MemoryBudgetExceeded => "E_MEMORY_BUDGET_EXCEEDED",
            Self::UnsupportedLanguage => "E_UNSUPPORTED_LANGUAGE",
            Self::NoThreads => "E_NO_THREADS",
            Self::NoStack => "E_NO_STACK",
            Self::NoFrames => "E_NO_FRAMES",
            Self::InvalidReference => "E_INVALID_REFERENCE",
            Self::StaleReference => "E_STALE_REFERENCE",
            Self::ModificationFailed => "E_MODIFICATION_FAILED",
            Self::ReadOnly => "E_READ_ONLY",
            Self::UnsupportedOperation => "E_UNSUPPORTED_OPERATION",
            Self::EvaluateFailed => "E_EVALUATE_FAILED",
            Self::NotExpandable => "E_NOT_EXPANDABLE",
            Self::Busy => "E_BUSY",
            Self::UnsupportedCapability => "E_UNSUPPORTED_CAPABILITY",
            Self::SessionTerminated => "E_SESSION_TERMINATED",
            Self::Unknown => "E_UNKNOWN",
            Self::Internal => "E_INTERNAL",
        }
    }

    /// Default message and hint for this code
    fn template(&self) -> (&'static str, &'static str) {
        match self {
            Self::NoSession => (
                "No active debug session",
                "Start a debug session before inspecting variables",
            ),
            Self::NotPaused => (
                "Debugger is not paused",
                "Wait for the debuggee to stop at a breakpoint, or pause it, then retry",
            ),
            Self::InvalidParams => (
                "Invalid parameters provided",
                "Check the parameter requirements for this operation",
            ),
            Self::MissingRequiredParam => (
                "Required parameter is missing",
                "Provide every required parameter and retry",
            ),
            Self::LargeData => (
                "Variable data exceeds the size threshold",
                "Stream the variables to a file instead of returning them inline",
            ),
            Self::MemoryBudgetExceeded => (
                "Memory budget exceeded during variable traversal",
                "Reduce the depth or stream the variables to a file",
            ),
            Self::UnsupportedLanguage => (
                "Debug adapter language is not supported",
                "Use one of the supported session types",
            ),
            Self::NoThreads => (
                "No threads available in the debug session",
                "Ensure the debuggee is paused and has live threads",
            ),
            Self::NoStack => (
                "No stack frames available",
                "Pause at a breakpoint to access stack frames",
            ),
            Self::NoFrames => (
                "No stack frames found for the current thread",
                "Ensure the debuggee is paused with an active call stack",
            ),
            Self::InvalidReference => (
                "Invalid variables reference",
                "List variables again to obtain valid references for expandable items",
            ),
            Self::StaleReference => (
                "Variable reference is no longer valid (execution has moved on)",
                "References are only valid while paused. Pause again and fetch fresh references",
            ),
            Self::ModificationFailed => (
                "Failed to modify variable value",
                "Check that the variable is writable and the value has a compatible type",
            ),
            Self::ReadOnly => (
                "Cannot modify this variable (read-only, const, or frozen)",
                "Modify a different variable or a writable scope",
            ),
            Self::UnsupportedOperation => (
                "Operation not supported by the debug adapter",
                "Some adapters have limited modification support",
            ),
            Self::EvaluateFailed => (
                "Failed to evaluate expression in debug context",
                "Check the expression syntax for the current language",
            ),
            Self::NotExpandable => (
                "Value cannot be expanded",
                "The value is a primitive or cannot be inspected safely",
            ),
            Self::Busy => (
                "Operation is currently locked by another concurrent request",
                "Retry once the current operation completes",
            ),
            Self::UnsupportedCapability => (
                "This operation is not supported by the current debug adapter",
                "Try the alternative described in the suggestion",
            ),
            Self::SessionTerminated => (
                "Debug session has been terminated",
                "Start a new debug session to continue",
            ),
            Self::Unknown => ("An unknown error occurred", "Check the logs for details"),
            Self::Internal => (
                "Internal inspection error",
                "This is likely a bug. Check the logs for details",
            ),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller can do instead of an unsupported operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackKind {
    UseEvaluate,
    ManualIteration,
    NotAvailable,
}

/// Machine-readable follow-up attached to size and capability errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Suggestion {
    #[serde(rename_all = "camelCase")]
    StreamToFile {
        command: String,
        reason: String,
        recommended_page_size: usize,
        expected_size_mb: f64,
        params: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    Fallback { kind: FallbackKind, hint: String },
}

/// Page size recommended when switching to streaming
pub const RECOMMENDED_PAGE_SIZE: usize = 500;

impl Suggestion {
    pub fn stream_to_file(byte_count: usize) -> Self {
        let mb = byte_count as f64 / (1024.0 * 1024.0);
        Self::StreamToFile {
            command: "stream-variables".to_string(),
            reason: "budget-exceeded".to_string(),
            recommended_page_size: RECOMMENDED_PAGE_SIZE,
            expected_size_mb: (mb * 100.0).round() / 100.0,
            params: json!({ "format": "jsonl" }),
        }
    }

    /// Fallback for an operation the adapter can't perform
    pub fn fallback_for(operation: &str) -> Self {
        match operation {
            "setVariable" => Self::Fallback {
                kind: FallbackKind::UseEvaluate,
                hint: "Use an evaluate call with an assignment expression instead".to_string(),
            },
            "variablePaging" => Self::Fallback {
                kind: FallbackKind::ManualIteration,
                hint: "Fetch all children and slice them on the caller side".to_string(),
            },
            _ => Self::Fallback {
                kind: FallbackKind::NotAvailable,
                hint: format!("No fallback available for {operation}"),
            },
        }
    }
}

/// Structured inspection error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct InspectError {
    pub code: ErrorCode,
    pub message: String,
    pub hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
}

impl InspectError {
    /// Error with the default message and hint for `code`
    pub fn new(code: ErrorCode) -> Self {
        let (message, hint) = code.template();
        Self {
            code,
            message: message.to_string(),
            hint: hint.to_string(),
            detail: None,
            suggestion: None,
        }
    }

    /// Error with a custom message and the default hint for `code`
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::new(code)
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn suggest(mut self, suggestion: Suggestion) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidParams, message)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal).detail(detail)
    }

    pub fn busy(key: &str) -> Self {
        Self::with_message(
            ErrorCode::Busy,
            format!("Operation '{key}' is currently locked by another request"),
        )
    }

    pub fn busy_timeout(key: &str, timeout_ms: u64) -> Self {
        Self::with_message(
            ErrorCode::Busy,
            format!("Operation '{key}' exceeded timeout of {timeout_ms}ms"),
        )
        .hint("Reduce the amount of data requested or raise the timeout")
    }

    pub fn session_terminated(session_id: &str) -> Self {
        Self::new(ErrorCode::SessionTerminated).detail(format!("session {session_id}"))
    }

    pub fn unsupported_language(session_type: &str, supported: &[String]) -> Self {
        Self::with_message(
            ErrorCode::UnsupportedLanguage,
            format!("Debug adapter '{session_type}' is not currently supported"),
        )
        .detail(format!("Supported types: {}", supported.join(", ")))
    }

    /// Size error carrying a switch-to-streaming suggestion
    pub fn large_data(node_count: usize, byte_count: usize) -> Self {
        let mb = byte_count as f64 / (1024.0 * 1024.0);
        let size = if mb >= 1.0 {
            format!("~{mb:.2}MB")
        } else {
            format!("{}KB", (byte_count as f64 / 1024.0).round() as u64)
        };
        Self::with_message(
            ErrorCode::LargeData,
            format!("Variable data is too large: {node_count} nodes, {size}"),
        )
        .hint("Stream the variables to a file with an output path instead")
        .suggest(Suggestion::stream_to_file(byte_count))
    }

    pub fn unsupported_capability(operation: &str) -> Self {
        Self::with_message(
            ErrorCode::UnsupportedCapability,
            format!("The debug adapter does not support {operation}"),
        )
        .suggest(Suggestion::fallback_for(operation))
    }

    /// Session-state errors: the call came outside a valid pause window
    pub fn is_session_state_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::NoSession
                | ErrorCode::NotPaused
                | ErrorCode::NoThreads
                | ErrorCode::NoStack
                | ErrorCode::NoFrames
        )
    }

    pub fn is_reference_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::InvalidReference | ErrorCode::StaleReference
        )
    }
}

fn looks_not_paused(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["not paused", "not stopped", "is running", "not suspended"]
        .iter()
        .any(|needle| lower.contains(needle))
}

impl From<&Error> for InspectError {
    fn from(e: &Error) -> Self {
        match e {
            Error::Inspection(inner) => inner.clone(),
            Error::SessionTerminated(_) | Error::AdapterCrashed => {
                Self::new(ErrorCode::SessionTerminated).detail(e.to_string())
            }
            Error::ThreadNotFound(_) => Self::new(ErrorCode::NoThreads).detail(e.to_string()),
            Error::FrameNotFound(_) => Self::new(ErrorCode::NoFrames).detail(e.to_string()),
            Error::Timeout(secs) => Self::busy_timeout("request", secs * 1000),
            Error::Cancelled => Self::new(ErrorCode::SessionTerminated).detail(e.to_string()),
            Error::DapRequestFailed { command, message } => {
                if looks_not_paused(message) {
                    Self::new(ErrorCode::NotPaused).detail(message.clone())
                } else if command == "evaluate" {
                    Self::new(ErrorCode::EvaluateFailed).detail(message.clone())
                } else {
                    Self::with_message(
                        ErrorCode::Unknown,
                        format!("Adapter rejected '{command}'"),
                    )
                    .detail(message.clone())
                }
            }
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<Error> for InspectError {
    fn from(e: Error) -> Self {
        Self::from(&e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_serializes_as_e_string() {
        let err = InspectError::new(ErrorCode::StaleReference);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "E_STALE_REFERENCE");
        assert!(value.get("suggestion").is_none());
        assert_eq!(err.to_string(), format!("[E_STALE_REFERENCE] {}", err.message));
    }

    #[test]
    fn test_large_data_carries_streaming_suggestion() {
        let err = InspectError::large_data(25_000, 6 * 1024 * 1024);
        assert_eq!(err.code, ErrorCode::LargeData);
        assert!(err.message.contains("25000 nodes"));
        assert!(err.message.contains("~6.00MB"));

        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["suggestion"]["mode"], "stream-to-file");
        assert_eq!(value["suggestion"]["recommendedPageSize"], 500);
        assert_eq!(value["suggestion"]["expectedSizeMb"], 6.0);
        assert_eq!(value["suggestion"]["params"]["format"], "jsonl");
    }

    #[test]
    fn test_capability_error_suggests_fallback() {
        let err = InspectError::unsupported_capability("setVariable");
        match err.suggestion {
            Some(Suggestion::Fallback { kind, .. }) => assert_eq!(kind, FallbackKind::UseEvaluate),
            other => panic!("unexpected suggestion: {other:?}"),
        }
        let paging = InspectError::unsupported_capability("variablePaging");
        assert!(matches!(
            paging.suggestion,
            Some(Suggestion::Fallback { kind: FallbackKind::ManualIteration, .. })
        ));
    }

    #[test]
    fn test_transport_errors_map_into_taxonomy() {
        assert_eq!(InspectError::from(Error::AdapterCrashed).code, ErrorCode::SessionTerminated);
        assert_eq!(InspectError::from(Error::Timeout(30)).code, ErrorCode::Busy);
        assert_eq!(
            InspectError::from(Error::dap_request_failed("scopes", "Thread is not paused")).code,
            ErrorCode::NotPaused
        );
        assert_eq!(
            InspectError::from(Error::dap_request_failed("evaluate", "ReferenceError: y")).code,
            ErrorCode::EvaluateFailed
        );
        assert_eq!(
            InspectError::from(Error::DapProtocol("garbage".into())).code,
            ErrorCode::Internal
        );
    }

    #[test]
    fn test_error_classifiers() {
        assert!(InspectError::new(ErrorCode::NoFrames).is_session_state_error());
        assert!(!InspectError::new(ErrorCode::Busy).is_session_state_error());
        assert!(InspectError::new(ErrorCode::StaleReference).is_reference_error());
    }

    #[test]
    fn test_unsupported_language_lists_types() {
        let err = InspectError::unsupported_language(
            "lldb",
            &["pwa-node".to_string(), "debugpy".to_string()],
        );
        assert!(err.message.contains("'lldb'"));
        assert_eq!(err.detail.as_deref(), Some("Supported types: pwa-node, debugpy"));
    }
}
