use docket_ast::Span;
use docket_parser::ParseError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that end a script run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The script threw, hit a type error, or was refused by the data layer
    #[error("runtime error: {message}")]
    Runtime { message: String, span: Option<Span> },

    #[error("script timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl EvalError {
    pub fn runtime(message: impl Into<String>) -> Self {
        EvalError::Runtime {
            message: message.into(),
            span: None,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            EvalError::Parse(err) => Some(err.span()),
            EvalError::Runtime { span, .. } => *span,
            EvalError::Timeout { .. } => None,
        }
    }

    /// Short category: `parse`, `runtime` or `timeout`
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Parse(_) => "parse",
            EvalError::Runtime { .. } => "runtime",
            EvalError::Timeout { .. } => "timeout",
        }
    }
}

/// Serializable error details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalErrorInfo {
    pub error_type: String,
    pub message: String,
    /// `line N` within the script, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Convert an error into its serializable form, resolving spans against `source`
pub fn format_error(err: &EvalError, source: &str) -> EvalErrorInfo {
    EvalErrorInfo {
        error_type: err.kind().to_string(),
        message: err.to_string(),
        location: err.span().map(|span| format!("line {}", line_of(source, span.start))),
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_runtime_error_with_location() {
        let source = "var a = 1;\nthrow 'boom';";
        let err = EvalError::Runtime {
            message: "uncaught exception: boom".into(),
            span: Some(Span::new(11, 24)),
        };
        let info = format_error(&err, source);
        assert_eq!(info.error_type, "runtime");
        assert_eq!(info.location.as_deref(), Some("line 2"));
        assert!(info.message.contains("boom"));
    }

    #[test]
    fn test_format_timeout_has_no_location() {
        let info = format_error(&EvalError::Timeout { ms: 50 }, "while (true) {}");
        assert_eq!(info.error_type, "timeout");
        assert_eq!(info.message, "script timed out after 50ms");
        assert!(info.location.is_none());
    }
}
