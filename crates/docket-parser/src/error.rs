use docket_ast::Span;
use thiserror::Error;

/// Errors produced while parsing a script
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expected {expected}, found {found}")]
    Unexpected {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("invalid token '{text}'")]
    InvalidToken { text: String, span: Span },

    #[error("invalid number literal '{text}'")]
    InvalidNumber { text: String, span: Span },

    #[error("invalid escape sequence in string literal")]
    InvalidEscape { span: Span },

    #[error("invalid assignment target")]
    InvalidAssignTarget { span: Span },

    #[error("script nested too deeply")]
    TooDeep { span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Unexpected { span, .. }
            | ParseError::InvalidToken { span, .. }
            | ParseError::InvalidNumber { span, .. }
            | ParseError::InvalidEscape { span }
            | ParseError::InvalidAssignTarget { span }
            | ParseError::TooDeep { span } => *span,
        }
    }
}
