//! Evaluation errors.

use crate::span::Span;
use crate::value::ValueKind;
use thiserror::Error;

/// Error produced while evaluating a block body against a scope and schema.
///
/// Messages are rendered from [`crate::value::Value`] display impls, which
/// keep secrets redacted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("missing required attribute {name:?}")]
    MissingAttribute { name: String, span: Span },

    #[error("unknown attribute {name:?}")]
    UnknownAttribute { name: String, span: Span },

    #[error("attribute {name:?}: {source}")]
    Coerce {
        name: String,
        #[source]
        source: crate::value::CoerceError,
        span: Span,
    },

    #[error("missing required block {name:?}")]
    MissingBlock { name: String, span: Span },

    #[error("unknown block {name:?}")]
    UnknownBlock { name: String, span: Span },

    #[error("block {name:?} may only appear once")]
    DuplicateBlock { name: String, span: Span },

    #[error("{name:?} does not resolve to anything")]
    UnknownReference { name: String, span: Span },

    #[error("unknown function {name:?}")]
    UnknownFunction { name: String, span: Span },

    #[error("expected {expected}, got {actual}")]
    Type {
        expected: ValueKind,
        actual: &'static str,
        span: Span,
    },

    #[error("{message}")]
    Message { message: String, span: Span },
}

impl EvalError {
    /// The source span the error points at.
    pub fn span(&self) -> Span {
        match self {
            EvalError::MissingAttribute { span, .. }
            | EvalError::UnknownAttribute { span, .. }
            | EvalError::Coerce { span, .. }
            | EvalError::MissingBlock { span, .. }
            | EvalError::UnknownBlock { span, .. }
            | EvalError::DuplicateBlock { span, .. }
            | EvalError::UnknownReference { span, .. }
            | EvalError::UnknownFunction { span, .. }
            | EvalError::Type { span, .. }
            | EvalError::Message { span, .. } => *span,
        }
    }

    /// Whether this is a dangling-identifier error rather than a schema
    /// violation. The runtime treats the two differently: unknown
    /// references usually mean an upstream node failed or disappeared.
    pub fn is_unknown_reference(&self) -> bool {
        matches!(self, EvalError::UnknownReference { .. })
    }
}
