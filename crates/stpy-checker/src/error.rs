//! Checker errors

use stpy_parser::Span;
use stpy_types::TypeError;
use thiserror::Error;

/// An error found while analysing a module.
///
/// The first error aborts the pass that found it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CheckError {
    /// Invalid use of `global`, `nonlocal`, `:=` and friends
    #[error("{message}")]
    Scope {
        /// Error message
        message: String,
        /// Location
        span: Span,
    },

    /// Invalid declaration found while collecting or finishing a module
    #[error("{message}")]
    Declaration {
        /// Error message
        message: String,
        /// Location
        span: Span,
        /// Module the declaration belongs to
        module: String,
    },

    /// Ill-typed code
    #[error("{message}")]
    Type {
        /// Error message
        message: String,
        /// Location
        span: Span,
    },

    /// Invalid `from __future__` import
    #[error("{message}")]
    Future {
        /// Error message
        message: String,
        /// Location
        span: Span,
    },

    /// A pass was driven out of order; never caused by user code
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl CheckError {
    /// Scope error at a location.
    pub fn scope(message: impl Into<String>, span: Span) -> Self {
        CheckError::Scope {
            message: message.into(),
            span,
        }
    }

    /// Declaration error in `module`.
    pub fn declaration(message: impl Into<String>, span: Span, module: impl Into<String>) -> Self {
        CheckError::Declaration {
            message: message.into(),
            span,
            module: module.into(),
        }
    }

    /// Type error at a location.
    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        CheckError::Type {
            message: message.into(),
            span,
        }
    }

    /// Future-statement error at a location.
    pub fn future(message: impl Into<String>, span: Span) -> Self {
        CheckError::Future {
            message: message.into(),
            span,
        }
    }

    /// Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        CheckError::Internal {
            message: message.into(),
        }
    }

    /// Message without location.
    pub fn message(&self) -> &str {
        match self {
            CheckError::Scope { message, .. }
            | CheckError::Declaration { message, .. }
            | CheckError::Type { message, .. }
            | CheckError::Future { message, .. }
            | CheckError::Internal { message } => message,
        }
    }

    /// Location, if the error has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            CheckError::Scope { span, .. }
            | CheckError::Declaration { span, .. }
            | CheckError::Type { span, .. }
            | CheckError::Future { span, .. } => Some(*span),
            CheckError::Internal { .. } => None,
        }
    }

    /// Module named by a declaration error.
    pub fn module(&self) -> Option<&str> {
        match self {
            CheckError::Declaration { module, .. } => Some(module),
            _ => None,
        }
    }

    /// Short category name.
    pub fn category(&self) -> &'static str {
        match self {
            CheckError::Scope { .. } => "scope",
            CheckError::Declaration { .. } => "declaration",
            CheckError::Type { .. } => "type",
            CheckError::Future { .. } => "future",
            CheckError::Internal { .. } => "internal",
        }
    }

    /// Whether the error points at a compiler bug rather than user code.
    pub fn is_internal(&self) -> bool {
        matches!(self, CheckError::Internal { .. })
    }

    /// Attach a location to an error from the type universe.
    ///
    /// Reads of unresolved type references are pass-ordering bugs and become
    /// internal errors; everything else is a type error at `span`.
    pub fn from_type_error(err: TypeError, span: Span) -> Self {
        match err {
            TypeError::UnresolvedTypeRef { .. } => CheckError::internal(err.to_string()),
            other => CheckError::type_error(other.to_string(), span),
        }
    }
}

/// Result type for checker passes
pub type CheckResult<T> = Result<T, CheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let span = Span::new(3, 5, 1, 4);
        let err = CheckError::declaration("Class `C` has an invalid base", span, "m");
        assert_eq!(err.message(), "Class `C` has an invalid base");
        assert_eq!(err.span(), Some(span));
        assert_eq!(err.module(), Some("m"));
        assert_eq!(err.category(), "declaration");

        let err = CheckError::internal("out of order");
        assert_eq!(err.to_string(), "internal error: out of order");
        assert!(err.span().is_none());
    }

    #[test]
    fn test_from_type_error() {
        let span = Span::default();
        let err = CheckError::from_type_error(
            TypeError::UnresolvedTypeRef {
                what: "C".to_string(),
            },
            span,
        );
        assert!(err.is_internal());
        let err = CheckError::from_type_error(
            TypeError::InvalidUnion {
                ty: "int64".to_string(),
            },
            span,
        );
        assert_eq!(err.category(), "type");
    }
}
