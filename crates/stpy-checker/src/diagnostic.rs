//! Diagnostic infrastructure for error reporting
//!
//! Turns checker errors into `codespan-reporting` diagnostics with source
//! context, stable error codes and a JSON form for editor integration.

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label, LabelStyle, Severity};
use codespan_reporting::files::{Files, SimpleFiles};
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stpy_parser::Span;

use crate::error::CheckError;

/// Error code for a diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode(pub &'static str);

impl ErrorCode {
    /// The code text, e.g. `E3001`.
    pub fn as_str(&self) -> &str {
        self.0
    }
}

/// A diagnostic message with source code context
pub struct Diagnostic {
    /// The underlying codespan diagnostic
    inner: CsDiagnostic<usize>,
    /// Error code (e.g., "E3001")
    code: Option<ErrorCode>,
}

impl Diagnostic {
    /// Create a new diagnostic
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            inner: CsDiagnostic::new(severity).with_message(message),
            code: None,
        }
    }

    /// Create an error diagnostic
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Create a warning diagnostic
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Create a note diagnostic
    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Severity::Note, message)
    }

    /// Set the error code
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.inner = self.inner.with_code(code.0);
        self.code = Some(code);
        self
    }

    /// Add a primary label (main error location)
    pub fn with_primary_label(mut self, file_id: usize, span: Span, message: impl Into<String>) -> Self {
        let label = Label::primary(file_id, span.start..span.end).with_message(message);
        self.inner.labels.insert(0, label);
        self
    }

    /// Add a secondary label (related location)
    pub fn with_secondary_label(mut self, file_id: usize, span: Span, message: impl Into<String>) -> Self {
        let label = Label::secondary(file_id, span.start..span.end).with_message(message);
        self.inner.labels.push(label);
        self
    }

    /// Add a note (additional context)
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.inner.notes.push(note.into());
        self
    }

    /// Add a help suggestion
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.inner.notes.push(format!("help: {}", help.into()));
        self
    }

    /// Create diagnostic from a CheckError
    pub fn from_check_error(error: &CheckError, file_id: usize) -> Self {
        let code = error_code(error);
        let mut diag = match error {
            CheckError::Internal { message } => {
                return Diagnostic::new(Severity::Bug, format!("internal error: {}", message))
                    .with_code(code);
            }
            CheckError::Scope { message, span } => Diagnostic::error(message.clone())
                .with_code(code)
                .with_primary_label(file_id, *span, "invalid scoping"),
            CheckError::Declaration {
                message,
                span,
                module,
            } => Diagnostic::error(message.clone())
                .with_code(code)
                .with_primary_label(file_id, *span, "invalid declaration")
                .with_note(format!("while declaring module `{}`", module)),
            CheckError::Type { message, span } => Diagnostic::error(message.clone())
                .with_code(code)
                .with_primary_label(file_id, *span, "type error"),
            CheckError::Future { message, span } => Diagnostic::error(message.clone())
                .with_code(code)
                .with_primary_label(file_id, *span, "invalid future import"),
        };

        let message = error.message();
        if message.contains("Final") {
            diag = diag.with_note("names and attributes declared `Final` are bound exactly once");
        } else if message.starts_with("type mismatch") {
            diag = diag.with_help("use `cast(T, value)` when the value is known to have the declared type");
        } else if message.contains("primitives in global or closure scope") {
            diag = diag.with_help("box the value with `box(...)` before storing it outside a local");
        }
        diag
    }

    /// Emit the diagnostic to stderr with colors
    pub fn emit(&self, files: &SimpleFiles<String, String>) -> Result<(), codespan_reporting::files::Error> {
        let mut writer = StandardStream::stderr(ColorChoice::Auto);
        let config = codespan_reporting::term::Config::default();
        term::emit(&mut writer, &config, files, &self.inner)
    }

    /// Get the underlying codespan diagnostic (for testing/custom rendering)
    pub fn inner(&self) -> &CsDiagnostic<usize> {
        &self.inner
    }

    /// Error code, if one was set
    pub fn code(&self) -> Option<&ErrorCode> {
        self.code.as_ref()
    }

    /// Convert to JSON representation for IDE integration
    pub fn to_json(&self, files: &SimpleFiles<String, String>) -> Result<String, serde_json::Error> {
        let json_diag = JsonDiagnostic::from_diagnostic(self, files);
        serde_json::to_string_pretty(&json_diag)
    }
}

/// JSON representation of a diagnostic for IDE integration
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonDiagnostic {
    /// Error code (e.g., "E3001")
    pub code: Option<String>,
    /// Severity level
    pub severity: String,
    /// Main error message
    pub message: String,
    /// Source locations with labels
    pub labels: Vec<JsonLabel>,
    /// Additional notes and help
    pub notes: Vec<String>,
}

/// JSON representation of a diagnostic label
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLabel {
    /// File path
    pub file: String,
    /// Start line (1-indexed)
    pub start_line: usize,
    /// Start column (1-indexed)
    pub start_column: usize,
    /// End line (1-indexed)
    pub end_line: usize,
    /// End column (1-indexed)
    pub end_column: usize,
    /// Label message
    pub message: Option<String>,
    /// Label style (primary or secondary)
    pub style: String,
}

impl JsonDiagnostic {
    /// Convert a Diagnostic to JSON representation
    pub fn from_diagnostic(diag: &Diagnostic, files: &SimpleFiles<String, String>) -> Self {
        let severity = match diag.inner.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
            Severity::Help => "help",
            Severity::Bug => "bug",
        };

        let labels = diag
            .inner
            .labels
            .iter()
            .filter_map(|label| {
                let file = files.get(label.file_id).ok()?;
                let start = file.location((), label.range.start).ok()?;
                let end = file.location((), label.range.end).ok()?;
                Some(JsonLabel {
                    file: file.name().to_string(),
                    start_line: start.line_number,
                    start_column: start.column_number,
                    end_line: end.line_number,
                    end_column: end.column_number,
                    message: Some(label.message.clone()),
                    style: match label.style {
                        LabelStyle::Primary => "primary",
                        LabelStyle::Secondary => "secondary",
                    }
                    .to_string(),
                })
            })
            .collect();

        JsonDiagnostic {
            code: diag.code.as_ref().map(|c| c.0.to_string()),
            severity: severity.to_string(),
            message: diag.inner.message.clone(),
            labels,
            notes: diag.inner.notes.clone(),
        }
    }
}

/// Message prefixes with a dedicated code, per category.
const SCOPE_CODES: &[(&str, &str)] = &[
    ("nonlocal declaration not allowed", "E1001"),
    ("no binding for nonlocal", "E1002"),
    ("name '", "E1003"),
    ("annotated name", "E1004"),
    ("assignment expression", "E1005"),
    ("comprehension inner loop", "E1005"),
    ("'return' outside function", "E1006"),
];

const DECLARATION_CODES: &[(&str, &str)] = &[
    ("Cannot create a consistent method resolution order", "E2001"),
    ("Class", "E2002"),
    ("conflicting type definitions", "E2003"),
    ("slot conflicts", "E2004"),
    ("function conflicts", "E2004"),
    ("class cannot hide inherited member", "E2005"),
    ("Final attribute not initialized", "E2006"),
    ("Must assign a value when declaring a Final", "E2006"),
    ("Cannot assign to a Final attribute", "E2007"),
    ("@inline only supported", "E2008"),
];

const TYPE_CODES: &[(&str, &str)] = &[
    ("type mismatch", "E3001"),
    ("Cannot assign to a Final", "E3002"),
    ("Cannot redefine local variable", "E3003"),
    ("Mismatched number of args", "E3004"),
    ("Given argument", "E3005"),
    ("Function ", "E3006"),
    ("cannot use primitives in global or closure scope", "E3007"),
    ("constant ", "E3008"),
    ("reveal_type", "E3009"),
];

fn lookup(table: &[(&str, &'static str)], message: &str, fallback: &'static str) -> ErrorCode {
    table
        .iter()
        .find(|(prefix, _)| message.starts_with(prefix))
        .map(|(_, code)| ErrorCode(code))
        .unwrap_or(ErrorCode(fallback))
}

/// Get error code for a CheckError
pub fn error_code(error: &CheckError) -> ErrorCode {
    match error {
        CheckError::Scope { message, .. } => lookup(SCOPE_CODES, message, "E1000"),
        CheckError::Declaration { message, .. } => lookup(DECLARATION_CODES, message, "E2000"),
        CheckError::Type { message, .. } => lookup(TYPE_CODES, message, "E3000"),
        CheckError::Future { .. } => ErrorCode("E1100"),
        CheckError::Internal { .. } => ErrorCode("E9000"),
    }
}

/// Helper to create a SimpleFiles instance from source code
pub fn create_files(path: impl Into<PathBuf>, source: impl Into<String>) -> SimpleFiles<String, String> {
    let mut files = SimpleFiles::new();
    files.add(path.into().display().to_string(), source.into());
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_error_diagnostic() {
        let diag = Diagnostic::error("Test error message");
        assert_eq!(diag.inner.severity, Severity::Error);
    }

    #[test]
    fn test_diagnostic_with_code() {
        let diag = Diagnostic::error("Test error").with_code(ErrorCode("E3001"));
        assert_eq!(diag.code, Some(ErrorCode("E3001")));
    }

    #[test]
    fn test_error_codes_by_message() {
        let span = Span::new(0, 1, 1, 1);
        let err = CheckError::scope("nonlocal declaration not allowed at module level", span);
        assert_eq!(error_code(&err), ErrorCode("E1001"));
        let err = CheckError::type_error("type mismatch: str cannot be assigned to int", span);
        assert_eq!(error_code(&err), ErrorCode("E3001"));
        let err = CheckError::declaration(
            "Cannot create a consistent method resolution order (MRO) for bases: m.A, m.B",
            span,
            "m",
        );
        assert_eq!(error_code(&err), ErrorCode("E2001"));
        let err = CheckError::type_error("something new", span);
        assert_eq!(error_code(&err), ErrorCode("E3000"));
    }

    #[test]
    fn test_from_check_error_final() {
        let error = CheckError::type_error("Cannot assign to a Final variable: x", Span::new(0, 1, 1, 1));
        let diag = Diagnostic::from_check_error(&error, 0);
        assert_eq!(diag.code, Some(ErrorCode("E3002")));
        assert_eq!(diag.inner.notes.len(), 1);
    }

    #[test]
    fn test_internal_is_bug() {
        let diag = Diagnostic::from_check_error(&CheckError::internal("unresolved"), 0);
        assert_eq!(diag.inner.severity, Severity::Bug);
        assert!(diag.inner.labels.is_empty());
    }

    #[test]
    fn test_json_output() {
        let error = CheckError::type_error(
            "type mismatch: str cannot be assigned to int",
            Span::new(9, 13, 1, 10),
        );
        let diag = Diagnostic::from_check_error(&error, 0);
        let files = create_files("test.py", "x: int = 'hi'\n");

        let json = diag.to_json(&files).unwrap();
        assert!(json.contains("\"code\""));
        assert!(json.contains("\"E3001\""));
        assert!(json.contains("\"severity\""));
        assert!(json.contains("\"error\""));
        assert!(json.contains("\"start_line\""));
        assert!(json.contains("\"primary\""));
    }
}
