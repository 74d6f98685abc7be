//! Error types for conflict compilation.

use excl_proto::span::offset_to_line_col;
use excl_proto::Span;
use thiserror::Error;

/// Error during conflict compilation.
#[derive(Debug, Error)]
pub struct CompileError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Error kind for programmatic handling.
    pub kind: CompileErrorKind,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Broad class of a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The query is wrong.
    Query,
    /// The query is valid but uses something that is not supported.
    UnsupportedFeature,
    /// A compiler invariant was broken.
    Internal,
}

/// Kinds of compilation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Conflict target is not a pointer or tuple of pointers.
    InvalidConflictTarget,
    /// Conflict target points at a pointer of some other set.
    ForeignPointer,
    /// Conflict target pointer is not single.
    MultiPointer,
    /// Conflict target matches zero or several constraints.
    AmbiguousConstraint,
    /// A conflict check found no pointers to compare.
    MissingShape,
    /// Unknown pointer on an object type.
    UnknownPointer,
    /// Unknown object type.
    UnknownType,
    /// Insert into an abstract type or alias.
    InvalidInsertTarget,
    /// Reference to the set being mutated.
    SelfReference,
    /// Expression form the compiler does not accept here.
    InvalidExpr,
    /// Volatile value read by a conflict check.
    VolatileAnchor,
    /// `ELSE` on a constraint inherited from an ancestor.
    ElseOnInheritedConstraint,
    /// Compiler invariant broken.
    Internal,
    /// Schema lookup failed.
    Schema,
}

impl CompileErrorKind {
    /// The category of this kind.
    pub fn category(self) -> ErrorCategory {
        match self {
            CompileErrorKind::VolatileAnchor | CompileErrorKind::ElseOnInheritedConstraint => {
                ErrorCategory::UnsupportedFeature
            }
            CompileErrorKind::Internal | CompileErrorKind::Schema => ErrorCategory::Internal,
            _ => ErrorCategory::Query,
        }
    }
}

impl CompileError {
    /// Create a new compile error.
    pub fn new(message: impl Into<String>, span: Span, kind: CompileErrorKind) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message, Span::default(), CompileErrorKind::Internal)
    }

    /// Create an unknown pointer error.
    pub fn unknown_pointer(type_name: &str, pointer: &str, span: Span) -> Self {
        Self::new(
            format!(
                "object type '{}' has no link or property '{}'",
                type_name, pointer
            ),
            span,
            CompileErrorKind::UnknownPointer,
        )
    }

    /// Create an unknown type error.
    pub fn unknown_type(type_name: &str, span: Span) -> Self {
        Self::new(
            format!("object type '{}' does not exist", type_name),
            span,
            CompileErrorKind::UnknownType,
        )
    }

    /// The category of this error.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Attach a span if the error does not carry one yet.
    pub fn or_span(mut self, span: Span) -> Self {
        if self.span == Span::default() {
            self.span = span;
        }
        self
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut result = format!("error[{:?}]: {}\n", self.kind, self.message);
        result.push_str(&format!("  --> line {}:{}\n", line, col));

        if let Some(source_line) = source.lines().nth(line - 1) {
            result.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));

            for _ in 0..col {
                result.push(' ');
            }
            result.push('^');

            let span_len = self.span.len();
            if span_len > 1 {
                let room = (source_line.len() + 1).saturating_sub(col);
                for _ in 1..span_len.min(room) {
                    result.push('~');
                }
            }
            result.push('\n');
        }

        if let Some(hint) = &self.hint {
            result.push_str(&format!("   = hint: {}\n", hint));
        }

        result
    }
}

impl From<excl_core::Error> for CompileError {
    fn from(err: excl_core::Error) -> Self {
        Self::new(err.to_string(), Span::default(), CompileErrorKind::Schema)
    }
}

/// A combined error type for the public API.
#[derive(Debug, Error)]
pub enum LangError {
    /// Compile error.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    /// Schema error.
    #[error("schema error: {0}")]
    Schema(#[from] excl_core::Error),
    /// Configuration could not be decoded.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl LangError {
    /// Format the error with source context where available.
    pub fn format_with_source(&self, source: &str) -> String {
        match self {
            LangError::Compile(e) => e.format_with_source(source),
            other => format!("error: {}\n", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            CompileErrorKind::AmbiguousConstraint.category(),
            ErrorCategory::Query
        );
        assert_eq!(
            CompileErrorKind::VolatileAnchor.category(),
            ErrorCategory::UnsupportedFeature
        );
        assert_eq!(
            CompileError::internal("missing subject expression").category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_format_with_source() {
        let source = "insert T { name := 'a' } unless conflict on .nick";
        let err = CompileError::unknown_pointer("default::T", "nick", Span::new(44, 49))
            .with_hint("declare the property or pick another target");
        let formatted = err.format_with_source(source);

        assert!(formatted.starts_with("error[UnknownPointer]: object type 'default::T'"));
        assert!(formatted.contains("--> line 1:45"));
        assert!(formatted.contains("^~~~~"));
        assert!(formatted.contains("= hint: declare the property"));
    }

    #[test]
    fn test_or_span_keeps_existing() {
        let err = CompileError::internal("x").or_span(Span::new(3, 4));
        assert_eq!(err.span, Span::new(3, 4));

        let err = CompileError::new("y", Span::new(1, 2), CompileErrorKind::InvalidExpr)
            .or_span(Span::new(3, 4));
        assert_eq!(err.span, Span::new(1, 2));
    }
}
