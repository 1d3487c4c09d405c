//! Error types for Parley operations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Stable, machine-readable error codes.
///
/// Callers match on these programmatically, so the string form returned by
/// [`ErrorCode::as_str`] must never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    // Syntax
    ParseError,
    UnexpectedEof,
    UnexpectedBlockClose,
    UnexpectedTagClose,
    InvalidConfig,

    // Tag structure
    UnknownTag,
    InvalidMessageRole,
    MessageTagInsideMessage,
    ContentTagInsideContent,
    ContentTagOutsideMessage,
    StepTagInsideMessage,
    StepTagInsideStep,
    StepTagInsideEach,
    ToolMessageWithoutId,
    UnsupportedContentType,

    // Evaluation
    VariableNotDeclared,
    PropertyNotExists,
    InvalidUpdate,
    InvalidAssignment,
    NotAFunction,
    FunctionCallError,
    UnsupportedOperator,
    MissingStepResponse,

    // References
    DidNotResolveReferences,
    ReferenceNotFound,
    CircularReference,
    InvalidReference,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: &'static [ErrorCode] = &[
        Self::ParseError,
        Self::UnexpectedEof,
        Self::UnexpectedBlockClose,
        Self::UnexpectedTagClose,
        Self::InvalidConfig,
        Self::UnknownTag,
        Self::InvalidMessageRole,
        Self::MessageTagInsideMessage,
        Self::ContentTagInsideContent,
        Self::ContentTagOutsideMessage,
        Self::StepTagInsideMessage,
        Self::StepTagInsideStep,
        Self::StepTagInsideEach,
        Self::ToolMessageWithoutId,
        Self::UnsupportedContentType,
        Self::VariableNotDeclared,
        Self::PropertyNotExists,
        Self::InvalidUpdate,
        Self::InvalidAssignment,
        Self::NotAFunction,
        Self::FunctionCallError,
        Self::UnsupportedOperator,
        Self::MissingStepResponse,
        Self::DidNotResolveReferences,
        Self::ReferenceNotFound,
        Self::CircularReference,
        Self::InvalidReference,
    ];

    /// The kebab-case wire form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "parse-error",
            Self::UnexpectedEof => "unexpected-eof",
            Self::UnexpectedBlockClose => "unexpected-block-close",
            Self::UnexpectedTagClose => "unexpected-tag-close",
            Self::InvalidConfig => "invalid-config",
            Self::UnknownTag => "unknown-tag",
            Self::InvalidMessageRole => "invalid-message-role",
            Self::MessageTagInsideMessage => "message-tag-inside-message",
            Self::ContentTagInsideContent => "content-tag-inside-content",
            Self::ContentTagOutsideMessage => "content-tag-outside-message",
            Self::StepTagInsideMessage => "step-tag-inside-message",
            Self::StepTagInsideStep => "step-tag-inside-step",
            Self::StepTagInsideEach => "step-tag-inside-each",
            Self::ToolMessageWithoutId => "tool-message-without-id",
            Self::UnsupportedContentType => "unsupported-content-type",
            Self::VariableNotDeclared => "variable-not-declared",
            Self::PropertyNotExists => "property-not-exists",
            Self::InvalidUpdate => "invalid-update",
            Self::InvalidAssignment => "invalid-assignment",
            Self::NotAFunction => "not-a-function",
            Self::FunctionCallError => "function-call-error",
            Self::UnsupportedOperator => "unsupported-operator",
            Self::MissingStepResponse => "missing-step-response",
            Self::DidNotResolveReferences => "did-not-resolve-references",
            Self::ReferenceNotFound => "reference-not-found",
            Self::CircularReference => "circular-reference",
            Self::InvalidReference => "invalid-reference",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an [`ErrorCode`] from its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCodeParseError(pub String);

impl fmt::Display for ErrorCodeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error code: {}", self.0)
    }
}

impl std::error::Error for ErrorCodeParseError {}

impl FromStr for ErrorCode {
    type Err = ErrorCodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| ErrorCodeParseError(s.to_string()))
    }
}

// ============================================================================
// COMPILE ERROR
// ============================================================================

/// The single structured error raised by parsing and compilation.
///
/// `start`/`end` are byte offsets into the source text; `line`/`column` are
/// 1-based and filled in by [`CompileError::locate`].
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} at line {line}, column {column} [{code}]")]
pub struct CompileError {
    pub code: ErrorCode,
    pub message: String,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl CompileError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }

    /// Attach a source span.
    pub fn at(mut self, start: usize, end: usize) -> Self {
        self.start = start;
        self.end = end.max(start);
        self
    }

    /// Compute line and column of `start` within `source`.
    pub fn locate(mut self, source: &str) -> Self {
        let start = self.start.min(source.len());
        let prefix = source.get(..start).unwrap_or(source);
        self.line = prefix.matches('\n').count() + 1;
        self.column = match prefix.rfind('\n') {
            Some(idx) => prefix[idx + 1..].chars().count() + 1,
            None => prefix.chars().count() + 1,
        };
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn unexpected_eof(expected: &str) -> Self {
        Self::new(
            ErrorCode::UnexpectedEof,
            format!("Unexpected end of input, expected {}", expected),
        )
    }

    pub fn unknown_tag(name: &str) -> Self {
        Self::new(ErrorCode::UnknownTag, format!("Unknown tag: '{}'", name))
    }

    pub fn invalid_message_role(role: &str) -> Self {
        Self::new(
            ErrorCode::InvalidMessageRole,
            format!("Invalid message role: '{}'", role),
        )
    }

    pub fn message_tag_inside_message() -> Self {
        Self::new(
            ErrorCode::MessageTagInsideMessage,
            "Message tags cannot be placed inside another message",
        )
    }

    pub fn variable_not_declared(name: &str) -> Self {
        Self::new(
            ErrorCode::VariableNotDeclared,
            format!("Variable '{}' is not declared", name),
        )
    }

    pub fn property_not_exists(property: &str) -> Self {
        Self::new(
            ErrorCode::PropertyNotExists,
            format!("Property '{}' does not exist on object", property),
        )
    }

    pub fn invalid_update(operator: &str, type_name: &str) -> Self {
        Self::new(
            ErrorCode::InvalidUpdate,
            format!(
                "Cannot use the update operator '{}' on a value of type '{}'",
                operator, type_name
            ),
        )
    }

    pub fn did_not_resolve_references() -> Self {
        Self::new(
            ErrorCode::DidNotResolveReferences,
            "Reference tags cannot be compiled, references were not resolved",
        )
    }
}

/// Result type alias for Parley operations.
pub type CompileResult<T> = Result<T, CompileError>;

// =============================================================================
// TESTS
// =============================================================================
