//! Error records and the closed error-code taxonomy.

use std::fmt;

use serde::ser::{Serialize, Serializer};

use crate::value::Value;

/// Closed set of validation error codes.
///
/// Every code is wire-stable: external collaborators key message
/// translation off `code()`, so variants are never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Kind mismatch
    NotString,
    NotNumber,
    NotBoolean,
    NotDate,
    NotObject,
    NotArray,

    // Per-constraint
    StringTooShort,
    StringTooLong,
    StringPatternMismatch,
    StringInvalidFormat,
    NumberTooSmall,
    NumberTooBig,
    NumberNotInteger,
    NumberNotMultipleOf,
    ArrayTooShort,
    ArrayTooLong,
    ArrayNotUnique,
    TupleWrongLength,
    LiteralMismatch,
    EnumMismatch,

    // Structural
    ObjectMissingKey,
    ObjectUnknownKey,
    RecordInvalidKey,
    UnionNoMatch,

    // Pipeline
    RefinementFailed,
    TransformFailed,
}

impl ErrorKind {
    /// Returns the stable string code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotString => "NOT_STRING",
            ErrorKind::NotNumber => "NOT_NUMBER",
            ErrorKind::NotBoolean => "NOT_BOOLEAN",
            ErrorKind::NotDate => "NOT_DATE",
            ErrorKind::NotObject => "NOT_OBJECT",
            ErrorKind::NotArray => "NOT_ARRAY",
            ErrorKind::StringTooShort => "STRING_TOO_SHORT",
            ErrorKind::StringTooLong => "STRING_TOO_LONG",
            ErrorKind::StringPatternMismatch => "STRING_PATTERN_MISMATCH",
            ErrorKind::StringInvalidFormat => "STRING_INVALID_FORMAT",
            ErrorKind::NumberTooSmall => "NUMBER_TOO_SMALL",
            ErrorKind::NumberTooBig => "NUMBER_TOO_BIG",
            ErrorKind::NumberNotInteger => "NUMBER_NOT_INTEGER",
            ErrorKind::NumberNotMultipleOf => "NUMBER_NOT_MULTIPLE_OF",
            ErrorKind::ArrayTooShort => "ARRAY_TOO_SHORT",
            ErrorKind::ArrayTooLong => "ARRAY_TOO_LONG",
            ErrorKind::ArrayNotUnique => "ARRAY_NOT_UNIQUE",
            ErrorKind::TupleWrongLength => "TUPLE_WRONG_LENGTH",
            ErrorKind::LiteralMismatch => "LITERAL_MISMATCH",
            ErrorKind::EnumMismatch => "ENUM_MISMATCH",
            ErrorKind::ObjectMissingKey => "OBJECT_MISSING_KEY",
            ErrorKind::ObjectUnknownKey => "OBJECT_UNKNOWN_KEY",
            ErrorKind::RecordInvalidKey => "RECORD_INVALID_KEY",
            ErrorKind::UnionNoMatch => "UNION_NO_MATCH",
            ErrorKind::RefinementFailed => "REFINEMENT_FAILED",
            ErrorKind::TransformFailed => "TRANSFORM_FAILED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// A single path-qualified validation error.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ValidationError {
    /// Location within the input, root-to-leaf (`"a.b[2].c"`).
    /// Empty at the reporting node's own root; parents prepend segments.
    pub path: String,
    /// Error code.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Sample of the offending value, if useful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<Value>,
    /// Description of what was expected, if useful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

impl ValidationError {
    /// Create an error at the current node's root.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            kind,
            message: message.into(),
            received: None,
            expected: None,
        }
    }

    /// Create a kind-mismatch error for a value of the wrong shape.
    pub fn wrong_kind(kind: ErrorKind, expected: &'static str, received: &Value) -> Self {
        Self::new(kind, format!("expected {}, got {}", expected, received.kind()))
            .with_expected(expected)
            .with_received(received)
    }

    /// Attach a sample of the offending value.
    pub fn with_received(mut self, value: &Value) -> Self {
        self.received = Some(value.clone());
        self
    }

    /// Attach a description of the expected shape or constraint.
    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    /// Prefix the path with an object key segment.
    pub fn under_key(mut self, key: &str) -> Self {
        self.path = if self.path.is_empty() {
            key.to_string()
        } else if self.path.starts_with('[') {
            format!("{}{}", key, self.path)
        } else {
            format!("{}.{}", key, self.path)
        };
        self
    }

    /// Prefix the path with an array/tuple index segment.
    pub fn under_index(self, index: usize) -> Self {
        self.under_bracket(format!("[{}]", index))
    }

    /// Prefix the path with a record key segment (`[key: <k>]`).
    pub fn under_record_key(self, key: &str) -> Self {
        self.under_bracket(format!("[key: {}]", key))
    }

    fn under_bracket(mut self, segment: String) -> Self {
        self.path = if self.path.is_empty() {
            segment
        } else if self.path.starts_with('[') {
            format!("{}{}", segment, self.path)
        } else {
            format!("{}.{}", segment, self.path)
        };
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.kind.code(), self.message)
        } else {
            write!(f, "{} at '{}': {}", self.kind.code(), self.path, self.message)
        }
    }
}

/// Mutable error-collection context handed to `super_refine` refiners.
///
/// A refiner may attach zero, one, or several path-qualified issues;
/// any attached issue fails the node.
#[derive(Debug, Default)]
pub struct RefineCtx {
    issues: Vec<ValidationError>,
}

impl RefineCtx {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attach a `REFINEMENT_FAILED` issue at `path` (relative to the
    /// refined node; empty string for the node itself).
    pub fn add_issue(&mut self, path: impl Into<String>, message: impl Into<String>) {
        let mut err = ValidationError::new(ErrorKind::RefinementFailed, message);
        err.path = path.into();
        self.issues.push(err);
    }

    /// Attach a fully-formed error.
    pub fn add_error(&mut self, error: ValidationError) {
        self.issues.push(error);
    }

    pub(crate) fn into_issues(self) -> Vec<ValidationError> {
        self.issues
    }
}
