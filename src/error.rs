// 🚨 Error Taxonomy - validation, transformation and structural failures
// Every failure carries a machine-readable code plus a human-readable message

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// FIELD-SCOPED VALIDATION ERRORS
// ============================================================================

/// Machine-readable code for a field-scoped validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Constraint rules
    MinGtMax,
    NegativeLength,
    InvalidRegex,
    EmptyEnum,
    DuplicateEnumValue,

    // Field set rules
    DuplicateField,
    EmptyFieldName,

    // Mapping header rules
    EmptyName,
    EmptyBankId,
    UnknownSystemModel,
    EmptySourceFields,
    EmptyMappings,

    // Field mapping rules
    UnknownSourceField,
    UnknownTargetField,
    DuplicateTarget,
    DuplicateSource,
    IncompatibleTransformation,
    InvalidTransformation,
    FieldInUse,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MinGtMax => "MIN_GT_MAX",
            ErrorCode::NegativeLength => "NEGATIVE_LENGTH",
            ErrorCode::InvalidRegex => "INVALID_REGEX",
            ErrorCode::EmptyEnum => "EMPTY_ENUM",
            ErrorCode::DuplicateEnumValue => "DUPLICATE_ENUM_VALUE",
            ErrorCode::DuplicateField => "DUPLICATE_FIELD",
            ErrorCode::EmptyFieldName => "EMPTY_FIELD_NAME",
            ErrorCode::EmptyName => "EMPTY_NAME",
            ErrorCode::EmptyBankId => "EMPTY_BANK_ID",
            ErrorCode::UnknownSystemModel => "UNKNOWN_SYSTEM_MODEL",
            ErrorCode::EmptySourceFields => "EMPTY_SOURCE_FIELDS",
            ErrorCode::EmptyMappings => "EMPTY_MAPPINGS",
            ErrorCode::UnknownSourceField => "UNKNOWN_SOURCE_FIELD",
            ErrorCode::UnknownTargetField => "UNKNOWN_TARGET_FIELD",
            ErrorCode::DuplicateTarget => "DUPLICATE_TARGET",
            ErrorCode::DuplicateSource => "DUPLICATE_SOURCE",
            ErrorCode::IncompatibleTransformation => "INCOMPATIBLE_TRANSFORMATION",
            ErrorCode::InvalidTransformation => "INVALID_TRANSFORMATION",
            ErrorCode::FieldInUse => "FIELD_IN_USE",
        }
    }

    /// Dangling source/target name references
    pub fn is_referential(&self) -> bool {
        matches!(
            self,
            ErrorCode::UnknownSourceField | ErrorCode::UnknownTargetField
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field-scoped sub-error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: ErrorCode,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.field, self.message)
    }
}

/// Schema- or mapping-level rejection. Blocks persistence entirely.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("validation failed: {}", summarize(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(errors: Vec<FieldError>) -> Self {
        ValidationError { errors }
    }

    pub fn single(error: FieldError) -> Self {
        ValidationError {
            errors: vec![error],
        }
    }

    /// A ReferentialError is a ValidationError made only of dangling
    /// source/target references.
    pub fn is_referential(&self) -> bool {
        !self.errors.is_empty() && self.errors.iter().all(|e| e.code.is_referential())
    }

    pub fn codes(&self) -> Vec<ErrorCode> {
        self.errors.iter().map(|e| e.code).collect()
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// TRANSFORMATION ERRORS
// ============================================================================

/// Per-field evaluation failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformErrorKind {
    MissingRequiredField,
    TypeMismatch,
    DateParseError,
    ValueNotMapped,
    IndexOutOfRange,
    InvalidRange,
    NoRegexMatch,
    ConstraintViolation,
}

impl TransformErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformErrorKind::MissingRequiredField => "MissingRequiredField",
            TransformErrorKind::TypeMismatch => "TypeMismatch",
            TransformErrorKind::DateParseError => "DateParseError",
            TransformErrorKind::ValueNotMapped => "ValueNotMapped",
            TransformErrorKind::IndexOutOfRange => "IndexOutOfRange",
            TransformErrorKind::InvalidRange => "InvalidRange",
            TransformErrorKind::NoRegexMatch => "NoRegexMatch",
            TransformErrorKind::ConstraintViolation => "ConstraintViolation",
        }
    }
}

impl fmt::Display for TransformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransformationError {
    pub kind: TransformErrorKind,
    pub message: String,
}

impl TransformationError {
    pub fn new(kind: TransformErrorKind, message: impl Into<String>) -> Self {
        TransformationError {
            kind,
            message: message.into(),
        }
    }

    pub fn missing(field: &str) -> Self {
        Self::new(
            TransformErrorKind::MissingRequiredField,
            format!("Required field '{}' has no value", field),
        )
    }

    pub fn type_mismatch(expected: &str, value: &serde_json::Value) -> Self {
        Self::new(
            TransformErrorKind::TypeMismatch,
            format!("Cannot coerce {} to {}", value, expected),
        )
    }
}

// ============================================================================
// STRUCTURAL AND STORE ERRORS
// ============================================================================

/// Fatal for a whole run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("Mapping not found: {0}")]
    UnknownMapping(String),

    #[error("System model not found: {0}")]
    UnknownSystemModel(String),

    #[error("Input record must be a JSON object, got {0}")]
    MalformedInput(String),

    #[error("Mapping {mapping} no longer matches system model {model}: {details}")]
    SchemaDrift {
        mapping: String,
        model: String,
        details: String,
    },
}

/// Errors surfaced by registry and store writes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            StoreError::Validation(v) => Some(v),
            _ => None,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::MinGtMax).unwrap();
        assert_eq!(json, "\"MIN_GT_MAX\"");

        let code: ErrorCode = serde_json::from_str("\"DUPLICATE_ENUM_VALUE\"").unwrap();
        assert_eq!(code, ErrorCode::DuplicateEnumValue);
        assert_eq!(code.as_str(), "DUPLICATE_ENUM_VALUE");
    }

    #[test]
    fn test_referential_classification() {
        let dangling = ValidationError::new(vec![
            FieldError::new("mappings[0]", ErrorCode::UnknownSourceField, "missing"),
            FieldError::new("mappings[1]", ErrorCode::UnknownTargetField, "missing"),
        ]);
        assert!(dangling.is_referential());

        let mixed = ValidationError::new(vec![
            FieldError::new("mappings[0]", ErrorCode::UnknownSourceField, "missing"),
            FieldError::new("name", ErrorCode::EmptyName, "empty"),
        ]);
        assert!(!mixed.is_referential());
        assert!(!ValidationError::new(vec![]).is_referential());
    }

    #[test]
    fn test_validation_error_display_lists_every_field() {
        let err = ValidationError::new(vec![
            FieldError::new("code", ErrorCode::MinGtMax, "min_length 5 > max_length 2"),
            FieldError::new("side", ErrorCode::EmptyEnum, "no values"),
        ]);
        let text = err.to_string();
        assert!(text.contains("[MIN_GT_MAX] code"));
        assert!(text.contains("[EMPTY_ENUM] side"));
    }
}
