//! Error types for the object store and refactoring engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlexError>;

#[derive(Error, Debug)]
pub enum FlexError {
    // Structural validation: rejected before any mutation
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Class '{0}' already exists")]
    ClassExists(String),

    #[error("Property not found: {class}.{property}")]
    PropertyNotFound { class: String, property: String },

    #[error("Property '{property}' already exists in class '{class}'")]
    PropertyExists { class: String, property: String },

    #[error("Object not found: {0}")]
    ObjectNotFound(i64),

    #[error("Schema not found: {0}")]
    SchemaNotFound(i64),

    #[error("Name not found: {0}")]
    NameNotFound(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Malformed JSON path '{path}': {reason}")]
    InvalidJsonPath { path: String, reason: String },

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    // Control-flag codec
    #[error("Invalid control flags: {0}")]
    InvalidFlags(String),

    // Data conformance in strict writes
    #[error("Validation failed for {class}.{property}: {message}")]
    Validation { class: String, property: String, message: String },

    #[error("Unique constraint violated for {class}.{property}: {value}")]
    UniqueViolation { class: String, property: String, value: String },

    // Referential integrity
    #[error("Object {object} cannot be deleted: {reason}")]
    DeleteRestricted { object: i64, reason: String },

    #[error("Referenced object {target} is not valid for {class}.{property}")]
    InvalidReference { class: String, property: String, target: i64 },

    // Resolution / configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation aborted: {failures} failed objects exceed threshold of {threshold}")]
    FailureThresholdExceeded { failures: usize, threshold: usize },

    #[error("Data loss not acknowledged: {0}")]
    DataLossNotAcknowledged(String),

    #[error("Operation not allowed in read-only mode")]
    ReadOnlyMode,

    #[error("Change log entry not found: {0}")]
    ChangeNotFound(i64),

    // Wrapped collaborators
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlexError {
    /// Get stable error code for external tooling
    pub fn code(&self) -> &'static str {
        match self {
            FlexError::ClassNotFound(_) => "CLASS_NOT_FOUND",
            FlexError::ClassExists(_) => "CLASS_EXISTS",
            FlexError::PropertyNotFound { .. } => "PROPERTY_NOT_FOUND",
            FlexError::PropertyExists { .. } => "PROPERTY_EXISTS",
            FlexError::ObjectNotFound(_) => "OBJECT_NOT_FOUND",
            FlexError::InvalidJsonPath { .. } => "INVALID_JSON_PATH",
            FlexError::InvalidDefinition(_) | FlexError::InvalidRegex { .. } => "INVALID_DEFINITION",
            FlexError::InvalidFlags(_) => "INVALID_FLAGS",
            FlexError::Validation { .. } => "VALIDATION_FAILED",
            FlexError::UniqueViolation { .. } => "UNIQUE_VIOLATION",
            FlexError::DeleteRestricted { .. } => "DELETE_RESTRICTED",
            FlexError::InvalidReference { .. } => "INVALID_REFERENCE",
            FlexError::Config(_) => "CONFIG_ERROR",
            FlexError::FailureThresholdExceeded { .. } => "FAILURE_THRESHOLD_EXCEEDED",
            FlexError::DataLossNotAcknowledged(_) => "DATA_LOSS_NOT_ACKNOWLEDGED",
            FlexError::ReadOnlyMode => "READ_ONLY_MODE",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether the error was raised by structural validation, i.e. before
    /// any data was touched.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FlexError::ClassNotFound(_)
                | FlexError::ClassExists(_)
                | FlexError::PropertyNotFound { .. }
                | FlexError::PropertyExists { .. }
                | FlexError::InvalidName(_)
                | FlexError::InvalidJsonPath { .. }
                | FlexError::InvalidDefinition(_)
                | FlexError::InvalidRegex { .. }
                | FlexError::DataLossNotAcknowledged(_)
        )
    }

    pub(crate) fn property_not_found(class: &str, property: &str) -> Self {
        FlexError::PropertyNotFound {
            class: class.to_string(),
            property: property.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(FlexError::ClassNotFound("x".into()).code(), "CLASS_NOT_FOUND");
        assert_eq!(FlexError::ReadOnlyMode.code(), "READ_ONLY_MODE");
        assert_eq!(FlexError::ChangeNotFound(1).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_structural_classification() {
        assert!(FlexError::ClassExists("A".into()).is_structural());
        assert!(FlexError::property_not_found("A", "b").is_structural());
        assert!(!FlexError::ObjectNotFound(1).is_structural());
        assert!(!FlexError::FailureThresholdExceeded { failures: 2, threshold: 1 }.is_structural());
    }
}
