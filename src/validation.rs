//! Input validation for testvault
//!
//! Project ids and entity ids become path segments, so they are validated
//! before any path is built from them.

use thiserror::Error;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid identifier '{0}': {1}")]
    InvalidIdentifier(String, &'static str),

    #[error("Identifier '{0}' is too long (max {1} characters)")]
    TooLong(String, usize),

    #[error("Identifier cannot be empty")]
    Empty,

    #[error("Reserved name: '{0}'")]
    Reserved(String),
}

/// Maximum length for identifiers
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Reserved names that cannot be used
const RESERVED_NAMES: &[&str] = &[
    ".", "..", "con", "prn", "aux", "nul",
    "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8", "com9",
    "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Validate a project id
///
/// Rules:
/// - Must be 1-255 characters
/// - Only alphanumeric, underscore, and hyphen allowed
/// - Cannot start with a hyphen or underscore (underscore marks index files)
/// - Cannot be a reserved name
pub fn validate_project_id(id: &str) -> Result<(), ValidationError> {
    validate_identifier(id)
}

/// Validate an entity id. Same rules as project ids.
pub fn validate_entity_id(id: &str) -> Result<(), ValidationError> {
    validate_identifier(id)
}

/// Validate an attachment name relative to its entity directory
///
/// More permissive: allows `.` for file extensions and `/` between segments.
pub fn validate_attachment_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong(name.to_string(), MAX_IDENTIFIER_LENGTH));
    }

    if name.contains("..") || name.contains('\\') || name.starts_with('/') {
        return Err(ValidationError::InvalidIdentifier(
            name.to_string(),
            "contains path traversal characters",
        ));
    }

    for segment in name.split('/') {
        if segment.is_empty() {
            return Err(ValidationError::InvalidIdentifier(
                name.to_string(),
                "contains an empty path segment",
            ));
        }
        for (i, c) in segment.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' && c != '.' {
                return Err(ValidationError::InvalidIdentifier(
                    name.to_string(),
                    "contains invalid characters (only alphanumeric, underscore, hyphen, and dot allowed)",
                ));
            }
            if i == 0 && c == '.' {
                return Err(ValidationError::InvalidIdentifier(
                    name.to_string(),
                    "segments cannot start with a dot",
                ));
            }
        }
    }

    Ok(())
}

/// Core identifier validation
fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong(name.to_string(), MAX_IDENTIFIER_LENGTH));
    }

    for (i, c) in name.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
            return Err(ValidationError::InvalidIdentifier(
                name.to_string(),
                "contains invalid characters (only alphanumeric, underscore, and hyphen allowed)",
            ));
        }
        if i == 0 && (c == '-' || c == '_') {
            return Err(ValidationError::InvalidIdentifier(
                name.to_string(),
                "cannot start with hyphen or underscore",
            ));
        }
    }

    if RESERVED_NAMES.contains(&name.to_lowercase().as_str()) {
        return Err(ValidationError::Reserved(name.to_string()));
    }

    Ok(())
}
