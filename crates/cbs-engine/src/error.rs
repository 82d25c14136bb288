//! Error types for the sync engine
//!
//! Provides error handling for:
//! - Engine construction (schema loading)
//! - Form edits that cannot be applied
//! - Variant switches to tags the resolver does not know
//! - Input key renames that would not survive a rewrite

use cbs_manifest::{DocumentError, PathError};
use cbs_schema::SchemaLoadError;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Schema registry could not be loaded
    #[error("schema load failed: {0}")]
    Schema(#[from] SchemaLoadError),

    /// Manifest document error
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// Form edit rejected
    #[error("edit rejected: {0}")]
    Edit(#[from] EditError),
}

/// A form edit that was rejected before any state changed
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    /// Path could not be parsed or addressed
    #[error("invalid path: {0}")]
    Path(#[from] PathError),

    /// Value could not be written at the path
    #[error("cannot write value: {0}")]
    Document(#[from] DocumentError),

    /// The edited tree no longer matches the form model
    #[error("invalid value at '{path}': {message}")]
    InvalidValue { path: String, message: String },

    /// Variant switch requested on a field that is not a union
    #[error("'{0}' is not a union field")]
    NotAUnion(String),

    /// Variant tag unknown for the union
    #[error(transparent)]
    UnknownVariant(#[from] UnknownVariant),

    /// Input key already in the effective input set
    #[error(transparent)]
    DuplicateKey(#[from] DuplicateKey),

    /// No explicit input with that key
    #[error("no input with key '{0}'")]
    InputNotFound(String),

    /// No stream at that position
    #[error("no stream at index {0}")]
    StreamNotFound(usize),

    /// Key rename rolled back
    #[error(transparent)]
    RewriteConflict(#[from] RewriteConflict),
}

/// A union tag the variant resolver has no entry for
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant '{tag}' for {union}")]
pub struct UnknownVariant {
    /// Union field name
    pub union: String,
    /// Requested tag
    pub tag: String,
}

/// Creating or renaming an input onto a key that is already taken
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("input key '{key}' is already in use")]
pub struct DuplicateKey {
    /// The contested key
    pub key: String,
}

/// Rewriting references for a rename produced a document that failed to
/// re-parse or re-validate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("renaming '{previous_key}' to '{new_key}' rolled back: {reason}")]
pub struct RewriteConflict {
    pub previous_key: String,
    pub new_key: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = EditError::from(UnknownVariant {
            union: "authenticator".to_string(),
            tag: "Magic".to_string(),
        });
        assert_eq!(err.to_string(), "unknown variant 'Magic' for authenticator");

        let err = EngineError::from(EditError::from(DuplicateKey {
            key: "api_key".to_string(),
        }));
        assert_eq!(err.to_string(), "edit rejected: input key 'api_key' is already in use");
    }
}
