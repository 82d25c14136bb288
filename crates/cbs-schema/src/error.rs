//! Error types for the schema registry
//!
//! Every variant is fatal: a registry that fails to load cannot back an
//! engine, so callers surface these at startup and stop.

use std::path::PathBuf;

use cbs_manifest::DocumentError;

/// Errors while loading the declarative component schema
#[derive(Debug, thiserror::Error)]
pub enum SchemaLoadError {
    /// IO error reading a schema file
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Schema text is not valid JSON or YAML
    #[error("schema parse error: {0}")]
    Parse(#[from] DocumentError),

    /// Parsed document is not a schema with named definitions
    #[error("schema has no definitions object")]
    MissingDefinitions,

    /// Schema could not be compiled into a validator
    #[error("schema compile error: {0}")]
    Compile(String),
}

impl SchemaLoadError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_display() {
        let err = SchemaLoadError::Compile("bad $ref".to_string());
        assert_eq!(err.to_string(), "schema compile error: bad $ref");

        let err = SchemaLoadError::io_error(
            "/missing.yaml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        assert!(err.to_string().contains("/missing.yaml"));
    }
}
