//! Engine configuration

use cbs_schema::SchemaSource;
use serde::{Deserialize, Serialize};

use crate::form::{DEFAULT_CONNECTOR_NAME, DEFAULT_MANIFEST_VERSION};

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where the declarative component schema is loaded from
    pub schema_source: SchemaSource,
    /// Whether every derived manifest is also checked against the schema
    pub validate_schema: bool,
    /// Connector name for forms created from a manifest
    pub connector_name: String,
    /// Manifest version written for forms that carry none
    pub manifest_version: String,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With schema source
    #[inline]
    #[must_use]
    pub fn with_schema_source(mut self, source: SchemaSource) -> Self {
        self.schema_source = source;
        self
    }

    /// With schema validation switched on or off
    #[inline]
    #[must_use]
    pub fn with_schema_validation(mut self, enabled: bool) -> Self {
        self.validate_schema = enabled;
        self
    }

    /// With connector name
    #[inline]
    #[must_use]
    pub fn with_connector_name(mut self, name: impl Into<String>) -> Self {
        self.connector_name = name.into();
        self
    }

    /// With manifest version
    #[inline]
    #[must_use]
    pub fn with_manifest_version(mut self, version: impl Into<String>) -> Self {
        self.manifest_version = version.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_source: SchemaSource::Bundled,
            validate_schema: true,
            connector_name: DEFAULT_CONNECTOR_NAME.to_string(),
            manifest_version: DEFAULT_MANIFEST_VERSION.to_string(),
        }
    }
}
