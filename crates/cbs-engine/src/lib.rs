//! CBS Engine - connector builder form/manifest sync
//!
//! Keeps the structured builder form and the declarative YAML manifest
//! consistent in both directions:
//! - Converts manifests into form values, keeping what the form cannot
//!   model verbatim
//! - Derives the manifest from the form after every edit
//! - Switches union variants without leaking fields between them
//! - Infers inputs from the selected authenticator and datetime variants
//! - Renames input keys together with every config reference to them
//! - Keeps testing values aligned with the effective input set
//! - Validates the form per field
//!
//! # Example
//!
//! ```rust,ignore
//! use cbs_engine::{EngineConfig, SyncEngine};
//! use serde_json::json;
//!
//! let mut engine = SyncEngine::new(EngineConfig::new())?;
//! engine.apply_form_edit("global.url_base", json!("https://api.example.com"))?;
//! engine.add_stream("users");
//! engine.select_variant("global.authenticator", "BearerAuthenticator", None)?;
//!
//! println!("{}", engine.export_yaml()?);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod config;
pub mod engine;
pub mod error;
pub mod form;
pub mod inferred;
pub mod mapper;
pub mod references;
pub mod testing_values;
pub mod validation;
pub mod variant;

// Re-exports for convenience
pub use config::EngineConfig;
pub use engine::{ManifestSnapshot, StreamSection, SyncEngine};
pub use error::{DuplicateKey, EditError, EngineError, RewriteConflict, UnknownVariant};
pub use form::{
    Authenticator, BuilderAuthenticator, BuilderFormValues, BuilderStream, FormState,
    InputDefinition, InputType,
};
pub use inferred::{effective_inputs, inferred_inputs};
pub use mapper::{form_to_manifest, manifest_to_form};
pub use references::{config_reference, extract_referenced_key, rewrite_key_references};
pub use testing_values::{sync_testing_values, KeyRename};
pub use validation::{validate, validate_form, ErrorKind, FieldError, Section, ValidationReport};
pub use variant::{resolve_variant, select_variant, ResolvedVariant, UnionField, VariantSelection};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the sync engine
    pub use crate::{
        EditError, EngineConfig, ErrorKind, FormState, InputDefinition, InputType, Section,
        StreamSection, SyncEngine, ValidationReport,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use serde_json::json;

    fn offline() -> EngineConfig {
        EngineConfig::new().with_schema_validation(false)
    }

    #[test]
    fn manifest_in_form_edit_manifest_out() {
        let manifest = json!({
            "version": "6.1.0",
            "type": "DeclarativeSource",
            "check": {"type": "CheckStream", "stream_names": ["users"]},
            "streams": [{
                "type": "DeclarativeStream",
                "name": "users",
                "primary_key": ["id"],
                "retriever": {
                    "type": "SimpleRetriever",
                    "requester": {
                        "type": "HttpRequester",
                        "url_base": "https://api.example.com",
                        "path": "/users",
                        "http_method": "GET"
                    },
                    "record_selector": {
                        "type": "RecordSelector",
                        "extractor": {"type": "DpathExtractor", "field_path": ["data"]}
                    }
                }
            }]
        });
        let mut engine = SyncEngine::from_manifest(offline(), &manifest).unwrap();
        assert_eq!(engine.values().streams.len(), 1);

        engine.apply_form_edit("streams.0.url_path", json!("/members")).unwrap();
        let out = engine.manifest();
        assert_eq!(out["streams"][0]["retriever"]["requester"]["path"], json!("/members"));
        assert_eq!(out["check"]["stream_names"], json!(["users"]));
    }

    #[test]
    fn rename_through_engine() {
        let mut engine = SyncEngine::new(offline()).unwrap();
        engine
            .create_input(InputDefinition::new("region", InputType::String).with_default(json!("eu")))
            .unwrap();
        engine.add_stream("users");
        engine
            .apply_form_edit("streams.0.url_path", json!("/{{ config['region'] }}/users"))
            .unwrap();

        engine
            .update_input("region", InputDefinition::new("zone", InputType::String).with_default(json!("eu")))
            .unwrap();
        assert_eq!(engine.values().streams[0].url_path, "/{{ config['zone'] }}/users");
        assert_eq!(engine.state().testing_values.get("zone"), Some(&json!("eu")));
        assert!(engine.state().testing_values.get("region").is_none());
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
