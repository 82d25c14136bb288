//! Connector Manifest Documents
//!
//! The document layer shared by the schema registry and the sync engine.
//!
//! # Core Concepts
//!
//! - [`ManifestDocument`]: a declarative connector manifest as a JSON tree,
//!   read from JSON or YAML and written back with conventional key order
//! - [`FieldPath`]: dotted addressing for form and manifest values, with
//!   lossless conversion to JSON pointers
//! - [`ManifestHash`]: 32-byte Blake3 hash of the canonical encoding
//!
//! # Example
//!
//! ```rust
//! use cbs_manifest::ManifestDocument;
//!
//! let doc = ManifestDocument::from_yaml("version: 6.1.0\nstreams: []\n").unwrap();
//! assert_eq!(doc.get("/version").and_then(|v| v.as_str()), Some("6.1.0"));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod document;
mod hash;
mod path;

pub use document::{
    canonical_json, format_json, merge_json, remove_path, set_path, sort_keys, DocumentError,
    ManifestDocument, ROOT_KEY_ORDER,
};
pub use hash::{HashError, ManifestHash};
pub use path::{FieldPath, PathError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_addressed_edit_changes_hash() {
        let mut doc = ManifestDocument::new(json!({"streams": [{"name": "users"}]}));
        let before = doc.hash();

        let path: FieldPath = "streams.0.name".parse().unwrap();
        assert_eq!(doc.get_path(&path), Some(&json!("users")));

        doc.set(&path.to_pointer(), json!("accounts")).unwrap();
        assert_ne!(doc.hash(), before);
        assert_eq!(doc.hash().short().len(), 16);
    }
}
