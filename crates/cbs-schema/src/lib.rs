//! Declarative Component Schema Registry
//!
//! The read-only source of truth for what a manifest may contain.
//!
//! # Core Operations
//!
//! - **Load**: parse and compile the schema once per process ([`init`])
//! - **Describe**: title, description, examples, enum options and
//!   interpolation context for any schema location
//!   ([`SchemaRegistry::describe`])
//! - **Validate**: run the compiled draft 7 validator over a whole manifest
//!   ([`SchemaRegistry::validate`])
//!
//! # Example
//!
//! ```rust
//! use cbs_schema::{init, SchemaSource};
//!
//! let registry = init(&SchemaSource::Bundled).unwrap();
//! let desc = registry.describe("HttpRequester.url_base");
//! assert_eq!(desc.title.as_deref(), Some("API Base URL"));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod registry;

pub use error::SchemaLoadError;
pub use registry::{global, init, SchemaDescriptor, SchemaRegistry, SchemaSource, SchemaViolation};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
