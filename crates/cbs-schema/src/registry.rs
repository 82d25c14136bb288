//! Declarative component schema registry
//!
//! Loads the schema once, answers `describe` lookups for any definition
//! path, and validates whole manifests with a compiled draft 7 validator.
//! The process-wide instance lives in a write-once cell and is never
//! mutated after load, so concurrent readers need no locking.

use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;

use cbs_manifest::ManifestDocument;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaLoadError;

const BUNDLED_SCHEMA: &str = include_str!("../schemas/declarative_component_schema.yaml");

/// Maximum `$ref` hops followed before giving up on a cycle
const MAX_REF_DEPTH: usize = 16;

static GLOBAL: OnceCell<SchemaRegistry> = OnceCell::new();

/// Where the schema document comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SchemaSource {
    /// Schema compiled into this crate
    #[default]
    Bundled,
    /// JSON or YAML file on disk
    Path(PathBuf),
    /// JSON or YAML text supplied by the caller
    Inline(String),
}

/// Documentation attached to one schema location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interpolation_context: Vec<String>,
}

impl SchemaDescriptor {
    /// Check if nothing is known about the location
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One JSON Schema failure, located by JSON pointer into the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub pointer: String,
    pub message: String,
}

/// Loaded, compiled declarative component schema
pub struct SchemaRegistry {
    document: Value,
    validator: JSONSchema,
}

impl SchemaRegistry {
    /// Load and compile a schema
    ///
    /// # Errors
    /// Returns error if the source cannot be read, parsed or compiled
    pub fn load(source: &SchemaSource) -> Result<Self, SchemaLoadError> {
        let document = match source {
            SchemaSource::Bundled => ManifestDocument::from_yaml(BUNDLED_SCHEMA)?,
            SchemaSource::Path(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| SchemaLoadError::io_error(path, e))?;
                ManifestDocument::parse(&text)?
            }
            SchemaSource::Inline(text) => ManifestDocument::parse(text)?,
        };
        let registry = Self::from_document(document.into_value())?;
        tracing::info!(
            "schema registry loaded: {} definitions",
            registry.definition_names().count()
        );
        Ok(registry)
    }

    /// Compile an already parsed schema
    ///
    /// # Errors
    /// Returns error if the document has no definitions or fails to compile
    pub fn from_document(document: Value) -> Result<Self, SchemaLoadError> {
        if !document.get("definitions").is_some_and(Value::is_object) {
            return Err(SchemaLoadError::MissingDefinitions);
        }
        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&document)
            .map_err(|e| SchemaLoadError::Compile(e.to_string()))?;
        Ok(Self {
            document,
            validator,
        })
    }

    /// Raw schema document
    #[inline]
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Schema version declared at the root, if any
    #[inline]
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.document.get("version").and_then(Value::as_str)
    }

    /// Named definition
    #[inline]
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<&Value> {
        self.document.get("definitions")?.get(name)
    }

    /// All definition names in document order
    pub fn definition_names(&self) -> impl Iterator<Item = &str> {
        self.document
            .get("definitions")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|defs| defs.keys().map(String::as_str))
    }

    /// Describe a schema location
    ///
    /// `path` is either a JSON pointer into the schema document
    /// (`/definitions/HttpRequester/properties/url_base`) or a dotted path
    /// starting at a definition name (`HttpRequester.url_base`). Dotted
    /// paths step through `properties`, `$ref`s, `items` and union members.
    /// Unknown locations yield an empty descriptor.
    #[must_use]
    pub fn describe(&self, path: &str) -> SchemaDescriptor {
        match self.locate(path) {
            Some(node) => self.descriptor_for(node),
            None => SchemaDescriptor::default(),
        }
    }

    /// `type` tags of the union members at a schema location
    ///
    /// Returns an empty list when the location is not a union.
    #[must_use]
    pub fn variant_tags(&self, path: &str) -> Vec<String> {
        let Some(node) = self.locate(path) else {
            return Vec::new();
        };
        let node = self.resolve_ref(node);
        union_members(node)
            .iter()
            .filter_map(|member| {
                let member = self.resolve_ref(member);
                member
                    .pointer("/properties/type/enum")
                    .and_then(Value::as_array)
                    .and_then(|tags| tags.first())
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }

    /// Validate a full manifest against the root schema
    #[must_use]
    pub fn validate(&self, manifest: &Value) -> Vec<SchemaViolation> {
        match self.validator.validate(manifest) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| SchemaViolation {
                    pointer: e.instance_path.to_string(),
                    message: e.to_string(),
                })
                .collect(),
        }
    }

    /// Check a manifest without collecting errors
    #[inline]
    #[must_use]
    pub fn is_valid(&self, manifest: &Value) -> bool {
        self.validator.is_valid(manifest)
    }

    fn locate(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.document);
        }
        if path.starts_with('/') {
            return self.document.pointer(path);
        }

        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut node = match self.definition(first) {
            Some(def) => def,
            None => self.property(&self.document, first)?,
        };
        for segment in segments {
            node = self.property(node, segment)?;
        }
        Some(node)
    }

    /// Step from `node` into child `segment`
    fn property<'a>(&'a self, node: &'a Value, segment: &str) -> Option<&'a Value> {
        let node = self.resolve_ref(node);

        if segment == "items" || segment.parse::<usize>().is_ok() {
            if let Some(items) = node.get("items") {
                return Some(items);
            }
        }
        if let Some(found) = node.get("properties").and_then(|p| p.get(segment)) {
            return Some(found);
        }
        union_members(node)
            .iter()
            .find_map(|member| self.property(member, segment))
    }

    fn resolve_ref<'a>(&'a self, mut node: &'a Value) -> &'a Value {
        for _ in 0..MAX_REF_DEPTH {
            let Some(target) = node
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix('#'))
                .and_then(|pointer| self.document.pointer(pointer))
            else {
                break;
            };
            node = target;
        }
        node
    }

    fn descriptor_for(&self, node: &Value) -> SchemaDescriptor {
        let target = self.resolve_ref(node);
        let field = |key: &str| {
            node.get(key)
                .or_else(|| target.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let examples = node
            .get("examples")
            .or_else(|| node.get("example"))
            .or_else(|| target.get("examples"))
            .and_then(Value::as_array)
            .map(|list| list.iter().map(example_text).collect())
            .unwrap_or_default();

        SchemaDescriptor {
            title: field("title"),
            description: field("description"),
            examples,
            enum_values: string_list(node.get("enum").or_else(|| target.get("enum"))),
            interpolation_context: string_list(
                node.get("interpolation_context")
                    .or_else(|| target.get("interpolation_context")),
            ),
        }
    }
}

impl Debug for SchemaRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("version", &self.version())
            .field("definitions", &self.definition_names().count())
            .finish_non_exhaustive()
    }
}

fn union_members(node: &Value) -> &[Value] {
    node.get("anyOf")
        .or_else(|| node.get("oneOf"))
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn example_text(example: &Value) -> String {
    match example {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Initialize the process-wide registry
///
/// The first successful call wins; later calls return the already loaded
/// registry regardless of `source`.
///
/// # Errors
/// Returns error if this call performs the load and it fails
pub fn init(source: &SchemaSource) -> Result<&'static SchemaRegistry, SchemaLoadError> {
    if let Some(existing) = GLOBAL.get() {
        if source != &SchemaSource::Bundled {
            tracing::debug!("schema registry already initialized, ignoring {:?}", source);
        }
        return Ok(existing);
    }
    GLOBAL.get_or_try_init(|| SchemaRegistry::load(source))
}

/// Process-wide registry, if initialized
#[inline]
#[must_use]
pub fn global() -> Option<&'static SchemaRegistry> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn bundled() -> SchemaRegistry {
        SchemaRegistry::load(&SchemaSource::Bundled).unwrap()
    }

    #[test]
    fn bundled_schema_loads() {
        let registry = bundled();
        assert!(registry.definition("DeclarativeStream").is_some());
        assert!(registry.definition_names().any(|n| n == "OAuthAuthenticator"));
    }

    #[test]
    fn describe_dotted_property() {
        let registry = bundled();
        let desc = registry.describe("HttpRequester.url_base");
        assert_eq!(desc.title.as_deref(), Some("API Base URL"));
        assert_eq!(desc.interpolation_context, vec!["config".to_string()]);
        assert!(!desc.examples.is_empty());
    }

    #[test]
    fn describe_follows_refs_and_unions() {
        let registry = bundled();
        let desc = registry.describe("DeclarativeStream.retriever.requester.http_method");
        assert_eq!(desc.enum_values, vec!["GET".to_string(), "POST".to_string()]);

        let desc = registry.describe("DefaultPaginator.page_size_option.inject_into");
        assert_eq!(desc.enum_values.len(), 4);
    }

    #[test]
    fn describe_pointer() {
        let registry = bundled();
        let desc = registry.describe("/definitions/RequestPath");
        assert_eq!(desc.title.as_deref(), Some("Request Path"));
    }

    #[test]
    fn describe_unknown_is_empty() {
        let registry = bundled();
        assert!(registry.describe("NoSuchThing.field").is_empty());
        assert!(registry.describe("HttpRequester.no_such_field").is_empty());
        assert!(registry.describe("/definitions/Missing").is_empty());
    }

    #[test]
    fn non_string_examples_are_stringified() {
        let registry = bundled();
        let desc = registry.describe("ConstantBackoffStrategy.backoff_time_in_seconds");
        assert!(desc.examples.contains(&"30".to_string()));
    }

    #[test]
    fn variant_tags_of_union() {
        let registry = bundled();
        let tags = registry.variant_tags("DefaultPaginator.pagination_strategy");
        assert_eq!(
            tags,
            vec![
                "CursorPagination".to_string(),
                "CustomPaginationStrategy".to_string(),
                "OffsetIncrement".to_string(),
                "PageIncrement".to_string(),
            ]
        );
        assert!(registry.variant_tags("HttpRequester.url_base").is_empty());
    }

    #[test]
    fn validate_reports_pointer() {
        let registry = bundled();
        let manifest = json!({
            "version": "6.1.0",
            "type": "DeclarativeSource",
            "check": {"type": "CheckStream", "stream_names": ["users"]},
            "streams": [{"type": "DeclarativeStream", "name": "users"}]
        });
        let violations = registry.validate(&manifest);
        assert!(!violations.is_empty());
        assert!(violations.iter().any(|v| v.pointer.starts_with("/streams/0")));
        assert!(!registry.is_valid(&manifest));
    }

    #[test]
    fn inline_source_requires_definitions() {
        let err = SchemaRegistry::load(&SchemaSource::Inline("type: object\n".into())).unwrap_err();
        assert!(matches!(err, SchemaLoadError::MissingDefinitions));

        let err = SchemaRegistry::load(&SchemaSource::Inline("{ broken".into())).unwrap_err();
        assert!(matches!(err, SchemaLoadError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SchemaRegistry::load(&SchemaSource::Path("/nonexistent/schema.yaml".into()))
            .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Io { .. }));
    }

    #[test]
    fn global_init_is_write_once() {
        let first = init(&SchemaSource::Bundled).unwrap();
        let second = init(&SchemaSource::Inline("not: a schema".into())).unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(global().is_some());
    }
}
