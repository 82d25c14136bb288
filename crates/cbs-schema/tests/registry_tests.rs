use std::io::Write;

use cbs_schema::{SchemaRegistry, SchemaSource};
use serde_json::json;

const TINY_SCHEMA: &str = r##"
type: object
required: [type]
properties:
  type:
    type: string
    enum: [Tiny]
  auth:
    anyOf:
      - "$ref": "#/definitions/KeyAuth"
      - "$ref": "#/definitions/NoAuth"
definitions:
  KeyAuth:
    title: Key
    type: object
    required: [type, key]
    properties:
      type:
        type: string
        enum: [KeyAuth]
      key:
        title: Key Value
        type: string
        interpolation_context: [config]
  NoAuth:
    type: object
    properties:
      type:
        type: string
        enum: [NoAuth]
"##;

#[test]
fn test_load_from_yaml_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(TINY_SCHEMA.as_bytes()).unwrap();

    let registry = SchemaRegistry::load(&SchemaSource::Path(file.path().to_path_buf())).unwrap();
    assert_eq!(registry.variant_tags("auth"), vec!["KeyAuth", "NoAuth"]);
    assert_eq!(registry.describe("auth.key").title.as_deref(), Some("Key Value"));
    assert_eq!(registry.describe("KeyAuth.key").interpolation_context, vec!["config"]);
}

#[test]
fn test_validation_against_custom_schema() {
    let registry = SchemaRegistry::load(&SchemaSource::Inline(TINY_SCHEMA.to_string())).unwrap();

    assert!(registry.is_valid(&json!({"type": "Tiny", "auth": {"type": "KeyAuth", "key": "k"}})));

    let violations = registry.validate(&json!({"type": "Other"}));
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].pointer, "/type");
}

#[test]
fn test_bundled_accepts_minimal_manifest() {
    let registry = SchemaRegistry::load(&SchemaSource::Bundled).unwrap();
    let manifest = json!({
        "version": "6.1.0",
        "type": "DeclarativeSource",
        "check": {"type": "CheckStream", "stream_names": ["users"]},
        "streams": [{
            "type": "DeclarativeStream",
            "name": "users",
            "primary_key": "id",
            "retriever": {
                "type": "SimpleRetriever",
                "requester": {
                    "type": "HttpRequester",
                    "url_base": "https://api.example.com",
                    "path": "/users",
                    "http_method": "GET",
                    "authenticator": {
                        "type": "ApiKeyAuthenticator",
                        "api_token": "{{ config['api_key'] }}",
                        "inject_into": {
                            "type": "RequestOption",
                            "field_name": "X-API-Key",
                            "inject_into": "header"
                        }
                    }
                },
                "record_selector": {
                    "type": "RecordSelector",
                    "extractor": {"type": "DpathExtractor", "field_path": ["data"]}
                },
                "paginator": {
                    "type": "DefaultPaginator",
                    "pagination_strategy": {"type": "OffsetIncrement", "page_size": 50},
                    "page_token_option": {"type": "RequestPath"}
                }
            }
        }],
        "spec": {
            "type": "Spec",
            "connection_specification": {
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "required": ["api_key"],
                "properties": {"api_key": {"type": "string", "airbyte_secret": true}}
            }
        }
    });
    let violations = registry.validate(&manifest);
    assert!(violations.is_empty(), "{violations:?}");
}

#[test]
fn test_bundled_rejects_unknown_authenticator_tag() {
    let registry = SchemaRegistry::load(&SchemaSource::Bundled).unwrap();
    let manifest = json!({
        "version": "6.1.0",
        "type": "DeclarativeSource",
        "check": {"type": "CheckStream", "stream_names": []},
        "streams": [{
            "type": "DeclarativeStream",
            "retriever": {
                "type": "SimpleRetriever",
                "requester": {
                    "type": "HttpRequester",
                    "url_base": "https://api.example.com",
                    "authenticator": {"type": "MadeUpAuthenticator"}
                },
                "record_selector": {
                    "type": "RecordSelector",
                    "extractor": {"type": "DpathExtractor", "field_path": []}
                }
            }
        }]
    });
    let violations = registry.validate(&manifest);
    assert!(violations
        .iter()
        .any(|v| v.pointer.starts_with("/streams/0/retriever")));
}
