//! Testing utilities for the connector builder sync workspace
//!
//! Manifest fixtures shared by unit and integration tests. Every fixture is
//! already in the shape the engine writes back, so a manifest → form →
//! manifest pass is expected to reproduce it exactly.

#![allow(missing_docs)]

use cbs_manifest::ManifestDocument;
use serde_json::{json, Value};

pub const URL_BASE: &str = "https://api.example.com/v1";

/// `{{ config['key'] }}`
pub fn config_ref(key: &str) -> String {
    format!("{{{{ config['{key}'] }}}}")
}

/// A stream with a requester, a record selector and nothing else
pub fn stream(name: &str, path: &str) -> Value {
    json!({
        "type": "DeclarativeStream",
        "name": name,
        "primary_key": "id",
        "retriever": {
            "type": "SimpleRetriever",
            "requester": {
                "type": "HttpRequester",
                "url_base": URL_BASE,
                "path": path,
                "http_method": "GET"
            },
            "record_selector": {
                "type": "RecordSelector",
                "extractor": {"type": "DpathExtractor", "field_path": ["data"]}
            }
        }
    })
}

/// A manifest around the given streams, checking the first one
pub fn manifest_with_streams(streams: Vec<Value>) -> Value {
    let check: Vec<Value> = streams
        .first()
        .and_then(|s| s.get("name"))
        .cloned()
        .into_iter()
        .collect();
    json!({
        "version": "6.1.0",
        "type": "DeclarativeSource",
        "check": {"type": "CheckStream", "stream_names": check},
        "streams": streams
    })
}

/// One unauthenticated stream
pub fn simple_manifest() -> Value {
    manifest_with_streams(vec![stream("users", "/users")])
}

/// Bearer auth reading `api_key`, declared in the spec
pub fn bearer_manifest() -> Value {
    let mut users = stream("users", "/users");
    users["retriever"]["requester"]["authenticator"] = json!({
        "type": "BearerAuthenticator",
        "api_token": config_ref("api_key")
    });
    let mut manifest = manifest_with_streams(vec![users]);
    manifest["spec"] = spec(
        json!({
            "api_key": {"type": "string", "title": "API Key", "airbyte_secret": true}
        }),
        &["api_key"],
    );
    manifest
}

/// Client-credentials OAuth whose access token value and a request header
/// both read the explicit input `token`
pub fn oauth_token_manifest() -> Value {
    let mut users = stream("users", "/users");
    users["retriever"]["requester"]["authenticator"] = json!({
        "type": "OAuthAuthenticator",
        "client_id": config_ref("client_id"),
        "client_secret": config_ref("client_secret"),
        "token_refresh_endpoint": "https://auth.example.com/oauth/token",
        "grant_type": "client_credentials",
        "access_token_value": config_ref("token")
    });
    users["retriever"]["requester"]["request_headers"] = json!({"X-Token": "{{ config.token }}"});
    let mut manifest = manifest_with_streams(vec![users]);
    manifest["spec"] = spec(
        json!({
            "token": {"type": "string", "title": "Token", "airbyte_secret": true},
            "client_id": {"type": "string", "title": "Client ID", "airbyte_secret": true},
            "client_secret": {"type": "string", "title": "Client secret", "airbyte_secret": true}
        }),
        &["token", "client_id", "client_secret"],
    );
    manifest
}

/// A stream with cursor pagination and user-input incremental sync
pub fn incremental_manifest() -> Value {
    let mut events = stream("events", "/events");
    events["retriever"]["paginator"] = json!({
        "type": "DefaultPaginator",
        "pagination_strategy": {
            "type": "CursorPagination",
            "cursor_value": "{{ response.next }}",
            "stop_condition": "{{ not response.next }}"
        },
        "page_token_option": {"type": "RequestOption", "inject_into": "request_parameter", "field_name": "cursor"}
    });
    events["incremental_sync"] = json!({
        "type": "DatetimeBasedCursor",
        "cursor_field": "updated_at",
        "datetime_format": "%Y-%m-%dT%H:%M:%SZ",
        "cursor_datetime_formats": ["%Y-%m-%dT%H:%M:%SZ"],
        "start_datetime": {
            "type": "MinMaxDatetime",
            "datetime": config_ref("start_date"),
            "datetime_format": "%Y-%m-%dT%H:%M:%SZ"
        }
    });
    let mut manifest = manifest_with_streams(vec![events]);
    manifest["spec"] = spec(
        json!({
            "start_date": {
                "type": "string",
                "title": "Start date",
                "format": "date-time",
                "pattern": "^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}Z$"
            }
        }),
        &["start_date"],
    );
    manifest
}

/// Offset pagination whose page size is sent as `limit`
pub fn paginated_manifest() -> Value {
    let mut items = stream("items", "/items");
    items["retriever"]["paginator"] = json!({
        "type": "DefaultPaginator",
        "pagination_strategy": {"type": "OffsetIncrement", "page_size": 100},
        "page_token_option": {"type": "RequestOption", "inject_into": "request_parameter", "field_name": "offset"},
        "page_size_option": {"type": "RequestOption", "inject_into": "request_parameter", "field_name": "limit"}
    });
    let mut pages = stream("pages", "/pages");
    pages["retriever"]["paginator"] = json!({
        "type": "DefaultPaginator",
        "pagination_strategy": {"type": "PageIncrement", "start_from_page": 1},
        "page_token_option": {"type": "RequestPath"}
    });
    manifest_with_streams(vec![items, pages])
}

/// A list-partitioned stream and a substream of `users`
pub fn partitioned_manifest() -> Value {
    let users = stream("users", "/users");
    let mut sections = stream("sections", "/sections");
    sections["retriever"]["partition_router"] = json!({
        "type": "ListPartitionRouter",
        "cursor_field": "section",
        "values": ["news", "sports"],
        "request_option": {"type": "RequestOption", "inject_into": "request_parameter", "field_name": "section"}
    });
    let mut posts = stream("posts", "/users/{{ stream_partition.user_id }}/posts");
    posts["retriever"]["partition_router"] = json!([
        {
            "type": "ListPartitionRouter",
            "cursor_field": "lang",
            "values": ["en", "de"]
        },
        {
            "type": "SubstreamPartitionRouter",
            "parent_stream_configs": [{
                "type": "ParentStreamConfig",
                "parent_key": "id",
                "partition_field": "user_id",
                "stream": users.clone(),
                "incremental_dependency": false
            }]
        }
    ]);
    manifest_with_streams(vec![users, sections, posts])
}

/// Error handlers, record filtering, transformations and an inline schema
pub fn error_handling_manifest() -> Value {
    let mut orders = stream("orders", "/orders");
    orders["retriever"]["requester"]["error_handler"] = json!({
        "type": "CompositeErrorHandler",
        "error_handlers": [
            {
                "type": "DefaultErrorHandler",
                "max_retries": 3,
                "backoff_strategies": [{"type": "ConstantBackoffStrategy", "backoff_time_in_seconds": 5}]
            },
            {
                "type": "DefaultErrorHandler",
                "response_filters": [{"type": "HttpResponseFilter", "action": "IGNORE", "http_codes": [404]}]
            }
        ]
    });
    orders["retriever"]["record_selector"]["record_filter"] = json!({
        "type": "RecordFilter",
        "condition": "{{ record.status != 'draft' }}"
    });
    orders["transformations"] = json!([
        {
            "type": "AddFields",
            "fields": [{"type": "AddedFieldDefinition", "path": ["source"], "value": "api"}]
        },
        {"type": "RemoveFields", "field_pointers": [["internal"], ["meta", "debug"]]}
    ]);
    orders["schema_loader"] = json!({
        "type": "InlineSchemaLoader",
        "schema": {
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {"id": {"type": "string"}, "total": {"type": "number"}}
        }
    });
    let mut refunds = stream("refunds", "/refunds");
    refunds["retriever"]["requester"]["error_handler"] = json!({
        "type": "DefaultErrorHandler",
        "backoff_strategies": [{"type": "ExponentialBackoffStrategy", "factor": 2}]
    });
    manifest_with_streams(vec![orders, refunds])
}

/// Bearer auth on `users` while `status` is unauthenticated
pub fn mixed_auth_manifest() -> Value {
    let mut manifest = bearer_manifest();
    if let Some(streams) = manifest["streams"].as_array_mut() {
        streams.push(stream("status", "/status"));
    }
    manifest
}

/// `Spec` block with the given properties
pub fn spec(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "Spec",
        "connection_specification": {
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "required": required,
            "properties": properties,
            "additionalProperties": true
        }
    })
}

/// Fixture as YAML text
///
/// # Panics
/// Panics if the fixture cannot be serialized
pub fn to_yaml(manifest: &Value) -> String {
    ManifestDocument::new(manifest.clone())
        .to_yaml()
        .expect("fixture serializes to YAML")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_check_first_stream() {
        assert_eq!(simple_manifest()["check"]["stream_names"], json!(["users"]));
        assert_eq!(manifest_with_streams(Vec::new())["check"]["stream_names"], json!([]));
    }

    #[test]
    fn yaml_starts_with_version() {
        assert!(to_yaml(&bearer_manifest()).starts_with("version:"));
    }
}
