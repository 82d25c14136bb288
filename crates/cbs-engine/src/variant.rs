//! Variant resolver
//!
//! Every union field of the form has a fixed table of tags. Selecting a tag
//! yields that variant's default shape, the fields of the other variants
//! that must be dropped, and which default values are only placeholders.

use cbs_manifest::{merge_json, FieldPath};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::UnknownVariant;
use crate::form::USER_INPUT_DATE_FORMAT;
use crate::references::config_reference;

/// A union field of the builder form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnionField {
    Authenticator,
    PaginationStrategy,
    PageTokenOption,
    BackoffStrategy,
    DatetimeValue,
    RequestBody,
    Decoder,
    Transformation,
    ParameterizedValues,
}

impl UnionField {
    /// All union fields
    pub const ALL: [Self; 9] = [
        Self::Authenticator,
        Self::PaginationStrategy,
        Self::PageTokenOption,
        Self::BackoffStrategy,
        Self::DatetimeValue,
        Self::RequestBody,
        Self::Decoder,
        Self::Transformation,
        Self::ParameterizedValues,
    ];

    /// Identify the union a form path points at
    #[must_use]
    pub fn from_path(path: &FieldPath) -> Option<Self> {
        let segments: Vec<&str> = path.iter().collect();
        let is_index = |s: &str| s.parse::<usize>().is_ok();
        match segments.as_slice() {
            ["global", "authenticator"] => Some(Self::Authenticator),
            ["streams", n, rest @ ..] if is_index(n) => match rest {
                ["paginator", "strategy"] => Some(Self::PaginationStrategy),
                ["paginator", "page_token_option"] => Some(Self::PageTokenOption),
                ["error_handler", m, "backoff_strategy"] if is_index(m) => Some(Self::BackoffStrategy),
                ["incremental_sync", "start_datetime" | "end_datetime"] => Some(Self::DatetimeValue),
                ["request_options", "request_body"] => Some(Self::RequestBody),
                ["decoder"] => Some(Self::Decoder),
                ["transformations", m] if is_index(m) => Some(Self::Transformation),
                ["parameterized_requests", m, "values"] if is_index(m) => {
                    Some(Self::ParameterizedValues)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Field carrying the discriminating tag
    #[must_use]
    pub fn tag_key(self) -> &'static str {
        match self {
            Self::PageTokenOption => "inject_into",
            _ => "type",
        }
    }

    /// Known tags, in display order
    #[must_use]
    pub fn tags(self) -> &'static [&'static str] {
        match self {
            Self::Authenticator => &[
                "NoAuth",
                "ApiKeyAuthenticator",
                "BearerAuthenticator",
                "BasicHttpAuthenticator",
                "OAuthAuthenticator",
            ],
            Self::PaginationStrategy => &["OffsetIncrement", "PageIncrement", "CursorPagination"],
            Self::PageTokenOption => &["request_parameter", "header", "body_data", "body_json", "path"],
            Self::BackoffStrategy => &[
                "ConstantBackoffStrategy",
                "ExponentialBackoffStrategy",
                "WaitTimeFromHeader",
                "WaitUntilTimeFromHeader",
            ],
            Self::DatetimeValue => &["user_input", "now", "custom"],
            Self::RequestBody => &["json_list", "form_list", "json_freeform", "string_freeform"],
            Self::Decoder => &["JsonDecoder", "JsonlDecoder", "XmlDecoder", "IterableDecoder"],
            Self::Transformation => &["AddFields", "RemoveFields"],
            Self::ParameterizedValues => &["list", "variable"],
        }
    }

    /// Name used in messages
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Authenticator => "authenticator",
            Self::PaginationStrategy => "pagination strategy",
            Self::PageTokenOption => "page token option",
            Self::BackoffStrategy => "backoff strategy",
            Self::DatetimeValue => "datetime",
            Self::RequestBody => "request body",
            Self::Decoder => "decoder",
            Self::Transformation => "transformation",
            Self::ParameterizedValues => "parameterized values",
        }
    }

    fn default_shape(self, tag: &str) -> Option<(Value, &'static [&'static str])> {
        let shape = match (self, tag) {
            (Self::Authenticator, "NoAuth") => (json!({"type": "NoAuth"}), &[][..]),
            (Self::Authenticator, "ApiKeyAuthenticator") => (
                json!({
                    "type": "ApiKeyAuthenticator",
                    "api_token": config_reference("api_key"),
                    "inject_into": {"inject_into": "header", "field_name": ""}
                }),
                &["inject_into.field_name"][..],
            ),
            (Self::Authenticator, "BearerAuthenticator") => (
                json!({"type": "BearerAuthenticator", "api_token": config_reference("api_key")}),
                &[][..],
            ),
            (Self::Authenticator, "BasicHttpAuthenticator") => (
                json!({
                    "type": "BasicHttpAuthenticator",
                    "username": config_reference("username"),
                    "password": config_reference("password")
                }),
                &[][..],
            ),
            (Self::Authenticator, "OAuthAuthenticator") => (
                json!({
                    "type": "OAuthAuthenticator",
                    "client_id": config_reference("client_id"),
                    "client_secret": config_reference("client_secret"),
                    "token_refresh_endpoint": "",
                    "grant_type": "client_credentials",
                    "refresh_request_body": []
                }),
                &["token_refresh_endpoint"][..],
            ),
            (Self::PaginationStrategy, "OffsetIncrement") => {
                (json!({"type": "OffsetIncrement"}), &[][..])
            }
            (Self::PaginationStrategy, "PageIncrement") => {
                (json!({"type": "PageIncrement", "start_from_page": 1}), &[][..])
            }
            (Self::PaginationStrategy, "CursorPagination") => (
                json!({"type": "CursorPagination", "cursor_value": ""}),
                &["cursor_value"][..],
            ),
            (Self::PageTokenOption, "path") => (json!({"inject_into": "path"}), &[][..]),
            (Self::PageTokenOption, inject) if self.tags().contains(&inject) => (
                json!({"inject_into": inject, "field_name": ""}),
                &["field_name"][..],
            ),
            (Self::BackoffStrategy, "ConstantBackoffStrategy") => (
                json!({"type": "ConstantBackoffStrategy", "backoff_time_in_seconds": ""}),
                &["backoff_time_in_seconds"][..],
            ),
            (Self::BackoffStrategy, "ExponentialBackoffStrategy") => {
                (json!({"type": "ExponentialBackoffStrategy"}), &[][..])
            }
            (Self::BackoffStrategy, "WaitTimeFromHeader" | "WaitUntilTimeFromHeader") => {
                (json!({"type": tag, "header": ""}), &["header"][..])
            }
            (Self::DatetimeValue, "user_input" | "now") => (json!({"type": tag}), &[][..]),
            (Self::DatetimeValue, "custom") => (
                json!({"type": "custom", "value": "", "format": USER_INPUT_DATE_FORMAT}),
                &["value"][..],
            ),
            (Self::RequestBody, "json_list" | "form_list") => {
                (json!({"type": tag, "values": []}), &[][..])
            }
            (Self::RequestBody, "json_freeform") => {
                (json!({"type": "json_freeform", "value": "{}"}), &[][..])
            }
            (Self::RequestBody, "string_freeform") => {
                (json!({"type": "string_freeform", "value": ""}), &[][..])
            }
            (Self::Decoder, decoder) if self.tags().contains(&decoder) => {
                (json!({"type": decoder}), &[][..])
            }
            (Self::Transformation, "AddFields") => {
                (json!({"type": "AddFields", "fields": []}), &[][..])
            }
            (Self::Transformation, "RemoveFields") => {
                (json!({"type": "RemoveFields", "field_pointers": []}), &[][..])
            }
            (Self::ParameterizedValues, "list") => (json!({"type": "list", "value": []}), &[][..]),
            (Self::ParameterizedValues, "variable") => (
                json!({"type": "variable", "value": ""}),
                &["value"][..],
            ),
            _ => return None,
        };
        Some(shape)
    }

    fn fields_of(self, tag: &str) -> Vec<String> {
        self.default_shape(tag)
            .and_then(|(value, _)| value.as_object().map(|m| m.keys().cloned().collect()))
            .unwrap_or_default()
    }
}

/// What selecting a variant changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVariant {
    /// New value of the union field
    pub default_value: Value,
    /// Fields of other variants to unregister, relative to the union field
    pub clear_sibling_paths: Vec<FieldPath>,
    /// Fields holding placeholders, relative to the union field
    pub placeholder_paths: Vec<FieldPath>,
}

/// Default shape of `tag` in `union`
///
/// # Errors
/// Returns error if the tag is not in the union's table
pub fn resolve_variant(union: UnionField, tag: &str) -> Result<ResolvedVariant, UnknownVariant> {
    let (default_value, placeholders) =
        union.default_shape(tag).ok_or_else(|| UnknownVariant {
            union: union.name().to_string(),
            tag: tag.to_string(),
        })?;

    let own = union.fields_of(tag);
    let mut clear_sibling_paths: Vec<FieldPath> = Vec::new();
    for other in union.tags().iter().filter(|t| **t != tag) {
        for field in union.fields_of(other) {
            if !own.contains(&field) && !clear_sibling_paths.iter().any(|p| p.first() == Some(field.as_str())) {
                clear_sibling_paths.push(FieldPath::single(field));
            }
        }
    }

    let placeholder_paths = placeholders
        .iter()
        .filter_map(|p| p.parse::<FieldPath>().ok())
        .collect();

    Ok(ResolvedVariant {
        default_value,
        clear_sibling_paths,
        placeholder_paths,
    })
}

/// Variant selection against the current value of a union field
#[derive(Debug, Clone, PartialEq)]
pub enum VariantSelection {
    /// The field already holds the requested variant
    Unchanged,
    /// Replace the field with the resolved variant
    Replace(ResolvedVariant),
}

/// Resolve a selection, seeding the new variant with `preseed`
///
/// Seeded fields are real values, so they are not reported as placeholders.
///
/// # Errors
/// Returns error if the tag is not in the union's table
pub fn select_variant(
    union: UnionField,
    current: Option<&Value>,
    tag: &str,
    preseed: Option<&Value>,
) -> Result<VariantSelection, UnknownVariant> {
    let current_tag = current
        .and_then(|v| v.get(union.tag_key()))
        .and_then(Value::as_str);
    if current_tag == Some(tag) {
        return Ok(VariantSelection::Unchanged);
    }

    let mut resolved = resolve_variant(union, tag)?;
    if let Some(seed) = preseed {
        resolved.default_value = merge_json(&resolved.default_value, seed);
        if let Some(object) = resolved.default_value.as_object_mut() {
            object.insert(union.tag_key().to_string(), Value::String(tag.to_string()));
        }
        resolved.placeholder_paths.retain(|path| {
            seed.pointer(&path.to_pointer()).is_none()
        });
    }
    Ok(VariantSelection::Replace(resolved))
}
