//! Form ↔ manifest mapping
//!
//! Both directions are total. A manifest section the form cannot express
//! is stored verbatim in an `unmodeled` map under its JSON pointer and laid
//! back over the generated manifest, so conversion never fails and foreign
//! content survives a round trip.
//!
//! Normalizations applied when writing a manifest:
//! - one error handler is a `DefaultErrorHandler`, several a `CompositeErrorHandler`
//! - an explicit `JsonDecoder` and `NoPagination` are dropped
//! - empty lists and key/value sections are omitted
//! - a single primary key is written as a string
//! - user-input and now datetimes are written as `MinMaxDatetime`
//! - the spec is written only when the effective input set is non-empty

use std::collections::BTreeSet;

use cbs_manifest::{format_json, remove_path, set_path, FieldPath};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::form::{
    AddedField, Authenticator, BackoffStrategy, BuilderAuthenticator, BuilderErrorHandler,
    BuilderFormValues, BuilderIncrementalSync, BuilderPaginator, BuilderStream,
    BuilderTransformation, DatetimeBound, DatetimeValue, Decoder, FormState, HttpMethod,
    InjectInto, InputDefinition, KeyValue, OAuthSettings, PageTokenOption, PaginationStrategy,
    ParameterizedRequest, ParameterizedValues, ParentStreamReference, RecordSelectorSettings,
    RequestBody, RequestOption, RequestOptions, ResponseFilter, DEFAULT_MANIFEST_VERSION,
    NOW_EXPRESSION, USER_INPUT_DATE_FORMAT,
};
use crate::inferred::{
    auth_inferred_fields, effective_inputs, inferred_definition, inferred_keys, inferred_property,
};
use crate::references::config_reference;
use crate::testing_values::sync_testing_values;

const JSON_SCHEMA_DRAFT_7: &str = "http://json-schema.org/draft-07/schema#";

const ROOT_KEYS: &[&str] = &["version", "type", "check", "streams", "spec"];
const STREAM_KEYS: &[&str] = &[
    "type",
    "name",
    "primary_key",
    "retriever",
    "incremental_sync",
    "schema_loader",
    "transformations",
];
const RETRIEVER_KEYS: &[&str] = &[
    "type",
    "requester",
    "record_selector",
    "paginator",
    "partition_router",
    "decoder",
];
const REQUESTER_KEYS: &[&str] = &[
    "type",
    "url_base",
    "path",
    "http_method",
    "authenticator",
    "request_parameters",
    "request_headers",
    "request_body_json",
    "request_body_data",
    "error_handler",
];
const RECORD_SELECTOR_KEYS: &[&str] = &["type", "extractor", "record_filter", "schema_normalization"];
const PAGINATOR_KEYS: &[&str] = &["type", "pagination_strategy", "page_token_option", "page_size_option"];
const INCREMENTAL_KEYS: &[&str] = &[
    "type",
    "cursor_field",
    "datetime_format",
    "cursor_datetime_formats",
    "start_datetime",
    "end_datetime",
    "start_time_option",
    "end_time_option",
    "step",
    "cursor_granularity",
    "lookback_window",
    "is_data_feed",
];
const MIN_MAX_DATETIME_KEYS: &[&str] = &["type", "datetime", "datetime_format"];
const REQUEST_OPTION_KEYS: &[&str] = &["type", "inject_into", "field_name"];
const OAUTH_KEYS: &[&str] = &[
    "type",
    "client_id",
    "client_secret",
    "refresh_token",
    "token_refresh_endpoint",
    "grant_type",
    "refresh_request_body",
    "scopes",
    "access_token_value",
    "access_token_name",
    "expires_in_name",
    "token_expiry_date",
    "token_expiry_date_format",
    "refresh_token_updater",
];
const REFRESH_TOKEN_UPDATER_KEYS: &[&str] = &[
    "refresh_token_name",
    "access_token_config_path",
    "refresh_token_config_path",
    "token_expiry_date_config_path",
];
const SPEC_KEYS: &[&str] = &["type", "connection_specification"];
const CONNECTION_SPEC_KEYS: &[&str] = &["$schema", "type", "required", "properties", "additionalProperties"];

const REQUESTER: &str = "/retriever/requester";

/// Why a section could not be expressed in the form
#[derive(Debug)]
struct Unsupported(String);

type Convert<T> = Result<T, Unsupported>;

fn unsupported<T>(reason: impl Into<String>) -> Convert<T> {
    Err(Unsupported(reason.into()))
}

/// Collects verbatim values for one scope (the manifest root or a stream)
struct Hatch<'a> {
    scope: &'a str,
    entries: IndexMap<String, Value>,
}

impl<'a> Hatch<'a> {
    fn new(scope: &'a str) -> Self {
        Self {
            scope,
            entries: IndexMap::new(),
        }
    }

    fn keep(&mut self, pointer: &str, value: &Value, reason: &Unsupported) {
        let nested = format!("{pointer}/");
        self.entries.retain(|p, _| !p.starts_with(&nested));
        tracing::warn!(scope = self.scope, pointer, reason = %reason.0, "section kept verbatim");
        self.entries.insert(pointer.to_string(), value.clone());
    }

    fn extras(&mut self, map: &Map<String, Value>, modeled: &[&str], pointer: &str) {
        for (key, value) in map {
            if !modeled.contains(&key.as_str()) {
                let child = child_pointer(pointer, key);
                tracing::debug!(scope = self.scope, pointer = %child, "unmodeled key kept verbatim");
                self.entries.insert(child, value.clone());
            }
        }
    }

    fn section<T>(&mut self, pointer: &str, raw: &Value, result: Convert<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(reason) => {
                self.keep(pointer, raw, &reason);
                None
            }
        }
    }
}

/// Manifest values every stream is compared against
struct Context<'a> {
    raw_streams: &'a [Value],
    url_base: Value,
    authenticator: Option<Value>,
}

// ---------------------------------------------------------------------------
// Manifest → form
// ---------------------------------------------------------------------------

/// Convert a manifest into form state
///
/// Testing values start from the defaults of the effective inputs.
#[must_use]
pub fn manifest_to_form(manifest: &Value) -> FormState {
    let values = manifest_to_form_values(manifest);
    let inputs = effective_inputs(&values);
    let testing_values = sync_testing_values(&[], &inputs, &IndexMap::new(), &[]);
    FormState {
        values,
        testing_values,
        placeholders: BTreeSet::new(),
    }
}

/// Convert a manifest into form values
#[must_use]
pub fn manifest_to_form_values(manifest: &Value) -> BuilderFormValues {
    let mut values = BuilderFormValues::default();
    let Some(root) = manifest.as_object() else {
        tracing::warn!("manifest is not an object, starting from an empty form");
        return values;
    };
    let mut hatch = Hatch::new("manifest");
    hatch.extras(root, ROOT_KEYS, "");

    if let Some(version) = root.get("version") {
        match version.as_str() {
            Some(v) => v.clone_into(&mut values.version),
            None => hatch.keep("/version", version, &Unsupported("not a string".into())),
        }
    }
    if let Some(kind) = root.get("type") {
        if kind.as_str() != Some("DeclarativeSource") {
            hatch.keep("/type", kind, &Unsupported("not a DeclarativeSource".into()));
        }
    }

    let raw_streams: &[Value] = match root.get("streams") {
        Some(Value::Array(items)) => items,
        Some(other) => {
            hatch.keep("/streams", other, &Unsupported("streams is not a list".into()));
            &[]
        }
        None => &[],
    };

    let requester = raw_streams.iter().find_map(http_requester);
    if let Some(url) = requester.and_then(|r| r.get("url_base")).and_then(Value::as_str) {
        url.clone_into(&mut values.global.url_base);
    }
    if let Some(auth) = requester.and_then(|r| r.get("authenticator")) {
        values.global.authenticator = authenticator_to_form(auth);
    }

    let ctx = Context {
        raw_streams,
        url_base: Value::String(values.global.url_base.clone()),
        authenticator: authenticator_to_manifest(&values.global.authenticator),
    };
    values.streams = raw_streams
        .iter()
        .enumerate()
        .map(|(index, raw)| stream_to_form(index, raw, &ctx))
        .collect();

    if let Some(check) = root.get("check") {
        let result = check_to_form(check);
        if let Some(names) = hatch.section("/check", check, result) {
            values.check_streams = names;
        }
    }

    if let Some(spec) = root.get("spec") {
        let result = spec_to_form(spec, &values, &mut hatch);
        if let Some((inputs, overrides)) = hatch.section("/spec", spec, result) {
            values.inputs = inputs;
            values.inferred_input_overrides = overrides;
        }
    }

    values.unmodeled = hatch.entries;
    tracing::debug!(
        streams = values.streams.len(),
        inputs = values.inputs.len(),
        unmodeled = values.unmodeled.len(),
        "manifest converted to form"
    );
    values
}

fn http_requester(stream: &Value) -> Option<&Map<String, Value>> {
    let retriever = stream.get("retriever")?.as_object()?;
    if tag_of(retriever) != Some("SimpleRetriever") {
        return None;
    }
    let requester = retriever.get("requester")?.as_object()?;
    (tag_of(requester) == Some("HttpRequester")).then_some(requester)
}

fn check_to_form(raw: &Value) -> Convert<Vec<String>> {
    let map = object(raw, "CheckStream")?;
    only_keys(map, &["type", "stream_names"])?;
    Ok(map
        .get("stream_names")
        .map(string_list)
        .transpose()?
        .unwrap_or_default())
}

fn spec_to_form(
    raw: &Value,
    values: &BuilderFormValues,
    hatch: &mut Hatch<'_>,
) -> Convert<(Vec<InputDefinition>, IndexMap<String, Value>)> {
    let map = object(raw, "Spec")?;
    hatch.extras(map, SPEC_KEYS, "/spec");
    let mut inputs = Vec::new();
    let mut overrides = IndexMap::new();
    let Some(connection) = map.get("connection_specification") else {
        return Ok((inputs, overrides));
    };
    let connection = connection
        .as_object()
        .ok_or_else(|| Unsupported("connection_specification is not an object".into()))?;
    hatch.extras(connection, CONNECTION_SPEC_KEYS, "/spec/connection_specification");

    let required = connection
        .get("required")
        .map(string_list)
        .transpose()?
        .unwrap_or_default();
    let properties = match connection.get("properties") {
        None => return Ok((inputs, overrides)),
        Some(Value::Object(properties)) => properties,
        Some(_) => return unsupported("properties is not an object"),
    };

    let inferred = inferred_keys(values);
    for (key, property) in properties {
        if inferred.contains(&key.as_str()) {
            if *property != inferred_definition(key).to_property() {
                overrides.insert(key.clone(), property.clone());
            }
        } else {
            inputs.push(InputDefinition::from_property(key, property, required.contains(key)));
        }
    }
    Ok((inputs, overrides))
}

fn stream_to_form(index: usize, raw: &Value, ctx: &Context<'_>) -> BuilderStream {
    let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
    let mut stream = BuilderStream::new(index.to_string(), name);
    let mut hatch = Hatch::new(name);

    let map = match object(raw, "DeclarativeStream") {
        Ok(map) => map,
        Err(reason) => {
            hatch.keep("", raw, &reason);
            stream.unmodeled = hatch.entries;
            return stream;
        }
    };
    hatch.extras(map, STREAM_KEYS, "");

    if let Some(name) = map.get("name").filter(|n| !n.is_string()) {
        hatch.keep("/name", name, &Unsupported("name is not a string".into()));
    }
    if let Some(pk) = map.get("primary_key") {
        let result = primary_key_to_form(pk);
        if let Some(pk) = hatch.section("/primary_key", pk, result) {
            stream.primary_key = pk;
        }
    }
    if let Some(retriever) = map.get("retriever") {
        retriever_to_form(retriever, &mut stream, &mut hatch, ctx, index);
    }
    if let Some(sync) = map.get("incremental_sync") {
        let result = incremental_to_form(sync, &mut hatch);
        stream.incremental_sync = hatch.section("/incremental_sync", sync, result);
    }
    if let Some(loader) = map.get("schema_loader") {
        let result = schema_loader_to_form(loader);
        stream.schema = hatch.section("/schema_loader", loader, result).flatten();
    }
    if let Some(transformations) = map.get("transformations") {
        let result = transformations_to_form(transformations);
        stream.transformations = hatch.section("/transformations", transformations, result);
    }

    stream.unmodeled = hatch.entries;
    stream
}

fn primary_key_to_form(raw: &Value) -> Convert<Vec<String>> {
    match raw {
        Value::String(key) => Ok(vec![key.clone()]),
        Value::Array(_) => string_list(raw),
        _ => unsupported("composite primary key"),
    }
}

fn retriever_to_form(
    raw: &Value,
    stream: &mut BuilderStream,
    hatch: &mut Hatch<'_>,
    ctx: &Context<'_>,
    index: usize,
) {
    let map = match object(raw, "SimpleRetriever") {
        Ok(map) => map,
        Err(reason) => {
            hatch.keep("/retriever", raw, &reason);
            return;
        }
    };
    hatch.extras(map, RETRIEVER_KEYS, "/retriever");

    if let Some(requester) = map.get("requester") {
        requester_to_form(requester, stream, hatch, ctx);
    }
    if let Some(selector) = map.get("record_selector") {
        let result = record_selector_to_form(selector, hatch);
        if let Some(selector_settings) = hatch.section("/retriever/record_selector", selector, result) {
            stream.record_selector = selector_settings;
        }
    }
    if let Some(paginator) = map.get("paginator") {
        let result = paginator_to_form(paginator, hatch);
        stream.paginator = hatch.section("/retriever/paginator", paginator, result).flatten();
    }
    if let Some(router) = map.get("partition_router") {
        let result = partition_router_to_form(router, ctx, index);
        if let Some((params, parents)) = hatch.section("/retriever/partition_router", router, result) {
            stream.parameterized_requests = (!params.is_empty()).then_some(params);
            stream.parent_streams = (!parents.is_empty()).then_some(parents);
        }
    }
    if let Some(decoder) = map.get("decoder") {
        let result = decoder_to_form(decoder);
        if let Some(decoder) = hatch.section("/retriever/decoder", decoder, result) {
            stream.decoder = decoder;
        }
    }
}

fn requester_to_form(raw: &Value, stream: &mut BuilderStream, hatch: &mut Hatch<'_>, ctx: &Context<'_>) {
    let map = match object(raw, "HttpRequester") {
        Ok(map) => map,
        Err(reason) => {
            hatch.keep(REQUESTER, raw, &reason);
            return;
        }
    };
    hatch.extras(map, REQUESTER_KEYS, REQUESTER);

    if let Some(url_base) = map.get("url_base").filter(|u| **u != ctx.url_base) {
        hatch.keep(
            &child_pointer(REQUESTER, "url_base"),
            url_base,
            &Unsupported("differs from the connector url_base".into()),
        );
    }
    match map.get("path") {
        Some(Value::String(path)) => path.clone_into(&mut stream.url_path),
        Some(other) => hatch.keep(&child_pointer(REQUESTER, "path"), other, &Unsupported("path is not a string".into())),
        None => {}
    }
    match map.get("http_method").map(|m| (m, m.as_str())) {
        Some((_, Some("GET"))) | None => stream.http_method = HttpMethod::Get,
        Some((_, Some("POST"))) => stream.http_method = HttpMethod::Post,
        Some((other, _)) => hatch.keep(
            &child_pointer(REQUESTER, "http_method"),
            other,
            &Unsupported("unsupported http method".into()),
        ),
    }

    let auth_pointer = child_pointer(REQUESTER, "authenticator");
    match (map.get("authenticator"), &ctx.authenticator) {
        (Some(auth), Some(global)) if auth == global => {}
        (None, None) => {}
        (Some(auth), _) => hatch.keep(
            &auth_pointer,
            auth,
            &Unsupported("differs from the connector authenticator".into()),
        ),
        (None, Some(_)) => hatch.keep(
            &auth_pointer,
            &Value::Null,
            &Unsupported("stream has no authenticator".into()),
        ),
    }

    for (key, target) in [
        ("request_parameters", &mut stream.request_options.request_parameters),
        ("request_headers", &mut stream.request_options.request_headers),
    ] {
        if let Some(raw_values) = map.get(key) {
            match key_values(raw_values) {
                Some(list) => *target = list,
                None => hatch.keep(
                    &child_pointer(REQUESTER, key),
                    raw_values,
                    &Unsupported("non-string values".into()),
                ),
            }
        }
    }

    request_body_to_form(map, &mut stream.request_options, hatch);

    if let Some(handler) = map.get("error_handler") {
        let result = error_handler_to_form(handler);
        stream.error_handler = hatch.section(&child_pointer(REQUESTER, "error_handler"), handler, result);
    }
}

fn request_body_to_form(map: &Map<String, Value>, options: &mut RequestOptions, hatch: &mut Hatch<'_>) {
    let json_pointer = child_pointer(REQUESTER, "request_body_json");
    let data_pointer = child_pointer(REQUESTER, "request_body_data");
    match (map.get("request_body_json"), map.get("request_body_data")) {
        (Some(body), Some(data)) => {
            let reason = Unsupported("both json and data bodies are set".into());
            hatch.keep(&json_pointer, body, &reason);
            hatch.keep(&data_pointer, data, &reason);
        }
        (Some(body), None) => {
            if let Some(values) = key_values(body) {
                options.request_body = RequestBody::JsonList { values };
            } else if body.is_object() {
                match format_json(body, false) {
                    Ok(value) => options.request_body = RequestBody::JsonFreeform { value },
                    Err(err) => hatch.keep(&json_pointer, body, &Unsupported(err.to_string())),
                }
            } else {
                hatch.keep(&json_pointer, body, &Unsupported("json body is not an object".into()));
            }
        }
        (None, Some(data)) => match data {
            Value::String(value) => {
                options.request_body = RequestBody::StringFreeform { value: value.clone() };
            }
            other => match key_values(other) {
                Some(values) => options.request_body = RequestBody::FormList { values },
                None => hatch.keep(&data_pointer, other, &Unsupported("data body has nested values".into())),
            },
        },
        (None, None) => {}
    }
}

fn error_handler_to_form(raw: &Value) -> Convert<Vec<BuilderErrorHandler>> {
    let map = raw
        .as_object()
        .ok_or_else(|| Unsupported("error handler is not an object".into()))?;
    match tag_of(map) {
        Some("DefaultErrorHandler") => Ok(vec![default_error_handler_to_form(map)?]),
        Some("CompositeErrorHandler") => {
            only_keys(map, &["type", "error_handlers"])?;
            map.get("error_handlers")
                .and_then(Value::as_array)
                .ok_or_else(|| Unsupported("error_handlers is not a list".into()))?
                .iter()
                .map(|handler| default_error_handler_to_form(object(handler, "DefaultErrorHandler")?))
                .collect()
        }
        other => unsupported(format!("error handler {}", other.unwrap_or("without type"))),
    }
}

fn default_error_handler_to_form(map: &Map<String, Value>) -> Convert<BuilderErrorHandler> {
    only_keys(map, &["type", "max_retries", "backoff_strategies", "response_filters"])?;
    let max_retries = match map.get("max_retries") {
        None => None,
        Some(value) => Some(
            value
                .as_u64()
                .ok_or_else(|| Unsupported("max_retries is not an integer".into()))?,
        ),
    };
    Ok(BuilderErrorHandler {
        max_retries,
        backoff_strategy: at_most_one(map, "backoff_strategies")?
            .map(backoff_to_form)
            .transpose()?,
        response_filter: at_most_one(map, "response_filters")?
            .map(response_filter_to_form)
            .transpose()?,
    })
}

fn at_most_one<'a>(map: &'a Map<String, Value>, key: &str) -> Convert<Option<&'a Value>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::Array(items)) if items.len() <= 1 => Ok(items.first()),
        Some(_) => unsupported(format!("more than one entry in {key}")),
    }
}

fn backoff_to_form(raw: &Value) -> Convert<BackoffStrategy> {
    let map = raw
        .as_object()
        .ok_or_else(|| Unsupported("backoff strategy is not an object".into()))?;
    let (allowed, required): (&[&str], &[&str]) = match tag_of(map) {
        Some("ConstantBackoffStrategy") => (&["type", "backoff_time_in_seconds"], &["backoff_time_in_seconds"]),
        Some("ExponentialBackoffStrategy") => (&["type", "factor"], &[]),
        Some("WaitTimeFromHeader") => (&["type", "header", "regex", "max_waiting_time_in_seconds"], &["header"]),
        Some("WaitUntilTimeFromHeader") => (&["type", "header", "regex", "min_wait"], &["header"]),
        other => return unsupported(format!("backoff strategy {}", other.unwrap_or("without type"))),
    };
    only_keys(map, allowed)?;
    require_keys(map, required)?;
    from_json(raw.clone())
}

fn response_filter_to_form(raw: &Value) -> Convert<ResponseFilter> {
    let map = object(raw, "HttpResponseFilter")?;
    only_keys(
        map,
        &["type", "action", "error_message", "error_message_contains", "http_codes", "predicate"],
    )?;
    let http_codes = match map.get("http_codes") {
        None => None,
        Some(Value::Array(codes)) => Some(
            codes
                .iter()
                .map(|code| code.as_u64().map(|c| c.to_string()))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| Unsupported("http_codes are not integers".into()))?,
        ),
        Some(_) => return unsupported("http_codes is not a list"),
    };
    Ok(ResponseFilter {
        action: opt_string(map, "action")?,
        error_message: opt_string(map, "error_message")?,
        error_message_contains: opt_string(map, "error_message_contains")?,
        http_codes,
        predicate: opt_string(map, "predicate")?,
    })
}

fn record_selector_to_form(raw: &Value, hatch: &mut Hatch<'_>) -> Convert<RecordSelectorSettings> {
    const POINTER: &str = "/retriever/record_selector";
    let map = object(raw, "RecordSelector")?;
    hatch.extras(map, RECORD_SELECTOR_KEYS, POINTER);
    let mut selector = RecordSelectorSettings::default();

    let extractor = map
        .get("extractor")
        .ok_or_else(|| Unsupported("record selector has no extractor".into()))?;
    match dpath_extractor_to_form(extractor) {
        Ok(path) => selector.field_path = path,
        Err(reason) => hatch.keep(&child_pointer(POINTER, "extractor"), extractor, &reason),
    }

    if let Some(filter) = map.get("record_filter") {
        let condition = object(filter, "RecordFilter")
            .and_then(|f| only_keys(f, &["type", "condition"]).map(|()| f))
            .and_then(|f| required_string(f, "condition"));
        match condition {
            Ok(condition) => selector.filter_condition = Some(condition),
            Err(reason) => hatch.keep(&child_pointer(POINTER, "record_filter"), filter, &reason),
        }
    }

    match map.get("schema_normalization") {
        None => {}
        Some(value) => match value.as_str() {
            Some("Default") => selector.normalize_to_schema = true,
            Some("None") => selector.normalize_to_schema = false,
            _ => hatch.keep(
                &child_pointer(POINTER, "schema_normalization"),
                value,
                &Unsupported("unknown schema normalization".into()),
            ),
        },
    }
    Ok(selector)
}

fn dpath_extractor_to_form(raw: &Value) -> Convert<Vec<String>> {
    let map = object(raw, "DpathExtractor")?;
    only_keys(map, &["type", "field_path"])?;
    string_list(
        map.get("field_path")
            .ok_or_else(|| Unsupported("extractor has no field_path".into()))?,
    )
}

fn paginator_to_form(raw: &Value, hatch: &mut Hatch<'_>) -> Convert<Option<BuilderPaginator>> {
    let map = raw
        .as_object()
        .ok_or_else(|| Unsupported("paginator is not an object".into()))?;
    match tag_of(map) {
        Some("NoPagination") => {
            only_keys(map, &["type"])?;
            Ok(None)
        }
        Some("DefaultPaginator") => {
            hatch.extras(map, PAGINATOR_KEYS, "/retriever/paginator");
            let strategy = pagination_strategy_to_form(
                map.get("pagination_strategy")
                    .ok_or_else(|| Unsupported("paginator has no strategy".into()))?,
            )?;
            let page_token_option = page_token_to_form(
                map.get("page_token_option")
                    .ok_or_else(|| Unsupported("paginator has no page_token_option".into()))?,
            )?;
            let page_size_option = map
                .get("page_size_option")
                .map(request_option_to_form)
                .transpose()?;
            Ok(Some(BuilderPaginator {
                strategy,
                page_token_option,
                page_size_option,
            }))
        }
        other => unsupported(format!("paginator {}", other.unwrap_or("without type"))),
    }
}

fn pagination_strategy_to_form(raw: &Value) -> Convert<PaginationStrategy> {
    let map = raw
        .as_object()
        .ok_or_else(|| Unsupported("pagination strategy is not an object".into()))?;
    let (allowed, required): (&[&str], &[&str]) = match tag_of(map) {
        Some("OffsetIncrement") => (&["type", "page_size", "inject_on_first_request"], &[]),
        Some("PageIncrement") => (
            &["type", "page_size", "start_from_page", "inject_on_first_request"],
            &[],
        ),
        Some("CursorPagination") => (
            &["type", "cursor_value", "stop_condition", "page_size"],
            &["cursor_value"],
        ),
        other => return unsupported(format!("pagination strategy {}", other.unwrap_or("without type"))),
    };
    only_keys(map, allowed)?;
    require_keys(map, required)?;
    from_json(raw.clone())
}

fn page_token_to_form(raw: &Value) -> Convert<PageTokenOption> {
    match raw.as_object().and_then(tag_of) {
        Some("RequestPath") => {
            only_keys(object(raw, "RequestPath")?, &["type"])?;
            Ok(PageTokenOption::Path)
        }
        _ => {
            let option = request_option_to_form(raw)?;
            Ok(PageTokenOption::injected(option.inject_into, option.field_name))
        }
    }
}

fn partition_router_to_form(
    raw: &Value,
    ctx: &Context<'_>,
    own_index: usize,
) -> Convert<(Vec<ParameterizedRequest>, Vec<ParentStreamReference>)> {
    let routers: Vec<&Value> = match raw {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut params = Vec::new();
    let mut parents = Vec::new();
    for router in routers {
        let map = router
            .as_object()
            .ok_or_else(|| Unsupported("partition router is not an object".into()))?;
        match tag_of(map) {
            Some("ListPartitionRouter") => params.push(list_router_to_form(map)?),
            Some("SubstreamPartitionRouter") => {
                only_keys(map, &["type", "parent_stream_configs"])?;
                let configs = map
                    .get("parent_stream_configs")
                    .and_then(Value::as_array)
                    .ok_or_else(|| Unsupported("parent_stream_configs is not a list".into()))?;
                for config in configs {
                    parents.push(parent_config_to_form(config, ctx, own_index)?);
                }
            }
            other => return unsupported(format!("partition router {}", other.unwrap_or("without type"))),
        }
    }
    Ok((params, parents))
}

fn list_router_to_form(map: &Map<String, Value>) -> Convert<ParameterizedRequest> {
    only_keys(map, &["type", "cursor_field", "values", "request_option"])?;
    let values = match map.get("values") {
        Some(Value::String(value)) => ParameterizedValues::Variable { value: value.clone() },
        Some(list) => ParameterizedValues::List {
            value: string_list(list)?,
        },
        None => return unsupported("list router has no values"),
    };
    Ok(ParameterizedRequest {
        cursor_field: required_string(map, "cursor_field")?,
        values,
        request_option: map
            .get("request_option")
            .map(request_option_to_form)
            .transpose()?,
    })
}

fn parent_config_to_form(raw: &Value, ctx: &Context<'_>, own_index: usize) -> Convert<ParentStreamReference> {
    let map = object(raw, "ParentStreamConfig")?;
    only_keys(
        map,
        &["type", "parent_key", "partition_field", "stream", "request_option", "incremental_dependency"],
    )?;
    let parent = map
        .get("stream")
        .ok_or_else(|| Unsupported("parent config has no stream".into()))?;
    let parent_index = ctx
        .raw_streams
        .iter()
        .position(|candidate| candidate == parent)
        .filter(|index| *index != own_index)
        .ok_or_else(|| Unsupported("parent stream is not another stream of the connector".into()))?;
    let incremental_dependency = match map.get("incremental_dependency") {
        None => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => return unsupported("incremental_dependency is not a boolean"),
    };
    Ok(ParentStreamReference {
        parent_key: required_string(map, "parent_key")?,
        partition_field: required_string(map, "partition_field")?,
        parent_stream_reference: parent_index.to_string(),
        request_option: map
            .get("request_option")
            .map(request_option_to_form)
            .transpose()?,
        incremental_dependency,
    })
}

fn decoder_to_form(raw: &Value) -> Convert<Decoder> {
    let map = raw
        .as_object()
        .ok_or_else(|| Unsupported("decoder is not an object".into()))?;
    only_keys(map, &["type"])?;
    tag_of(map)
        .and_then(Decoder::from_tag)
        .ok_or_else(|| Unsupported("unmodeled decoder".into()))
}

fn incremental_to_form(raw: &Value, hatch: &mut Hatch<'_>) -> Convert<BuilderIncrementalSync> {
    let map = object(raw, "DatetimeBasedCursor")?;
    hatch.extras(map, INCREMENTAL_KEYS, "/incremental_sync");

    let datetime_format = opt_string(map, "datetime_format")?;
    let cursor_format = datetime_format.as_deref();
    let start_datetime = datetime_to_form(
        map.get("start_datetime")
            .ok_or_else(|| Unsupported("cursor has no start_datetime".into()))?,
        cursor_format,
        DatetimeBound::Start,
        hatch,
        "/incremental_sync/start_datetime",
    )?;
    let end_datetime = match map.get("end_datetime") {
        Some(end) => Some(datetime_to_form(
            end,
            cursor_format,
            DatetimeBound::End,
            hatch,
            "/incremental_sync/end_datetime",
        )?),
        None => None,
    };
    let is_data_feed = match map.get("is_data_feed") {
        None => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => return unsupported("is_data_feed is not a boolean"),
    };

    Ok(BuilderIncrementalSync {
        cursor_field: required_string(map, "cursor_field")?,
        cursor_datetime_formats: map
            .get("cursor_datetime_formats")
            .map(string_list)
            .transpose()?
            .unwrap_or_default(),
        start_datetime,
        end_datetime,
        start_time_option: map
            .get("start_time_option")
            .map(request_option_to_form)
            .transpose()?,
        end_time_option: map
            .get("end_time_option")
            .map(request_option_to_form)
            .transpose()?,
        step: opt_string(map, "step")?,
        cursor_granularity: opt_string(map, "cursor_granularity")?,
        lookback_window: opt_string(map, "lookback_window")?,
        is_data_feed,
        datetime_format,
    })
}

fn datetime_to_form(
    raw: &Value,
    cursor_format: Option<&str>,
    bound: DatetimeBound,
    hatch: &mut Hatch<'_>,
    pointer: &str,
) -> Convert<DatetimeValue> {
    match raw {
        Value::String(datetime) => Ok(classify_datetime(datetime, cursor_format, bound).unwrap_or_else(|| {
            DatetimeValue::Custom {
                value: datetime.clone(),
                format: None,
            }
        })),
        Value::Object(map) if tag_of(map) == Some("MinMaxDatetime") => {
            hatch.extras(map, MIN_MAX_DATETIME_KEYS, pointer);
            let datetime = required_string(map, "datetime")?;
            let format = opt_string(map, "datetime_format")?
                .or_else(|| cursor_format.map(str::to_string))
                .unwrap_or_else(|| USER_INPUT_DATE_FORMAT.to_string());
            Ok(classify_datetime(&datetime, Some(&format), bound).unwrap_or(DatetimeValue::Custom {
                value: datetime,
                format: Some(format),
            }))
        }
        _ => unsupported("datetime is neither a string nor a MinMaxDatetime"),
    }
}

fn classify_datetime(datetime: &str, format: Option<&str>, bound: DatetimeBound) -> Option<DatetimeValue> {
    if format != Some(USER_INPUT_DATE_FORMAT) {
        return None;
    }
    if datetime == config_reference(bound.config_key()) {
        Some(DatetimeValue::UserInput)
    } else if datetime == NOW_EXPRESSION {
        Some(DatetimeValue::Now)
    } else {
        None
    }
}

fn schema_loader_to_form(raw: &Value) -> Convert<Option<String>> {
    let map = object(raw, "InlineSchemaLoader")?;
    only_keys(map, &["type", "schema"])?;
    map.get("schema")
        .map(|schema| format_json(schema, true).map_err(|e| Unsupported(e.to_string())))
        .transpose()
}

fn transformations_to_form(raw: &Value) -> Convert<Vec<BuilderTransformation>> {
    raw.as_array()
        .ok_or_else(|| Unsupported("transformations is not a list".into()))?
        .iter()
        .map(transformation_to_form)
        .collect()
}

fn transformation_to_form(raw: &Value) -> Convert<BuilderTransformation> {
    let map = raw
        .as_object()
        .ok_or_else(|| Unsupported("transformation is not an object".into()))?;
    match tag_of(map) {
        Some("AddFields") => {
            only_keys(map, &["type", "fields"])?;
            let fields = map
                .get("fields")
                .and_then(Value::as_array)
                .ok_or_else(|| Unsupported("fields is not a list".into()))?
                .iter()
                .map(|field| {
                    let field = object(field, "AddedFieldDefinition")?;
                    only_keys(field, &["type", "path", "value"])?;
                    Ok(AddedField {
                        path: string_list(
                            field
                                .get("path")
                                .ok_or_else(|| Unsupported("added field has no path".into()))?,
                        )?,
                        value: required_string(field, "value")?,
                    })
                })
                .collect::<Convert<Vec<_>>>()?;
            Ok(BuilderTransformation::AddFields { fields })
        }
        Some("RemoveFields") => {
            only_keys(map, &["type", "field_pointers"])?;
            let field_pointers = map
                .get("field_pointers")
                .and_then(Value::as_array)
                .ok_or_else(|| Unsupported("field_pointers is not a list".into()))?
                .iter()
                .map(string_list)
                .collect::<Convert<Vec<_>>>()?;
            Ok(BuilderTransformation::RemoveFields { field_pointers })
        }
        other => unsupported(format!("transformation {}", other.unwrap_or("without type"))),
    }
}

fn authenticator_to_form(raw: &Value) -> Authenticator {
    match modeled_authenticator(raw) {
        Ok(auth) => Authenticator::Modeled(auth),
        Err(reason) => {
            tracing::warn!(reason = %reason.0, "authenticator kept verbatim");
            Authenticator::Unmodeled(raw.clone())
        }
    }
}

fn modeled_authenticator(raw: &Value) -> Convert<BuilderAuthenticator> {
    let map = raw
        .as_object()
        .ok_or_else(|| Unsupported("authenticator is not an object".into()))?;
    let auth = match tag_of(map) {
        Some("NoAuth") => {
            only_keys(map, &["type"])?;
            BuilderAuthenticator::NoAuth
        }
        Some("ApiKeyAuthenticator") => {
            only_keys(map, &["type", "api_token", "inject_into"])?;
            BuilderAuthenticator::ApiKeyAuthenticator {
                api_token: required_string(map, "api_token")?,
                inject_into: request_option_to_form(
                    map.get("inject_into")
                        .ok_or_else(|| Unsupported("api key has no inject_into".into()))?,
                )?,
            }
        }
        Some("BearerAuthenticator") => {
            only_keys(map, &["type", "api_token"])?;
            BuilderAuthenticator::BearerAuthenticator {
                api_token: required_string(map, "api_token")?,
            }
        }
        Some("BasicHttpAuthenticator") => {
            only_keys(map, &["type", "username", "password"])?;
            BuilderAuthenticator::BasicHttpAuthenticator {
                username: required_string(map, "username")?,
                password: required_string(map, "password")?,
            }
        }
        Some("OAuthAuthenticator") => BuilderAuthenticator::OAuthAuthenticator(oauth_to_form(map)?),
        other => return unsupported(format!("authenticator {}", other.unwrap_or("without type"))),
    };

    let form = serde_json::to_value(&auth).map_err(|e| Unsupported(e.to_string()))?;
    for field in auth_inferred_fields(&auth) {
        if form.get(field.field).and_then(Value::as_str) != Some(field.reference().as_str()) {
            return unsupported(format!("{} does not read config['{}']", field.field, field.key));
        }
    }
    Ok(auth)
}

fn oauth_to_form(map: &Map<String, Value>) -> Convert<OAuthSettings> {
    only_keys(map, OAUTH_KEYS)?;
    let mut raw = map.clone();
    if let Some(body) = map.get("refresh_request_body") {
        let list = key_values(body)
            .ok_or_else(|| Unsupported("refresh_request_body has non-string values".into()))?;
        raw.insert("refresh_request_body".to_string(), key_value_rows(&list));
    }
    if let Some(updater) = map.get("refresh_token_updater") {
        let updater = updater
            .as_object()
            .ok_or_else(|| Unsupported("refresh_token_updater is not an object".into()))?;
        only_keys(updater, REFRESH_TOKEN_UPDATER_KEYS)?;
    }
    from_json(Value::Object(raw))
}

fn request_option_to_form(raw: &Value) -> Convert<RequestOption> {
    let map = object(raw, "RequestOption")?;
    only_keys(map, REQUEST_OPTION_KEYS)?;
    let inject_into = map
        .get("inject_into")
        .and_then(Value::as_str)
        .and_then(InjectInto::from_manifest)
        .ok_or_else(|| Unsupported("unknown inject_into".into()))?;
    Ok(RequestOption {
        inject_into,
        field_name: required_string(map, "field_name")?,
    })
}

// ---------------------------------------------------------------------------
// Form → manifest
// ---------------------------------------------------------------------------

/// Derive the manifest for form values
#[must_use]
pub fn form_to_manifest(values: &BuilderFormValues) -> Value {
    let mut root = Map::new();
    let version = if values.version.is_empty() {
        DEFAULT_MANIFEST_VERSION
    } else {
        values.version.as_str()
    };
    put(&mut root, "version", version);
    put(&mut root, "type", "DeclarativeSource");
    put(
        &mut root,
        "check",
        json!({"type": "CheckStream", "stream_names": values.check_streams}),
    );

    let mut visiting = Vec::new();
    let streams: Vec<Value> = values
        .streams
        .iter()
        .map(|stream| stream_to_manifest(values, stream, &mut visiting))
        .collect();
    put(&mut root, "streams", streams);

    if let Some(spec) = spec_to_manifest(values) {
        put(&mut root, "spec", spec);
    }

    let mut manifest = Value::Object(root);
    overlay(&mut manifest, &values.unmodeled);
    manifest
}

fn spec_to_manifest(values: &BuilderFormValues) -> Option<Value> {
    let inferred = inferred_keys(values);
    if values.inputs.is_empty() && inferred.is_empty() {
        return None;
    }
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();
    for input in &values.inputs {
        properties.insert(input.key.clone(), input.to_property());
        if input.required {
            required.push(input.key.clone());
        }
    }
    for key in inferred {
        properties.insert(key.to_string(), inferred_property(values, key));
        required.push(key.to_string());
    }
    Some(json!({
        "type": "Spec",
        "connection_specification": {
            "$schema": JSON_SCHEMA_DRAFT_7,
            "type": "object",
            "required": required,
            "properties": properties,
            "additionalProperties": true
        }
    }))
}

fn stream_to_manifest(values: &BuilderFormValues, stream: &BuilderStream, visiting: &mut Vec<String>) -> Value {
    visiting.push(stream.id.clone());

    let mut requester = Map::new();
    put(&mut requester, "type", "HttpRequester");
    put(&mut requester, "url_base", values.global.url_base.as_str());
    if !stream.url_path.is_empty() {
        put(&mut requester, "path", stream.url_path.as_str());
    }
    put(&mut requester, "http_method", stream.http_method.as_str());
    if let Some(auth) = authenticator_to_manifest(&values.global.authenticator) {
        put(&mut requester, "authenticator", auth);
    }
    let options = &stream.request_options;
    if !options.request_parameters.is_empty() {
        put(&mut requester, "request_parameters", key_values_to_object(&options.request_parameters));
    }
    if !options.request_headers.is_empty() {
        put(&mut requester, "request_headers", key_values_to_object(&options.request_headers));
    }
    request_body_to_manifest(&options.request_body, &mut requester);
    if let Some(handler) = stream.error_handler.as_deref().and_then(error_handlers_to_manifest) {
        put(&mut requester, "error_handler", handler);
    }

    let mut retriever = Map::new();
    put(&mut retriever, "type", "SimpleRetriever");
    put(&mut retriever, "requester", requester);
    put(&mut retriever, "record_selector", record_selector_to_manifest(&stream.record_selector));
    if let Some(paginator) = &stream.paginator {
        put(&mut retriever, "paginator", paginator_to_manifest(paginator));
    }
    if let Some(router) = partition_router_to_manifest(values, stream, visiting) {
        put(&mut retriever, "partition_router", router);
    }
    if stream.decoder != Decoder::JsonDecoder {
        put(&mut retriever, "decoder", json!({"type": stream.decoder.tag()}));
    }

    let mut map = Map::new();
    put(&mut map, "type", "DeclarativeStream");
    put(&mut map, "name", stream.name.as_str());
    match stream.primary_key.as_slice() {
        [] => {}
        [single] => put(&mut map, "primary_key", single.as_str()),
        many => put(&mut map, "primary_key", many.to_vec()),
    }
    put(&mut map, "retriever", retriever);
    if let Some(sync) = &stream.incremental_sync {
        put(&mut map, "incremental_sync", incremental_to_manifest(sync));
    }
    if let Some(schema) = stream
        .schema
        .as_deref()
        .and_then(|text| serde_json::from_str::<Value>(text).ok())
    {
        put(&mut map, "schema_loader", json!({"type": "InlineSchemaLoader", "schema": schema}));
    }
    if let Some(transformations) = stream.transformations.as_deref().filter(|t| !t.is_empty()) {
        let items: Vec<Value> = transformations.iter().map(transformation_to_manifest).collect();
        put(&mut map, "transformations", items);
    }

    let mut value = Value::Object(map);
    overlay(&mut value, &stream.unmodeled);
    visiting.pop();
    value
}

fn request_body_to_manifest(body: &RequestBody, requester: &mut Map<String, Value>) {
    match body {
        RequestBody::JsonList { values } if !values.is_empty() => {
            put(requester, "request_body_json", key_values_to_object(values));
        }
        RequestBody::FormList { values } if !values.is_empty() => {
            put(requester, "request_body_data", key_values_to_object(values));
        }
        RequestBody::JsonFreeform { value } if !value.trim().is_empty() => {
            let body = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.clone()));
            put(requester, "request_body_json", body);
        }
        RequestBody::StringFreeform { value } if !value.is_empty() => {
            put(requester, "request_body_data", value.as_str());
        }
        _ => {}
    }
}

fn error_handlers_to_manifest(handlers: &[BuilderErrorHandler]) -> Option<Value> {
    match handlers {
        [] => None,
        [single] => Some(default_error_handler_to_manifest(single)),
        many => Some(json!({
            "type": "CompositeErrorHandler",
            "error_handlers": many.iter().map(default_error_handler_to_manifest).collect::<Vec<_>>()
        })),
    }
}

fn default_error_handler_to_manifest(handler: &BuilderErrorHandler) -> Value {
    let mut map = Map::new();
    put(&mut map, "type", "DefaultErrorHandler");
    if let Some(retries) = handler.max_retries {
        put(&mut map, "max_retries", retries);
    }
    if let Some(strategy) = &handler.backoff_strategy {
        put(&mut map, "backoff_strategies", vec![to_json(strategy)]);
    }
    if let Some(filter) = &handler.response_filter {
        let mut filter_map = Map::new();
        put(&mut filter_map, "type", "HttpResponseFilter");
        let optional = [
            ("action", &filter.action),
            ("error_message", &filter.error_message),
            ("error_message_contains", &filter.error_message_contains),
            ("predicate", &filter.predicate),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                put(&mut filter_map, key, value.as_str());
            }
        }
        if let Some(codes) = &filter.http_codes {
            let codes: Vec<Value> = codes
                .iter()
                .map(|code| {
                    code.trim()
                        .parse::<u64>()
                        .map_or_else(|_| Value::String(code.clone()), Value::from)
                })
                .collect();
            put(&mut filter_map, "http_codes", codes);
        }
        put(&mut map, "response_filters", vec![Value::Object(filter_map)]);
    }
    Value::Object(map)
}

fn record_selector_to_manifest(selector: &RecordSelectorSettings) -> Value {
    let mut map = Map::new();
    put(&mut map, "type", "RecordSelector");
    put(
        &mut map,
        "extractor",
        json!({"type": "DpathExtractor", "field_path": selector.field_path}),
    );
    if let Some(condition) = &selector.filter_condition {
        put(&mut map, "record_filter", json!({"type": "RecordFilter", "condition": condition}));
    }
    if selector.normalize_to_schema {
        put(&mut map, "schema_normalization", "Default");
    }
    Value::Object(map)
}

fn paginator_to_manifest(paginator: &BuilderPaginator) -> Value {
    let mut map = Map::new();
    put(&mut map, "type", "DefaultPaginator");
    put(&mut map, "pagination_strategy", to_json(&paginator.strategy));
    let page_token = match paginator.page_token_option.as_request_option() {
        None => json!({"type": "RequestPath"}),
        Some((inject_into, field_name)) => request_option_to_manifest(&RequestOption {
            inject_into,
            field_name: field_name.to_string(),
        }),
    };
    put(&mut map, "page_token_option", page_token);
    if let Some(option) = paginator
        .page_size_option
        .as_ref()
        .filter(|_| paginator.strategy.has_page_size())
    {
        put(&mut map, "page_size_option", request_option_to_manifest(option));
    }
    Value::Object(map)
}

fn partition_router_to_manifest(
    values: &BuilderFormValues,
    stream: &BuilderStream,
    visiting: &mut Vec<String>,
) -> Option<Value> {
    let mut routers: Vec<Value> = Vec::new();
    for request in stream.parameterized_requests.iter().flatten() {
        let mut map = Map::new();
        put(&mut map, "type", "ListPartitionRouter");
        put(&mut map, "cursor_field", request.cursor_field.as_str());
        match &request.values {
            ParameterizedValues::List { value } => put(&mut map, "values", value.clone()),
            ParameterizedValues::Variable { value } => put(&mut map, "values", value.as_str()),
        }
        if let Some(option) = &request.request_option {
            put(&mut map, "request_option", request_option_to_manifest(option));
        }
        routers.push(Value::Object(map));
    }
    for parent in stream.parent_streams.iter().flatten() {
        let parent_stream = match values.stream(&parent.parent_stream_reference) {
            Some(found) if !visiting.contains(&found.id) => stream_to_manifest(values, found, visiting),
            _ => Value::Object(Map::new()),
        };
        let mut config = Map::new();
        put(&mut config, "type", "ParentStreamConfig");
        put(&mut config, "parent_key", parent.parent_key.as_str());
        put(&mut config, "partition_field", parent.partition_field.as_str());
        put(&mut config, "stream", parent_stream);
        if let Some(option) = &parent.request_option {
            put(&mut config, "request_option", request_option_to_manifest(option));
        }
        if let Some(flag) = parent.incremental_dependency {
            put(&mut config, "incremental_dependency", flag);
        }
        routers.push(json!({
            "type": "SubstreamPartitionRouter",
            "parent_stream_configs": [Value::Object(config)]
        }));
    }
    match routers.len() {
        0 => None,
        1 => routers.pop(),
        _ => Some(Value::Array(routers)),
    }
}

fn incremental_to_manifest(sync: &BuilderIncrementalSync) -> Value {
    let mut map = Map::new();
    put(&mut map, "type", "DatetimeBasedCursor");
    put(&mut map, "cursor_field", sync.cursor_field.as_str());
    if let Some(format) = &sync.datetime_format {
        put(&mut map, "datetime_format", format.as_str());
    }
    if !sync.cursor_datetime_formats.is_empty() {
        put(&mut map, "cursor_datetime_formats", sync.cursor_datetime_formats.clone());
    }
    put(
        &mut map,
        "start_datetime",
        datetime_to_manifest(&sync.start_datetime, DatetimeBound::Start),
    );
    if let Some(end) = &sync.end_datetime {
        put(&mut map, "end_datetime", datetime_to_manifest(end, DatetimeBound::End));
    }
    if let Some(option) = &sync.start_time_option {
        put(&mut map, "start_time_option", request_option_to_manifest(option));
    }
    if let Some(option) = &sync.end_time_option {
        put(&mut map, "end_time_option", request_option_to_manifest(option));
    }
    let optional = [
        ("step", &sync.step),
        ("cursor_granularity", &sync.cursor_granularity),
        ("lookback_window", &sync.lookback_window),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            put(&mut map, key, value.as_str());
        }
    }
    if let Some(flag) = sync.is_data_feed {
        put(&mut map, "is_data_feed", flag);
    }
    Value::Object(map)
}

fn datetime_to_manifest(value: &DatetimeValue, bound: DatetimeBound) -> Value {
    let min_max = |datetime: &str, format: &str| {
        json!({"type": "MinMaxDatetime", "datetime": datetime, "datetime_format": format})
    };
    match value {
        DatetimeValue::UserInput => min_max(&config_reference(bound.config_key()), USER_INPUT_DATE_FORMAT),
        DatetimeValue::Now => min_max(NOW_EXPRESSION, USER_INPUT_DATE_FORMAT),
        DatetimeValue::Custom { value, format: None } => Value::String(value.clone()),
        DatetimeValue::Custom {
            value,
            format: Some(format),
        } => min_max(value, format),
    }
}

fn transformation_to_manifest(transformation: &BuilderTransformation) -> Value {
    match transformation {
        BuilderTransformation::AddFields { fields } => json!({
            "type": "AddFields",
            "fields": fields
                .iter()
                .map(|f| json!({"type": "AddedFieldDefinition", "path": f.path, "value": f.value}))
                .collect::<Vec<_>>()
        }),
        BuilderTransformation::RemoveFields { field_pointers } => json!({
            "type": "RemoveFields",
            "field_pointers": field_pointers
        }),
    }
}

/// Manifest form of an authenticator; `None` for no authentication
#[must_use]
pub fn authenticator_to_manifest(auth: &Authenticator) -> Option<Value> {
    let auth = match auth {
        Authenticator::Unmodeled(raw) => return Some(raw.clone()),
        Authenticator::Modeled(auth) => auth,
    };
    let value = match auth {
        BuilderAuthenticator::NoAuth => return None,
        BuilderAuthenticator::ApiKeyAuthenticator { api_token, inject_into } => json!({
            "type": "ApiKeyAuthenticator",
            "api_token": api_token,
            "inject_into": request_option_to_manifest(inject_into)
        }),
        BuilderAuthenticator::BearerAuthenticator { api_token } => {
            json!({"type": "BearerAuthenticator", "api_token": api_token})
        }
        BuilderAuthenticator::BasicHttpAuthenticator { username, password } => json!({
            "type": "BasicHttpAuthenticator",
            "username": username,
            "password": password
        }),
        BuilderAuthenticator::OAuthAuthenticator(settings) => oauth_to_manifest(settings),
    };
    Some(value)
}

fn oauth_to_manifest(settings: &OAuthSettings) -> Value {
    let mut map = Map::new();
    put(&mut map, "type", "OAuthAuthenticator");
    if let Value::Object(fields) = to_json(settings) {
        map.extend(fields);
    }
    if settings.refresh_request_body.is_empty() {
        map.shift_remove("refresh_request_body");
    } else {
        put(&mut map, "refresh_request_body", key_values_to_object(&settings.refresh_request_body));
    }
    if settings.token_refresh_endpoint.is_empty() {
        map.shift_remove("token_refresh_endpoint");
    }
    Value::Object(map)
}

fn request_option_to_manifest(option: &RequestOption) -> Value {
    json!({
        "type": "RequestOption",
        "inject_into": option.inject_into.as_str(),
        "field_name": option.field_name
    })
}

/// Manifest pointers, relative to a stream, whose verbatim values a form
/// edit at `form_path` (relative to the stream) supersedes
#[must_use]
pub fn shadowed_pointers(form_path: &[&str]) -> &'static [&'static str] {
    match form_path {
        ["url_path", ..] => &["/retriever/requester/path"],
        ["http_method", ..] => &["/retriever/requester/http_method"],
        ["primary_key", ..] => &["/primary_key"],
        ["record_selector", ..] => &[
            "/retriever/record_selector",
            "/retriever/record_selector/extractor",
            "/retriever/record_selector/record_filter",
        ],
        ["request_options", "request_parameters", ..] => &["/retriever/requester/request_parameters"],
        ["request_options", "request_headers", ..] => &["/retriever/requester/request_headers"],
        ["request_options", "request_body", ..] => &[
            "/retriever/requester/request_body_json",
            "/retriever/requester/request_body_data",
        ],
        ["request_options"] => &[
            "/retriever/requester/request_parameters",
            "/retriever/requester/request_headers",
            "/retriever/requester/request_body_json",
            "/retriever/requester/request_body_data",
        ],
        ["paginator", ..] => &["/retriever/paginator"],
        ["parameterized_requests" | "parent_streams", ..] => &["/retriever/partition_router"],
        ["decoder", ..] => &["/retriever/decoder"],
        ["error_handler", ..] => &["/retriever/requester/error_handler"],
        ["incremental_sync", ..] => &["/incremental_sync"],
        ["schema", ..] => &["/schema_loader"],
        ["transformations", ..] => &["/transformations"],
        _ => &[],
    }
}

/// Lay verbatim values over a generated tree
///
/// An entry is written only when its parent exists as an object; the root
/// entry replaces the whole tree. A null entry marks a key the source did
/// not have, and removes whatever the form generated there.
fn overlay(target: &mut Value, entries: &IndexMap<String, Value>) {
    for (pointer, raw) in entries {
        let Ok(path) = FieldPath::from_pointer(pointer) else {
            tracing::debug!(pointer, "skipping malformed unmodeled pointer");
            continue;
        };
        let Some(parent) = path.parent() else {
            *target = raw.clone();
            continue;
        };
        if raw.is_null() {
            remove_path(target, &path);
            continue;
        }
        if target.pointer(&parent.to_pointer()).is_some_and(Value::is_object) {
            if let Err(err) = set_path(target, &path, raw.clone()) {
                tracing::debug!(pointer, error = %err, "unmodeled value not applied");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn put(map: &mut Map<String, Value>, key: &str, value: impl Into<Value>) {
    map.insert(key.to_string(), value.into());
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

fn from_json<T: DeserializeOwned>(value: Value) -> Convert<T> {
    serde_json::from_value(value).map_err(|e| Unsupported(e.to_string()))
}

fn tag_of(map: &Map<String, Value>) -> Option<&str> {
    map.get("type").and_then(Value::as_str)
}

fn object<'a>(value: &'a Value, tag: &str) -> Convert<&'a Map<String, Value>> {
    let map = value
        .as_object()
        .ok_or_else(|| Unsupported(format!("expected {tag} object")))?;
    match tag_of(map) {
        Some(found) if found == tag => Ok(map),
        found => unsupported(format!("expected {tag}, found {}", found.unwrap_or("no type"))),
    }
}

fn only_keys(map: &Map<String, Value>, allowed: &[&str]) -> Convert<()> {
    match map.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => unsupported(format!("unmodeled key '{key}'")),
        None => Ok(()),
    }
}

fn require_keys(map: &Map<String, Value>, required: &[&str]) -> Convert<()> {
    match required.iter().find(|k| !map.contains_key(**k)) {
        Some(key) => unsupported(format!("missing '{key}'")),
        None => Ok(()),
    }
}

fn required_string(map: &Map<String, Value>, key: &str) -> Convert<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Unsupported(format!("'{key}' is missing or not a string")))
}

fn opt_string(map: &Map<String, Value>, key: &str) -> Convert<Option<String>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => unsupported(format!("'{key}' is not a string")),
    }
}

fn string_list(value: &Value) -> Convert<Vec<String>> {
    value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| Unsupported("expected a list of strings".into()))
}

fn key_values(value: &Value) -> Option<Vec<KeyValue>> {
    value
        .as_object()?
        .iter()
        .map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

fn key_value_rows(values: &[KeyValue]) -> Value {
    Value::Array(values.iter().map(|(k, v)| json!([k, v])).collect())
}

fn key_values_to_object(values: &[KeyValue]) -> Value {
    Value::Object(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn child_pointer(base: &str, key: &str) -> String {
    format!("{base}/{}", key.replace('~', "~0").replace('/', "~1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::InputType;
    use pretty_assertions::assert_eq;

    fn manifest_with_stream(stream: Value) -> Value {
        json!({
            "version": "6.1.0",
            "type": "DeclarativeSource",
            "check": {"type": "CheckStream", "stream_names": ["users"]},
            "streams": [stream]
        })
    }

    fn simple_stream(name: &str, requester_extra: Value) -> Value {
        let mut requester = json!({
            "type": "HttpRequester",
            "url_base": "https://api.example.com",
            "path": format!("/{name}"),
            "http_method": "GET"
        });
        if let (Some(target), Value::Object(extra)) = (requester.as_object_mut(), requester_extra) {
            target.extend(extra);
        }
        json!({
            "type": "DeclarativeStream",
            "name": name,
            "retriever": {
                "type": "SimpleRetriever",
                "requester": requester,
                "record_selector": {
                    "type": "RecordSelector",
                    "extractor": {"type": "DpathExtractor", "field_path": ["data"]}
                }
            }
        })
    }

    #[test]
    fn test_simple_manifest_round_trips() {
        let manifest = manifest_with_stream(simple_stream("users", json!({})));
        let values = manifest_to_form_values(&manifest);
        assert_eq!(values.global.url_base, "https://api.example.com");
        assert_eq!(values.streams[0].url_path, "/users");
        assert!(values.unmodeled.is_empty());
        assert_eq!(form_to_manifest(&values), manifest);
    }

    #[test]
    fn test_unknown_root_keys_survive() {
        let mut manifest = manifest_with_stream(simple_stream("users", json!({})));
        manifest["metadata"] = json!({"autoImportSchema": {"users": true}});
        let values = manifest_to_form_values(&manifest);
        assert!(values.unmodeled.contains_key("/metadata"));
        assert_eq!(form_to_manifest(&values), manifest);
    }

    #[test]
    fn test_custom_paginator_kept_verbatim() {
        let mut stream = simple_stream("users", json!({}));
        stream["retriever"]["paginator"] = json!({"type": "CustomPaginator", "class_name": "a.B"});
        let manifest = manifest_with_stream(stream);
        let values = manifest_to_form_values(&manifest);
        assert_eq!(values.streams[0].paginator, None);
        assert!(values.streams[0].unmodeled.contains_key("/retriever/paginator"));
        assert_eq!(form_to_manifest(&values), manifest);
    }

    #[test]
    fn test_extra_keys_kept_next_to_modeled_section() {
        let mut stream = simple_stream("users", json!({}));
        stream["$parameters"] = json!({"name": "users"});
        stream["retriever"]["record_selector"]["$parameters"] = json!({"x": 1});
        let manifest = manifest_with_stream(stream);
        let values = manifest_to_form_values(&manifest);
        assert_eq!(values.streams[0].record_selector.field_path, vec!["data"]);
        assert_eq!(form_to_manifest(&values), manifest);
    }

    #[test]
    fn test_body_shapes() {
        let flat = manifest_with_stream(simple_stream(
            "users",
            json!({"request_body_json": {"a": "1", "b": "{{ config['b'] }}"}}),
        ));
        let values = manifest_to_form_values(&flat);
        assert!(matches!(
            &values.streams[0].request_options.request_body,
            RequestBody::JsonList { values } if values.len() == 2
        ));
        assert_eq!(form_to_manifest(&values), flat);

        let nested = manifest_with_stream(simple_stream(
            "users",
            json!({"request_body_json": {"filter": {"status": "active"}}}),
        ));
        let values = manifest_to_form_values(&nested);
        assert!(matches!(
            values.streams[0].request_options.request_body,
            RequestBody::JsonFreeform { .. }
        ));
        assert_eq!(form_to_manifest(&values), nested);

        let text = manifest_with_stream(simple_stream("users", json!({"request_body_data": "a=b"})));
        let values = manifest_to_form_values(&text);
        assert_eq!(
            values.streams[0].request_options.request_body,
            RequestBody::StringFreeform { value: "a=b".to_string() }
        );
        assert_eq!(form_to_manifest(&values), text);
    }

    #[test]
    fn test_single_primary_key_written_as_string() {
        let mut stream = simple_stream("users", json!({}));
        stream["primary_key"] = json!(["id"]);
        let values = manifest_to_form_values(&manifest_with_stream(stream));
        assert_eq!(values.streams[0].primary_key, vec!["id"]);
        assert_eq!(form_to_manifest(&values)["streams"][0]["primary_key"], json!("id"));
    }

    #[test]
    fn test_user_input_datetime_recognized() {
        let mut stream = simple_stream("events", json!({}));
        stream["incremental_sync"] = json!({
            "type": "DatetimeBasedCursor",
            "cursor_field": "updated_at",
            "datetime_format": USER_INPUT_DATE_FORMAT,
            "cursor_datetime_formats": [USER_INPUT_DATE_FORMAT],
            "start_datetime": {
                "type": "MinMaxDatetime",
                "datetime": "{{ config['start_date'] }}",
                "datetime_format": USER_INPUT_DATE_FORMAT
            },
            "end_datetime": {
                "type": "MinMaxDatetime",
                "datetime": NOW_EXPRESSION,
                "datetime_format": USER_INPUT_DATE_FORMAT
            }
        });
        let mut manifest = manifest_with_stream(stream);
        manifest["spec"] = json!({
            "type": "Spec",
            "connection_specification": {
                "$schema": JSON_SCHEMA_DRAFT_7,
                "type": "object",
                "required": ["start_date"],
                "properties": {"start_date": inferred_definition("start_date").to_property()},
                "additionalProperties": true
            }
        });
        let values = manifest_to_form_values(&manifest);
        let sync = values.streams[0].incremental_sync.as_ref().unwrap();
        assert_eq!(sync.start_datetime, DatetimeValue::UserInput);
        assert_eq!(sync.end_datetime, Some(DatetimeValue::Now));
        assert!(values.inputs.is_empty());
        assert!(values.inferred_input_overrides.is_empty());
        assert_eq!(form_to_manifest(&values), manifest);
    }

    #[test]
    fn test_differing_url_base_kept_per_stream() {
        let first = simple_stream("users", json!({}));
        let mut second = simple_stream("orders", json!({}));
        second["retriever"]["requester"]["url_base"] = json!("https://other.example.com");
        let manifest = json!({
            "version": "6.1.0",
            "type": "DeclarativeSource",
            "check": {"type": "CheckStream", "stream_names": []},
            "streams": [first, second]
        });
        let values = manifest_to_form_values(&manifest);
        assert!(values.streams[1]
            .unmodeled
            .contains_key("/retriever/requester/url_base"));
        assert_eq!(form_to_manifest(&values), manifest);
    }

    #[test]
    fn test_stream_without_authenticator_stays_unauthenticated() {
        let auth = json!({"type": "BearerAuthenticator", "api_token": "{{ config['api_key'] }}"});
        let first = simple_stream("users", json!({"authenticator": auth}));
        let second = simple_stream("accounts", json!({}));
        let manifest = json!({
            "version": "6.1.0",
            "type": "DeclarativeSource",
            "check": {"type": "CheckStream", "stream_names": []},
            "streams": [first, second]
        });
        let values = manifest_to_form_values(&manifest);
        assert_eq!(
            values.streams[1].unmodeled.get("/retriever/requester/authenticator"),
            Some(&Value::Null)
        );
        let derived = form_to_manifest(&values);
        assert!(derived["streams"][1]["retriever"]["requester"].get("authenticator").is_none());
        assert_eq!(derived["streams"][0]["retriever"]["requester"]["authenticator"], auth);
    }

    #[test]
    fn test_authenticator_with_foreign_key_kept_raw() {
        let auth = json!({"type": "BearerAuthenticator", "api_token": "{{ config['my_token'] }}"});
        let manifest = manifest_with_stream(simple_stream("users", json!({"authenticator": auth})));
        let values = manifest_to_form_values(&manifest);
        assert_eq!(values.global.authenticator, Authenticator::Unmodeled(auth));
        assert_eq!(form_to_manifest(&values), manifest);
    }

    #[test]
    fn test_substream_parent_resolved_by_equality() {
        let parent = simple_stream("users", json!({}));
        let mut child = simple_stream("posts", json!({}));
        child["retriever"]["partition_router"] = json!({
            "type": "SubstreamPartitionRouter",
            "parent_stream_configs": [{
                "type": "ParentStreamConfig",
                "parent_key": "id",
                "partition_field": "user_id",
                "stream": parent.clone()
            }]
        });
        let manifest = json!({
            "version": "6.1.0",
            "type": "DeclarativeSource",
            "check": {"type": "CheckStream", "stream_names": []},
            "streams": [parent, child]
        });
        let values = manifest_to_form_values(&manifest);
        let parents = values.streams[1].parent_streams.as_ref().unwrap();
        assert_eq!(parents[0].parent_stream_reference, "0");
        assert_eq!(form_to_manifest(&values), manifest);
    }

    #[test]
    fn test_spec_inputs_and_overrides() {
        let auth = json!({"type": "BearerAuthenticator", "api_token": "{{ config['api_key'] }}"});
        let mut manifest = manifest_with_stream(simple_stream("users", json!({"authenticator": auth})));
        manifest["spec"] = json!({
            "type": "Spec",
            "connection_specification": {
                "$schema": JSON_SCHEMA_DRAFT_7,
                "type": "object",
                "required": ["region", "api_key"],
                "properties": {
                    "region": {"type": "string", "title": "Region", "default": "eu"},
                    "api_key": {"type": "string", "title": "Token", "airbyte_secret": true}
                },
                "additionalProperties": true
            }
        });
        let values = manifest_to_form_values(&manifest);
        assert_eq!(values.inputs.len(), 1);
        assert_eq!(values.inputs[0].input_type, InputType::String);
        assert!(values.inferred_input_overrides.contains_key("api_key"));
        assert_eq!(form_to_manifest(&values), manifest);

        let state = manifest_to_form(&manifest);
        assert_eq!(state.testing_values.get("region"), Some(&json!("eu")));
    }

    #[test]
    fn test_error_handlers_normalized() {
        let handler = |code: u64| {
            json!({
                "type": "DefaultErrorHandler",
                "response_filters": [{"type": "HttpResponseFilter", "action": "RETRY", "http_codes": [code]}]
            })
        };
        let composite = manifest_with_stream(simple_stream(
            "users",
            json!({"error_handler": {"type": "CompositeErrorHandler", "error_handlers": [handler(429), handler(503)]}}),
        ));
        let values = manifest_to_form_values(&composite);
        let handlers = values.streams[0].error_handler.as_ref().unwrap();
        assert_eq!(handlers.len(), 2);
        assert_eq!(
            handlers[0].response_filter.as_ref().unwrap().http_codes,
            Some(vec!["429".to_string()])
        );
        assert_eq!(form_to_manifest(&values), composite);
    }

    #[test]
    fn test_shadowed_pointers() {
        assert_eq!(shadowed_pointers(&["paginator", "strategy"]), &["/retriever/paginator"]);
        assert!(shadowed_pointers(&["name"]).is_empty());
    }

    #[test]
    fn test_non_object_manifest_gives_empty_form() {
        let values = manifest_to_form_values(&json!("not a manifest"));
        assert_eq!(values, BuilderFormValues::default());
    }
}
