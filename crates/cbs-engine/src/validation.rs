//! Validation Aggregator
//!
//! Structural rules over the form plus, optionally, JSON-Schema violations of
//! the derived manifest. Errors are keyed by dotted form path; schema
//! violations are attributed to the section their manifest pointer falls in.
//!
//! A value fabricated by a variant switch is reported as
//! [`ErrorKind::Incomplete`] while it is still empty, never as `Required`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use cbs_schema::SchemaRegistry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::form::{
    BackoffStrategy, BuilderAuthenticator, BuilderErrorHandler, BuilderIncrementalSync,
    BuilderPaginator, BuilderStream, BuilderTransformation, DatetimeValue, FormState, GrantType,
    InputDefinition, InputType, PageTokenOption, PaginationStrategy, ParameterizedValues,
    RequestBody, RequestOption, RunState, DATE_REGEX, DATE_TIME_REGEX, FILTER_ACTIONS,
};
use crate::inferred::effective_inputs;
use crate::references::INTERPOLATION_PATTERN;

/// Category of a field error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Required,
    /// Placeholder from a variant switch not filled in yet
    Incomplete,
    Pattern,
    EnumMembership,
    TypeMismatch,
    Duplicate,
    InvalidJson,
    InvalidInterpolation,
    /// Rule spanning several fields
    CrossField,
    /// Derived manifest rejected by the declarative schema
    Schema,
}

/// One error attached to a form path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Coarse grouping of form paths for per-tab error indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section<'a> {
    Any,
    /// Connector settings and check streams
    Global,
    /// Inputs and their testing values
    Inputs,
    /// One stream, by form identifier
    Stream(&'a str),
}

/// Path-keyed validation result
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors_by_path: BTreeMap<String, Vec<FieldError>>,
    /// Stream identifiers by position, to resolve [`Section::Stream`]
    #[serde(default)]
    stream_ids: Vec<String>,
}

impl ValidationReport {
    /// Whether no rule failed
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors_by_path.is_empty()
    }

    /// Total number of errors
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors_by_path.values().map(Vec::len).sum()
    }

    /// Errors at exactly `path`
    #[must_use]
    pub fn errors_at(&self, path: &str) -> &[FieldError] {
        self.errors_by_path.get(path).map_or(&[][..], Vec::as_slice)
    }

    /// Whether `path` has an error of `kind`
    #[must_use]
    pub fn has_error(&self, path: &str, kind: ErrorKind) -> bool {
        self.errors_at(path).iter().any(|e| e.kind == kind)
    }

    /// Whether any path in `section` has an error
    #[must_use]
    pub fn has_errors_in(&self, section: Section<'_>) -> bool {
        match section {
            Section::Any => !self.errors_by_path.is_empty(),
            Section::Global => self.any_under("global") || self.any_under("check_streams"),
            Section::Inputs => self.any_under("inputs") || self.any_under("testing_values"),
            Section::Stream(id) => self
                .stream_ids
                .iter()
                .position(|s| s == id)
                .is_some_and(|index| self.any_under(&format!("streams.{index}"))),
        }
    }

    fn any_under(&self, prefix: &str) -> bool {
        let nested = format!("{prefix}.");
        self.errors_by_path
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .any(|(path, _)| path == prefix || path.starts_with(&nested))
    }

    fn push(&mut self, path: impl Into<String>, kind: ErrorKind, message: impl Into<String>) {
        let errors = self.errors_by_path.entry(path.into()).or_default();
        if kind == ErrorKind::Incomplete {
            errors.retain(|e| e.kind != ErrorKind::Required);
        }
        if !errors.iter().any(|e| e.kind == kind) {
            errors.push(FieldError {
                kind,
                message: message.into(),
            });
        }
    }
}

/// Validate the form and, when a registry is given, the derived manifest
#[must_use]
pub fn validate(state: &FormState, manifest: &Value, registry: Option<&SchemaRegistry>) -> ValidationReport {
    let mut report = validate_form(state);
    if let Some(registry) = registry {
        for violation in registry.validate(manifest) {
            report.push(
                section_of_pointer(state, &violation.pointer),
                ErrorKind::Schema,
                format!("{}: {}", violation.pointer, violation.message),
            );
        }
    }
    tracing::debug!(errors = report.error_count(), "form validated");
    report
}

/// Run the structural rules over the form
#[must_use]
pub fn validate_form(state: &FormState) -> ValidationReport {
    let mut rules = Rules {
        report: ValidationReport {
            errors_by_path: BTreeMap::new(),
            stream_ids: state.values.streams.iter().map(|s| s.id.clone()).collect(),
        },
        placeholders: &state.placeholders,
    };
    rules.global(state);
    rules.inputs(state);
    rules.streams(state);
    rules.unfilled_placeholders(state);
    rules.report
}

/// Form section a manifest pointer belongs to
///
/// A stream's authenticator comes from the global one unless the stream
/// keeps its own verbatim.
fn section_of_pointer(state: &FormState, pointer: &str) -> String {
    const AUTH_POINTER: &str = "/retriever/requester/authenticator";
    let mut segments = pointer.split('/').skip(1);
    match (segments.next(), segments.next().map(|i| (i, i.parse::<usize>()))) {
        (Some("streams"), Some((index, Ok(position)))) => {
            let rest = &pointer["/streams/".len() + index.len()..];
            let under_auth = rest == AUTH_POINTER || rest.starts_with(&format!("{AUTH_POINTER}/"));
            let own_auth = state
                .values
                .streams
                .get(position)
                .is_some_and(|stream| stream.unmodeled.contains_key(AUTH_POINTER));
            if under_auth && !own_auth {
                "global.authenticator".to_string()
            } else {
                format!("streams.{index}")
            }
        }
        (Some("spec"), _) => "inputs".to_string(),
        _ => "global".to_string(),
    }
}

struct Rules<'a> {
    report: ValidationReport,
    placeholders: &'a BTreeSet<String>,
}

impl Rules<'_> {
    fn missing(&mut self, path: String) {
        if self.placeholders.contains(&path) {
            self.report.push(path, ErrorKind::Incomplete, "placeholder value not filled in");
        } else {
            self.report.push(path, ErrorKind::Required, "value is required");
        }
    }

    fn required(&mut self, path: String, value: &str) {
        if value.trim().is_empty() {
            self.missing(path);
        }
    }

    fn interpolation(&mut self, path: String, value: &str) {
        if value.trim().is_empty() {
            self.missing(path);
        } else if !INTERPOLATION_PATTERN.is_match(value.trim()) {
            self.report.push(
                path,
                ErrorKind::InvalidInterpolation,
                "must be a single {{ ... }} expression",
            );
        }
    }

    fn request_option(&mut self, path: &str, option: &RequestOption) {
        self.required(format!("{path}.field_name"), &option.field_name);
    }

    fn global(&mut self, state: &FormState) {
        let values = &state.values;
        self.required("global.url_base".to_string(), &values.global.url_base);

        let base = "global.authenticator";
        if values.global.authenticator.tag().is_none() {
            self.report.push(format!("{base}.type"), ErrorKind::Required, "authenticator has no type");
        }
        if let Some(auth) = values.global.authenticator.modeled() {
            match auth {
                BuilderAuthenticator::NoAuth => {}
                BuilderAuthenticator::ApiKeyAuthenticator { api_token, inject_into } => {
                    self.required(format!("{base}.api_token"), api_token);
                    self.request_option(&format!("{base}.inject_into"), inject_into);
                }
                BuilderAuthenticator::BearerAuthenticator { api_token } => {
                    self.required(format!("{base}.api_token"), api_token);
                }
                BuilderAuthenticator::BasicHttpAuthenticator { username, .. } => {
                    self.required(format!("{base}.username"), username);
                }
                BuilderAuthenticator::OAuthAuthenticator(settings) => {
                    self.required(format!("{base}.client_id"), &settings.client_id);
                    self.required(format!("{base}.client_secret"), &settings.client_secret);
                    self.required(
                        format!("{base}.token_refresh_endpoint"),
                        &settings.token_refresh_endpoint,
                    );
                    if settings.effective_grant_type() == GrantType::RefreshToken {
                        self.required(
                            format!("{base}.refresh_token"),
                            settings.refresh_token.as_deref().unwrap_or_default(),
                        );
                    }
                    if settings.refresh_token_updater.is_some() {
                        self.required(
                            format!("{base}.access_token_value"),
                            settings.access_token_value.as_deref().unwrap_or_default(),
                        );
                        self.required(
                            format!("{base}.token_expiry_date"),
                            settings.token_expiry_date.as_deref().unwrap_or_default(),
                        );
                    }
                    for (index, (key, _)) in settings.refresh_request_body.iter().enumerate() {
                        self.required(format!("{base}.refresh_request_body.{index}.0"), key);
                    }
                }
            }
        }

        let names: HashSet<&str> = values.streams.iter().map(|s| s.name.as_str()).collect();
        for (index, name) in values.check_streams.iter().enumerate() {
            if !names.contains(name.as_str()) {
                self.report.push(
                    format!("check_streams.{index}"),
                    ErrorKind::CrossField,
                    format!("no stream named '{name}'"),
                );
            }
        }
    }

    fn inputs(&mut self, state: &FormState) {
        let inputs = effective_inputs(&state.values);
        let explicit = state.values.inputs.len();

        let mut seen: HashSet<&str> = HashSet::new();
        for (index, input) in inputs.iter().enumerate() {
            let duplicate = !seen.insert(input.key.as_str());
            if index >= explicit {
                continue;
            }
            let base = format!("inputs.{index}");
            self.required(format!("{base}.key"), &input.key);
            if duplicate || inputs[index + 1..].iter().any(|other| other.key == input.key) {
                self.report.push(
                    format!("{base}.key"),
                    ErrorKind::Duplicate,
                    format!("key '{}' is used by another input", input.key),
                );
            }
            self.input_definition(&base, input);
        }

        self.testing_values(&inputs, &state.testing_values);
    }

    fn input_definition(&mut self, base: &str, input: &InputDefinition) {
        if input.input_type == InputType::Enum && input.enum_values.as_ref().map_or(true, Vec::is_empty) {
            self.missing(format!("{base}.enum_values"));
        }
        if let Some(default) = &input.default {
            let path = format!("{base}.default");
            self.typed_value(path, input, default);
        }
    }

    fn typed_value(&mut self, path: String, input: &InputDefinition, value: &Value) {
        if !input.input_type.accepts(value) {
            self.report.push(path, ErrorKind::TypeMismatch, "value does not match the input type");
            return;
        }
        let text = value.as_str().unwrap_or_default();
        match input.input_type {
            InputType::Date if !DATE_REGEX.is_match(text) => {
                self.report.push(path, ErrorKind::Pattern, "expected YYYY-MM-DD");
            }
            InputType::DateTime if !DATE_TIME_REGEX.is_match(text) => {
                self.report.push(path, ErrorKind::Pattern, "expected YYYY-MM-DDTHH:mm:ssZ");
            }
            InputType::Enum => {
                if let Some(options) = &input.enum_values {
                    if !options.iter().any(|o| o == text) {
                        self.report.push(
                            path,
                            ErrorKind::EnumMembership,
                            format!("'{text}' is not one of the allowed values"),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    fn testing_values(&mut self, inputs: &[InputDefinition], testing: &IndexMap<String, Value>) {
        for input in inputs {
            let path = format!("testing_values.{}", input.key);
            match testing.get(&input.key) {
                None | Some(Value::Null) => {
                    if input.required {
                        self.report.push(path, ErrorKind::Required, "testing value is required");
                    }
                }
                Some(Value::String(s)) if s.is_empty() => {
                    if input.required {
                        self.report.push(path, ErrorKind::Required, "testing value is required");
                    }
                }
                Some(value) => self.typed_value(path, input, value),
            }
        }
    }

    fn streams(&mut self, state: &FormState) {
        let streams = &state.values.streams;
        if streams.is_empty() {
            self.report.push("streams", ErrorKind::Required, "at least one stream is required");
        }
        let mut names: HashSet<&str> = HashSet::new();
        for (index, stream) in streams.iter().enumerate() {
            let base = format!("streams.{index}");
            self.required(format!("{base}.name"), &stream.name);
            if !stream.name.is_empty() && !names.insert(stream.name.as_str()) {
                self.report.push(
                    format!("{base}.name"),
                    ErrorKind::Duplicate,
                    format!("stream name '{}' is used twice", stream.name),
                );
            }
            self.stream(&base, stream, state);
        }
    }

    fn stream(&mut self, base: &str, stream: &BuilderStream, state: &FormState) {
        self.required(format!("{base}.url_path"), &stream.url_path);

        if let Some(condition) = &stream.record_selector.filter_condition {
            self.interpolation(format!("{base}.record_selector.filter_condition"), condition);
        }

        let options = &stream.request_options;
        for (field, list) in [
            ("request_parameters", &options.request_parameters),
            ("request_headers", &options.request_headers),
        ] {
            for (row, (key, _)) in list.iter().enumerate() {
                self.required(format!("{base}.request_options.{field}.{row}.0"), key);
            }
        }
        if let RequestBody::JsonFreeform { value } = &options.request_body {
            if !value.trim().is_empty() && !matches!(serde_json::from_str::<Value>(value), Ok(Value::Object(_))) {
                self.report.push(
                    format!("{base}.request_options.request_body.value"),
                    ErrorKind::InvalidJson,
                    "body must be a JSON object",
                );
            }
        }

        if let Some(schema) = &stream.schema {
            if !matches!(serde_json::from_str::<Value>(schema), Ok(Value::Object(_))) {
                self.report
                    .push(format!("{base}.schema"), ErrorKind::InvalidJson, "schema must be a JSON object");
            }
        }

        if let Some(paginator) = &stream.paginator {
            self.paginator(&format!("{base}.paginator"), paginator);
        }
        if let Some(sync) = &stream.incremental_sync {
            self.incremental_sync(&format!("{base}.incremental_sync"), sync);
        }
        for (index, request) in stream.parameterized_requests.iter().flatten().enumerate() {
            let path = format!("{base}.parameterized_requests.{index}");
            self.required(format!("{path}.cursor_field"), &request.cursor_field);
            match &request.values {
                ParameterizedValues::List { value } => {
                    if value.is_empty() {
                        self.missing(format!("{path}.values.value"));
                    }
                }
                ParameterizedValues::Variable { value } => {
                    self.interpolation(format!("{path}.values.value"), value);
                }
            }
            if let Some(option) = &request.request_option {
                self.request_option(&format!("{path}.request_option"), option);
            }
        }
        for (index, parent) in stream.parent_streams.iter().flatten().enumerate() {
            let path = format!("{base}.parent_streams.{index}");
            self.required(format!("{path}.parent_key"), &parent.parent_key);
            self.required(format!("{path}.partition_field"), &parent.partition_field);
            let reference = format!("{path}.parent_stream_reference");
            if parent.parent_stream_reference.is_empty() {
                self.missing(reference);
            } else if parent.parent_stream_reference == stream.id
                || state.values.stream(&parent.parent_stream_reference).is_none()
            {
                self.report.push(
                    reference,
                    ErrorKind::CrossField,
                    "parent must be another stream of the connector",
                );
            }
            if let Some(option) = &parent.request_option {
                self.request_option(&format!("{path}.request_option"), option);
            }
        }
        for (index, handler) in stream.error_handler.iter().flatten().enumerate() {
            self.error_handler(&format!("{base}.error_handler.{index}"), handler);
        }
        for (index, transformation) in stream.transformations.iter().flatten().enumerate() {
            self.transformation(&format!("{base}.transformations.{index}"), transformation);
        }

        if let Some(status) = &stream.test_status {
            let path = format!("{base}.test_status.incomplete_cause");
            match (status.run_state, status.incomplete_cause) {
                (RunState::Incomplete, None) => self.report.push(
                    path,
                    ErrorKind::CrossField,
                    "an incomplete test run needs a cause",
                ),
                (RunState::Running | RunState::Complete, Some(_)) => self.report.push(
                    path,
                    ErrorKind::CrossField,
                    "only an incomplete test run has a cause",
                ),
                _ => {}
            }
        }
    }

    fn paginator(&mut self, base: &str, paginator: &BuilderPaginator) {
        match &paginator.page_token_option {
            PageTokenOption::Path => {}
            other => {
                let field_name = other.as_request_option().map_or("", |(_, name)| name);
                self.required(format!("{base}.page_token_option.field_name"), field_name);
            }
        }
        if let PaginationStrategy::CursorPagination {
            cursor_value,
            stop_condition,
            ..
        } = &paginator.strategy
        {
            self.required(format!("{base}.strategy.cursor_value"), cursor_value);
            if let Some(condition) = stop_condition {
                self.interpolation(format!("{base}.strategy.stop_condition"), condition);
            }
        }
        if let Some(option) = &paginator.page_size_option {
            self.request_option(&format!("{base}.page_size_option"), option);
            if !paginator.strategy.has_page_size() {
                self.report.push(
                    format!("{base}.strategy.page_size"),
                    ErrorKind::CrossField,
                    "a page size option needs a page size",
                );
            }
        }
    }

    fn incremental_sync(&mut self, base: &str, sync: &BuilderIncrementalSync) {
        self.required(format!("{base}.cursor_field"), &sync.cursor_field);
        if sync.cursor_datetime_formats.is_empty() {
            self.missing(format!("{base}.cursor_datetime_formats"));
        }
        for (field, value) in [("start_datetime", Some(&sync.start_datetime)), ("end_datetime", sync.end_datetime.as_ref())] {
            if let Some(DatetimeValue::Custom { value, .. }) = value {
                self.required(format!("{base}.{field}.value"), value);
            }
        }
        for (field, option) in [
            ("start_time_option", &sync.start_time_option),
            ("end_time_option", &sync.end_time_option),
        ] {
            if let Some(option) = option {
                self.request_option(&format!("{base}.{field}"), option);
            }
        }
        match (&sync.step, &sync.cursor_granularity) {
            (Some(_), None) => self.report.push(
                format!("{base}.cursor_granularity"),
                ErrorKind::CrossField,
                "step and cursor granularity are set together",
            ),
            (None, Some(_)) => self.report.push(
                format!("{base}.step"),
                ErrorKind::CrossField,
                "step and cursor granularity are set together",
            ),
            _ => {}
        }
    }

    fn error_handler(&mut self, base: &str, handler: &BuilderErrorHandler) {
        match &handler.backoff_strategy {
            Some(BackoffStrategy::ConstantBackoffStrategy { backoff_time_in_seconds }) => {
                let empty = match backoff_time_in_seconds {
                    Value::Null => true,
                    Value::String(s) => s.trim().is_empty(),
                    _ => false,
                };
                if empty {
                    self.missing(format!("{base}.backoff_strategy.backoff_time_in_seconds"));
                }
            }
            Some(
                BackoffStrategy::WaitTimeFromHeader { header, .. }
                | BackoffStrategy::WaitUntilTimeFromHeader { header, .. },
            ) => self.required(format!("{base}.backoff_strategy.header"), header),
            Some(BackoffStrategy::ExponentialBackoffStrategy { .. }) | None => {}
        }
        if let Some(filter) = &handler.response_filter {
            let path = format!("{base}.response_filter");
            if let Some(predicate) = &filter.predicate {
                self.interpolation(format!("{path}.predicate"), predicate);
            }
            if let Some(action) = &filter.action {
                if !FILTER_ACTIONS.contains(&action.as_str()) {
                    self.report.push(
                        format!("{path}.action"),
                        ErrorKind::EnumMembership,
                        format!("unknown action '{action}'"),
                    );
                }
            }
            for (index, code) in filter.http_codes.iter().flatten().enumerate() {
                if !code.trim().parse::<u16>().is_ok_and(|c| (100..=599).contains(&c)) {
                    self.report.push(
                        format!("{path}.http_codes.{index}"),
                        ErrorKind::Pattern,
                        format!("'{code}' is not an HTTP status code"),
                    );
                }
            }
        }
    }

    fn transformation(&mut self, base: &str, transformation: &BuilderTransformation) {
        match transformation {
            BuilderTransformation::AddFields { fields } => {
                if fields.is_empty() {
                    self.missing(format!("{base}.fields"));
                }
                for (index, field) in fields.iter().enumerate() {
                    if field.path.iter().all(|s| s.trim().is_empty()) {
                        self.missing(format!("{base}.fields.{index}.path"));
                    }
                    self.required(format!("{base}.fields.{index}.value"), &field.value);
                }
            }
            BuilderTransformation::RemoveFields { field_pointers } => {
                if field_pointers.is_empty() {
                    self.missing(format!("{base}.field_pointers"));
                }
                for (index, pointer) in field_pointers.iter().enumerate() {
                    if pointer.is_empty() {
                        self.missing(format!("{base}.field_pointers.{index}"));
                    }
                }
            }
        }
    }

    fn unfilled_placeholders(&mut self, state: &FormState) {
        if self.placeholders.is_empty() {
            return;
        }
        let Ok(tree) = serde_json::to_value(&state.values) else {
            return;
        };
        for path in self.placeholders {
            if self.report.has_error(path, ErrorKind::Incomplete) {
                continue;
            }
            let pointer = format!("/{}", path.replace('~', "~0").replace('/', "~1").replace('.', "/"));
            let unfilled = match tree.pointer(&pointer) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            };
            if unfilled {
                self.report
                    .push(path.clone(), ErrorKind::Incomplete, "placeholder value not filled in");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{
        Authenticator, BuilderFormValues, IncompleteCause, InjectInto, OAuthSettings,
        StreamTestStatus,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn valid_state() -> FormState {
        let mut values = BuilderFormValues::default();
        values.global.url_base = "https://api.example.com".to_string();
        let mut stream = BuilderStream::new("0", "users");
        stream.url_path = "/users".to_string();
        values.streams.push(stream);
        values.check_streams.push("users".to_string());
        FormState::new(values)
    }

    #[test]
    fn test_valid_form_has_no_errors() {
        let report = validate_form(&valid_state());
        assert!(report.is_valid(), "{:?}", report.errors_by_path);
        assert!(!report.has_errors_in(Section::Any));
    }

    #[test]
    fn test_required_fields() {
        let mut state = valid_state();
        state.values.global.url_base.clear();
        state.values.streams[0].url_path.clear();
        let report = validate_form(&state);
        assert!(report.has_error("global.url_base", ErrorKind::Required));
        assert!(report.has_error("streams.0.url_path", ErrorKind::Required));
        assert!(report.has_errors_in(Section::Global));
        assert!(report.has_errors_in(Section::Stream("0")));
        assert!(!report.has_errors_in(Section::Inputs));
    }

    #[test]
    fn test_placeholder_reported_incomplete() {
        let mut state = valid_state();
        state.values.global.authenticator =
            Authenticator::Modeled(BuilderAuthenticator::OAuthAuthenticator(OAuthSettings {
                client_id: "{{ config['client_id'] }}".to_string(),
                client_secret: "{{ config['client_secret'] }}".to_string(),
                grant_type: Some(GrantType::ClientCredentials),
                ..OAuthSettings::default()
            }));
        state
            .placeholders
            .insert("global.authenticator.token_refresh_endpoint".to_string());
        let report = validate_form(&state);
        assert_eq!(
            report.errors_at("global.authenticator.token_refresh_endpoint")[0].kind,
            ErrorKind::Incomplete
        );
        assert!(!report.has_error("global.authenticator.token_refresh_endpoint", ErrorKind::Required));
    }

    #[test]
    fn test_page_size_option_needs_page_size() {
        let mut state = valid_state();
        state.values.streams[0].paginator = Some(BuilderPaginator {
            strategy: PaginationStrategy::OffsetIncrement {
                page_size: None,
                inject_on_first_request: None,
            },
            page_token_option: PageTokenOption::RequestParameter {
                field_name: "offset".to_string(),
            },
            page_size_option: Some(RequestOption {
                inject_into: InjectInto::RequestParameter,
                field_name: "limit".to_string(),
            }),
        });
        let report = validate_form(&state);
        assert!(report.has_error("streams.0.paginator.strategy.page_size", ErrorKind::CrossField));
    }

    #[test]
    fn test_incomplete_run_needs_cause() {
        let mut state = valid_state();
        state.values.streams[0].test_status = Some(StreamTestStatus {
            run_state: RunState::Incomplete,
            incomplete_cause: None,
        });
        let report = validate_form(&state);
        assert!(report.has_error("streams.0.test_status.incomplete_cause", ErrorKind::CrossField));

        state.values.streams[0].test_status = Some(StreamTestStatus {
            run_state: RunState::Incomplete,
            incomplete_cause: Some(IncompleteCause::Failed),
        });
        assert!(validate_form(&state).is_valid());
    }

    #[test]
    fn test_date_inputs_and_testing_values() {
        let mut state = valid_state();
        state.values.inputs.push(
            InputDefinition::new("since", InputType::Date)
                .required()
                .with_default(json!("01/02/2024")),
        );
        state.testing_values.insert("since".to_string(), json!("2024-01-02"));
        let report = validate_form(&state);
        assert!(report.has_error("inputs.0.default", ErrorKind::Pattern));
        assert!(!report.has_error("testing_values.since", ErrorKind::Pattern));

        state.testing_values.shift_remove("since");
        assert!(validate_form(&state).has_error("testing_values.since", ErrorKind::Required));
    }

    #[test]
    fn test_duplicate_input_against_inferred() {
        let mut state = valid_state();
        state.values.global.authenticator =
            Authenticator::Modeled(BuilderAuthenticator::BearerAuthenticator {
                api_token: "{{ config['api_key'] }}".to_string(),
            });
        state.values.inputs.push(InputDefinition::new("api_key", InputType::String));
        let report = validate_form(&state);
        assert!(report.has_error("inputs.0.key", ErrorKind::Duplicate));
    }

    #[test]
    fn test_interpolation_rules() {
        let mut state = valid_state();
        state.values.streams[0].record_selector.filter_condition = Some("record.id > 3".to_string());
        let report = validate_form(&state);
        assert!(report.has_error(
            "streams.0.record_selector.filter_condition",
            ErrorKind::InvalidInterpolation
        ));
    }

    #[test]
    fn test_check_stream_must_exist() {
        let mut state = valid_state();
        state.values.check_streams.push("orders".to_string());
        assert!(validate_form(&state).has_error("check_streams.1", ErrorKind::CrossField));
    }

    #[test]
    fn test_schema_pointer_sections() {
        let state = valid_state();
        assert_eq!(section_of_pointer(&state, "/streams/3/retriever/requester"), "streams.3");
        assert_eq!(section_of_pointer(&state, "/spec/connection_specification"), "inputs");
        assert_eq!(section_of_pointer(&state, ""), "global");
        assert_eq!(section_of_pointer(&state, "/check"), "global");
        assert_eq!(section_of_pointer(&state, "/streams/x/name"), "global");
    }

    #[test]
    fn test_authenticator_violations_belong_to_global() {
        let mut state = valid_state();
        assert_eq!(
            section_of_pointer(&state, "/streams/0/retriever/requester/authenticator"),
            "global.authenticator"
        );
        assert_eq!(
            section_of_pointer(&state, "/streams/0/retriever/requester/authenticator/api_token"),
            "global.authenticator"
        );
        assert_eq!(
            section_of_pointer(&state, "/streams/0/retriever/requester/authenticator_x"),
            "streams.0"
        );

        state.values.streams[0]
            .unmodeled
            .insert("/retriever/requester/authenticator".to_string(), json!({"type": "Custom"}));
        assert_eq!(
            section_of_pointer(&state, "/streams/0/retriever/requester/authenticator"),
            "streams.0"
        );
    }

    #[test]
    fn test_untyped_authenticator_is_required_error() {
        let mut state = valid_state();
        state.values.global.authenticator = Authenticator::Unmodeled(json!({"api_token": "x"}));
        let report = validate_form(&state);
        assert!(report.has_error("global.authenticator.type", ErrorKind::Required));
        assert!(report.has_errors_in(Section::Global));

        state.values.global.authenticator =
            Authenticator::Unmodeled(json!({"type": "SessionTokenAuthenticator"}));
        assert!(validate_form(&state).is_valid());
    }

    #[test]
    fn test_unknown_stream_section_has_no_errors() {
        let mut state = valid_state();
        state.values.streams[0].url_path.clear();
        assert!(!validate_form(&state).has_errors_in(Section::Stream("missing")));
    }
}
