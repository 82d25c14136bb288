//! Builder form model
//!
//! [`BuilderFormValues`] is the editing-oriented shape of a manifest. Union
//! fields are serde-tagged enums so a form path addresses exactly one
//! variant's fields; optional sections are `Option`s whose presence means
//! "enabled". Anything the form cannot express lives in the `unmodeled`
//! maps, keyed by JSON pointer into the manifest.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Manifest version written when a form does not carry one
pub const DEFAULT_MANIFEST_VERSION: &str = "6.1.0";

/// Connector name given to forms created from a bare manifest
pub const DEFAULT_CONNECTOR_NAME: &str = "Untitled";

/// Datetime format of user-supplied start and end dates
pub const USER_INPUT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Interpolation that evaluates to the current time in [`USER_INPUT_DATE_FORMAT`]
pub const NOW_EXPRESSION: &str = "{{ now_utc().strftime('%Y-%m-%dT%H:%M:%SZ') }}";

/// Pattern attached to `date` inputs
pub const DATE_PATTERN: &str = "^[0-9]{4}-[0-9]{2}-[0-9]{2}$";

/// Pattern attached to `date-time` inputs
pub const DATE_TIME_PATTERN: &str = "^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}Z$";

pub(crate) static DATE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(DATE_PATTERN).expect("DATE_PATTERN is a valid regex pattern"));
pub(crate) static DATE_TIME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(DATE_TIME_PATTERN).expect("DATE_TIME_PATTERN is a valid regex pattern"));

/// A key/value pair edited as one row of a list
pub type KeyValue = (String, String);

/// Everything a user can edit in the builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderFormValues {
    pub global: GlobalSettings,
    pub inputs: Vec<InputDefinition>,
    /// Replacement JSON-schema properties for inferred inputs
    pub inferred_input_overrides: IndexMap<String, Value>,
    pub check_streams: Vec<String>,
    pub streams: Vec<BuilderStream>,
    pub version: String,
    /// Top-level manifest values kept verbatim, keyed by JSON pointer
    pub unmodeled: IndexMap<String, Value>,
}

impl Default for BuilderFormValues {
    fn default() -> Self {
        Self {
            global: GlobalSettings::default(),
            inputs: Vec::new(),
            inferred_input_overrides: IndexMap::new(),
            check_streams: Vec::new(),
            streams: Vec::new(),
            version: DEFAULT_MANIFEST_VERSION.to_string(),
            unmodeled: IndexMap::new(),
        }
    }
}

impl BuilderFormValues {
    /// Find a stream by its form identifier
    #[must_use]
    pub fn stream(&self, id: &str) -> Option<&BuilderStream> {
        self.streams.iter().find(|s| s.id == id)
    }

    /// Position of a stream by its form identifier
    #[must_use]
    pub fn stream_index(&self, id: &str) -> Option<usize> {
        self.streams.iter().position(|s| s.id == id)
    }

    /// Identifier not used by any stream yet
    #[must_use]
    pub fn next_stream_id(&self) -> String {
        let next = self
            .streams
            .iter()
            .filter_map(|s| s.id.parse::<usize>().ok())
            .max()
            .map_or(0, |max| max + 1);
        next.to_string()
    }

    /// Explicit input by key
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&InputDefinition> {
        self.inputs.iter().find(|i| i.key == key)
    }

    /// Drop dependent values whose controlling field is empty
    ///
    /// A page size option without a page size injects nothing, so it is
    /// cleared together with the size.
    pub fn cascade(&mut self) {
        for stream in &mut self.streams {
            if let Some(paginator) = &mut stream.paginator {
                if !paginator.strategy.has_page_size() {
                    paginator.page_size_option = None;
                }
            }
        }
    }
}

/// Connector-wide settings shared by every stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub connector_name: String,
    pub url_base: String,
    pub authenticator: Authenticator,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            connector_name: DEFAULT_CONNECTOR_NAME.to_string(),
            url_base: String::new(),
            authenticator: Authenticator::default(),
        }
    }
}

/// Authenticator as edited in the form, or kept raw when the form has no
/// model for its tag
#[derive(Debug, Clone, PartialEq)]
pub enum Authenticator {
    Modeled(BuilderAuthenticator),
    Unmodeled(Value),
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::Modeled(BuilderAuthenticator::NoAuth)
    }
}

impl Authenticator {
    /// The `type` tag of the authenticator
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Modeled(auth) => Some(auth.tag()),
            Self::Unmodeled(raw) => raw.get("type").and_then(Value::as_str),
        }
    }

    /// The modeled authenticator, if any
    #[inline]
    #[must_use]
    pub fn modeled(&self) -> Option<&BuilderAuthenticator> {
        match self {
            Self::Modeled(auth) => Some(auth),
            Self::Unmodeled(_) => None,
        }
    }
}

impl Serialize for Authenticator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Modeled(auth) => auth.serialize(serializer),
            Self::Unmodeled(raw) => raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Authenticator {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        let known = raw
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|tag| BuilderAuthenticator::TAGS.contains(&tag));
        if known {
            serde_json::from_value(raw)
                .map(Self::Modeled)
                .map_err(serde::de::Error::custom)
        } else {
            Ok(Self::Unmodeled(raw))
        }
    }
}

/// Authenticators the form can edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuilderAuthenticator {
    NoAuth,
    ApiKeyAuthenticator {
        api_token: String,
        inject_into: RequestOption,
    },
    BearerAuthenticator {
        api_token: String,
    },
    BasicHttpAuthenticator {
        username: String,
        #[serde(default)]
        password: String,
    },
    OAuthAuthenticator(OAuthSettings),
}

impl BuilderAuthenticator {
    /// Tags with a form model
    pub const TAGS: &'static [&'static str] = &[
        "NoAuth",
        "ApiKeyAuthenticator",
        "BearerAuthenticator",
        "BasicHttpAuthenticator",
        "OAuthAuthenticator",
    ];

    /// The `type` tag of this variant
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NoAuth => "NoAuth",
            Self::ApiKeyAuthenticator { .. } => "ApiKeyAuthenticator",
            Self::BearerAuthenticator { .. } => "BearerAuthenticator",
            Self::BasicHttpAuthenticator { .. } => "BasicHttpAuthenticator",
            Self::OAuthAuthenticator(_) => "OAuthAuthenticator",
        }
    }
}

/// OAuth grant types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    RefreshToken,
    ClientCredentials,
}

/// Fields of an OAuth authenticator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_refresh_endpoint: String,
    /// Absent means the runtime default, a refresh token grant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<GrantType>,
    pub refresh_request_body: Vec<KeyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry_date_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_updater: Option<RefreshTokenUpdater>,
}

impl OAuthSettings {
    /// Grant type the runtime will use
    #[inline]
    #[must_use]
    pub fn effective_grant_type(&self) -> GrantType {
        self.grant_type.unwrap_or(GrantType::RefreshToken)
    }
}

/// Writes refreshed tokens back into the connector config
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshTokenUpdater {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_config_path: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_config_path: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry_date_config_path: Option<Vec<String>>,
}

/// Where a request option is injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectInto {
    RequestParameter,
    Header,
    BodyData,
    BodyJson,
}

impl InjectInto {
    /// Parse the manifest spelling
    #[must_use]
    pub fn from_manifest(value: &str) -> Option<Self> {
        match value {
            "request_parameter" => Some(Self::RequestParameter),
            "header" => Some(Self::Header),
            "body_data" => Some(Self::BodyData),
            "body_json" => Some(Self::BodyJson),
            _ => None,
        }
    }

    /// Manifest spelling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestParameter => "request_parameter",
            Self::Header => "header",
            Self::BodyData => "body_data",
            Self::BodyJson => "body_json",
        }
    }
}

/// A value injected into outgoing requests under `field_name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOption {
    pub inject_into: InjectInto,
    #[serde(default)]
    pub field_name: String,
}

/// Page token injection: a request option or the request path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "inject_into", rename_all = "snake_case")]
pub enum PageTokenOption {
    Path,
    RequestParameter {
        #[serde(default)]
        field_name: String,
    },
    Header {
        #[serde(default)]
        field_name: String,
    },
    BodyData {
        #[serde(default)]
        field_name: String,
    },
    BodyJson {
        #[serde(default)]
        field_name: String,
    },
}

impl PageTokenOption {
    /// Build from an injection target and field name
    #[must_use]
    pub fn injected(inject_into: InjectInto, field_name: String) -> Self {
        match inject_into {
            InjectInto::RequestParameter => Self::RequestParameter { field_name },
            InjectInto::Header => Self::Header { field_name },
            InjectInto::BodyData => Self::BodyData { field_name },
            InjectInto::BodyJson => Self::BodyJson { field_name },
        }
    }

    /// Split into injection target and field name; `None` for path injection
    #[must_use]
    pub fn as_request_option(&self) -> Option<(InjectInto, &str)> {
        match self {
            Self::Path => None,
            Self::RequestParameter { field_name } => Some((InjectInto::RequestParameter, field_name)),
            Self::Header { field_name } => Some((InjectInto::Header, field_name)),
            Self::BodyData { field_name } => Some((InjectInto::BodyData, field_name)),
            Self::BodyJson { field_name } => Some((InjectInto::BodyJson, field_name)),
        }
    }
}

/// HTTP methods the builder supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    /// Manifest spelling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// One stream of the connector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderStream {
    pub id: String,
    pub name: String,
    pub url_path: String,
    pub http_method: HttpMethod,
    pub primary_key: Vec<String>,
    pub record_selector: RecordSelectorSettings,
    pub request_options: RequestOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paginator: Option<BuilderPaginator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental_sync: Option<BuilderIncrementalSync>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameterized_requests: Option<Vec<ParameterizedRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_streams: Option<Vec<ParentStreamReference>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handler: Option<Vec<BuilderErrorHandler>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformations: Option<Vec<BuilderTransformation>>,
    /// Inline JSON schema as text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub decoder: Decoder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_status: Option<StreamTestStatus>,
    /// Stream values kept verbatim, keyed by JSON pointer relative to the stream
    pub unmodeled: IndexMap<String, Value>,
}

impl BuilderStream {
    /// A new, empty stream
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// How records are picked out of a response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSelectorSettings {
    pub field_path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_condition: Option<String>,
    pub normalize_to_schema: bool,
}

/// Extra parameters, headers and body sent with every request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub request_parameters: Vec<KeyValue>,
    pub request_headers: Vec<KeyValue>,
    pub request_body: RequestBody,
}

/// Request body in one of the shapes the form offers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    JsonList {
        #[serde(default)]
        values: Vec<KeyValue>,
    },
    FormList {
        #[serde(default)]
        values: Vec<KeyValue>,
    },
    JsonFreeform {
        #[serde(default)]
        value: String,
    },
    StringFreeform {
        #[serde(default)]
        value: String,
    },
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::JsonList { values: Vec::new() }
    }
}

/// Pagination settings; the strategy and the two injection options live in
/// one branch here but in separate manifest objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderPaginator {
    pub strategy: PaginationStrategy,
    pub page_token_option: PageTokenOption,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size_option: Option<RequestOption>,
}

/// Pagination strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PaginationStrategy {
    OffsetIncrement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_size: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inject_on_first_request: Option<bool>,
    },
    PageIncrement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_size: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_from_page: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inject_on_first_request: Option<bool>,
    },
    CursorPagination {
        #[serde(default)]
        cursor_value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_condition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_size: Option<Value>,
    },
}

impl PaginationStrategy {
    /// Page size of any strategy
    #[must_use]
    pub fn page_size(&self) -> Option<&Value> {
        match self {
            Self::OffsetIncrement { page_size, .. }
            | Self::PageIncrement { page_size, .. }
            | Self::CursorPagination { page_size, .. } => page_size.as_ref(),
        }
    }

    /// Whether a non-empty page size is configured
    #[must_use]
    pub fn has_page_size(&self) -> bool {
        match self.page_size() {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }
}

/// Datetime-based incremental sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderIncrementalSync {
    #[serde(default)]
    pub cursor_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_format: Option<String>,
    #[serde(default)]
    pub cursor_datetime_formats: Vec<String>,
    pub start_datetime: DatetimeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<DatetimeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_option: Option<RequestOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_option: Option<RequestOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_granularity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookback_window: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_data_feed: Option<bool>,
}

/// Start or end of the synced datetime range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatetimeValue {
    /// Read from the `start_date` / `end_date` config inputs
    UserInput,
    Now,
    Custom {
        #[serde(default)]
        value: String,
        /// Emitted as a `MinMaxDatetime` when set, as a plain string otherwise
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
}

/// Which end of the range a datetime bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatetimeBound {
    Start,
    End,
}

impl DatetimeBound {
    /// Config key read by the `user_input` variant
    #[must_use]
    pub fn config_key(self) -> &'static str {
        match self {
            Self::Start => "start_date",
            Self::End => "end_date",
        }
    }
}

/// Requests repeated once per listed or interpolated value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterizedRequest {
    #[serde(default)]
    pub cursor_field: String,
    pub values: ParameterizedValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_option: Option<RequestOption>,
}

/// Values of a parameterized request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterizedValues {
    List {
        #[serde(default)]
        value: Vec<String>,
    },
    Variable {
        #[serde(default)]
        value: String,
    },
}

/// Partition a stream by the records of another stream
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentStreamReference {
    pub parent_key: String,
    pub partition_field: String,
    /// Form identifier of the parent stream
    pub parent_stream_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_option: Option<RequestOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental_dependency: Option<bool>,
}

/// One retry rule
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderErrorHandler {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_strategy: Option<BackoffStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_filter: Option<ResponseFilter>,
}

/// Backoff between retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackoffStrategy {
    ConstantBackoffStrategy {
        #[serde(default)]
        backoff_time_in_seconds: Value,
    },
    ExponentialBackoffStrategy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        factor: Option<Value>,
    },
    WaitTimeFromHeader {
        #[serde(default)]
        header: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regex: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_waiting_time_in_seconds: Option<Value>,
    },
    WaitUntilTimeFromHeader {
        #[serde(default)]
        header: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regex: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_wait: Option<Value>,
    },
}

/// Actions a response filter may take
pub const FILTER_ACTIONS: &[&str] = &["SUCCESS", "FAIL", "RETRY", "IGNORE", "RATE_LIMITED"];

/// Decides what to do with a matching response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message_contains: Option<String>,
    /// Status codes as typed by the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_codes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

/// Record transformations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuilderTransformation {
    AddFields {
        #[serde(default)]
        fields: Vec<AddedField>,
    },
    RemoveFields {
        #[serde(default)]
        field_pointers: Vec<Vec<String>>,
    },
}

/// A field added to each record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddedField {
    pub path: Vec<String>,
    pub value: String,
}

/// Response decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Decoder {
    #[default]
    JsonDecoder,
    JsonlDecoder,
    XmlDecoder,
    IterableDecoder,
}

impl Decoder {
    /// Tags with a form model
    pub const TAGS: &'static [&'static str] =
        &["JsonDecoder", "JsonlDecoder", "XmlDecoder", "IterableDecoder"];

    /// Parse a manifest tag
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "JsonDecoder" => Some(Self::JsonDecoder),
            "JsonlDecoder" => Some(Self::JsonlDecoder),
            "XmlDecoder" => Some(Self::XmlDecoder),
            "IterableDecoder" => Some(Self::IterableDecoder),
            _ => None,
        }
    }

    /// Manifest tag
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::JsonDecoder => "JsonDecoder",
            Self::JsonlDecoder => "JsonlDecoder",
            Self::XmlDecoder => "XmlDecoder",
            Self::IterableDecoder => "IterableDecoder",
        }
    }
}

/// Outcome of the last test read of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTestStatus {
    pub run_state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_cause: Option<IncompleteCause>,
}

/// Test read progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Complete,
    Incomplete,
}

/// Why a test read stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteCause {
    Failed,
    Canceled,
}

/// Declared type of a user input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Enum,
    Date,
    DateTime,
}

impl InputType {
    /// Whether a testing value of this JSON type fits the input
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String | Self::Enum | Self::Date | Self::DateTime => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
        }
    }
}

/// A user input, declared in the connector spec
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputDefinition {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_type: InputType,
    pub required: bool,
    pub secret: bool,
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Other JSON-schema keywords of the property
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub extra: IndexMap<String, Value>,
}

impl InputDefinition {
    /// A string input with the given key
    #[must_use]
    pub fn new(key: impl Into<String>, input_type: InputType) -> Self {
        Self {
            key: key.into(),
            input_type,
            ..Self::default()
        }
    }

    /// Set the title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the default value
    #[inline]
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark as required
    #[inline]
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as secret
    #[inline]
    #[must_use]
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Read a `connection_specification` property
    #[must_use]
    pub fn from_property(key: &str, property: &Value, required: bool) -> Self {
        let mut extra: IndexMap<String, Value> = property
            .as_object()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let mut take_str = |name: &str| match extra.shift_remove(name) {
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                extra.insert(name.to_string(), other);
                None
            }
            None => None,
        };
        let title = take_str("title");
        let description = take_str("description");
        let json_type = take_str("type");

        let enum_values = match extra.get("enum") {
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => {
                let values = items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                extra.shift_remove("enum");
                Some(values)
            }
            _ => None,
        };

        let input_type = match json_type.as_deref() {
            Some("integer") => InputType::Integer,
            Some("number") => InputType::Number,
            Some("boolean") => InputType::Boolean,
            Some("array") => InputType::Array,
            _ if enum_values.is_some() => InputType::Enum,
            _ => {
                let format = extra.get("format").and_then(Value::as_str);
                let (input_type, pattern) = match format {
                    Some("date") => (InputType::Date, DATE_PATTERN),
                    Some("date-time") => (InputType::DateTime, DATE_TIME_PATTERN),
                    _ => (InputType::String, ""),
                };
                if input_type != InputType::String {
                    extra.shift_remove("format");
                    if extra.get("pattern").and_then(Value::as_str) == Some(pattern) {
                        extra.shift_remove("pattern");
                    }
                }
                input_type
            }
        };
        if let Some(other) = json_type.filter(|t| {
            !matches!(t.as_str(), "string" | "integer" | "number" | "boolean" | "array")
        }) {
            extra.insert("type".to_string(), Value::String(other));
        }

        let secret = matches!(extra.shift_remove("airbyte_secret"), Some(Value::Bool(true)));
        let hidden = matches!(extra.shift_remove("airbyte_hidden"), Some(Value::Bool(true)));
        let default = extra.shift_remove("default");

        Self {
            key: key.to_string(),
            title,
            description,
            input_type,
            required,
            secret,
            hidden,
            default,
            enum_values,
            extra,
        }
    }

    /// Write as a `connection_specification` property
    #[must_use]
    pub fn to_property(&self) -> Value {
        let mut map = Map::new();
        let json_type = match self.input_type {
            InputType::Integer => "integer",
            InputType::Number => "number",
            InputType::Boolean => "boolean",
            InputType::Array => "array",
            InputType::String | InputType::Enum | InputType::Date | InputType::DateTime => "string",
        };
        map.insert("type".to_string(), json!(json_type));
        if let Some(title) = &self.title {
            map.insert("title".to_string(), json!(title));
        }
        if let Some(description) = &self.description {
            map.insert("description".to_string(), json!(description));
        }
        match self.input_type {
            InputType::Date => {
                map.insert("format".to_string(), json!("date"));
                map.insert("pattern".to_string(), json!(DATE_PATTERN));
            }
            InputType::DateTime => {
                map.insert("format".to_string(), json!("date-time"));
                map.insert("pattern".to_string(), json!(DATE_TIME_PATTERN));
            }
            _ => {}
        }
        if let Some(values) = &self.enum_values {
            map.insert("enum".to_string(), json!(values));
        }
        if let Some(default) = &self.default {
            map.insert("default".to_string(), default.clone());
        }
        if self.secret {
            map.insert("airbyte_secret".to_string(), json!(true));
        }
        if self.hidden {
            map.insert("airbyte_hidden".to_string(), json!(true));
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// Form values plus the state the form keeps beside them
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormState {
    pub values: BuilderFormValues,
    pub testing_values: IndexMap<String, Value>,
    /// Dotted form paths holding values fabricated by a variant switch
    pub placeholders: BTreeSet<String>,
}

impl FormState {
    /// Wrap form values with no testing values
    #[must_use]
    pub fn new(values: BuilderFormValues) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unknown_authenticator_kept_raw() {
        let raw = json!({"type": "SessionTokenAuthenticator", "login_requester": {}});
        let auth: Authenticator = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(auth, Authenticator::Unmodeled(raw.clone()));
        assert_eq!(serde_json::to_value(&auth).unwrap(), raw);
    }

    #[test]
    fn test_known_authenticator_with_bad_body_is_an_error() {
        let raw = json!({"type": "BearerAuthenticator", "api_token": 3});
        assert!(serde_json::from_value::<Authenticator>(raw).is_err());
    }

    #[test]
    fn test_page_token_option_tagged_by_inject_into() {
        let option: PageTokenOption =
            serde_json::from_value(json!({"inject_into": "header", "field_name": "X-Page"})).unwrap();
        assert_eq!(option.as_request_option(), Some((InjectInto::Header, "X-Page")));
        let path: PageTokenOption = serde_json::from_value(json!({"inject_into": "path"})).unwrap();
        assert_eq!(path, PageTokenOption::Path);
    }

    #[test]
    fn test_cascade_clears_page_size_option() {
        let mut values = BuilderFormValues::default();
        let mut stream = BuilderStream::new("0", "users");
        stream.paginator = Some(BuilderPaginator {
            strategy: PaginationStrategy::OffsetIncrement {
                page_size: Some(json!("")),
                inject_on_first_request: None,
            },
            page_token_option: PageTokenOption::Path,
            page_size_option: Some(RequestOption {
                inject_into: InjectInto::RequestParameter,
                field_name: "limit".to_string(),
            }),
        });
        values.streams.push(stream);
        values.cascade();
        assert_eq!(values.streams[0].paginator.as_ref().unwrap().page_size_option, None);
    }

    #[test]
    fn test_input_property_conversion() {
        let property = json!({
            "type": "string",
            "title": "Start date",
            "format": "date-time",
            "pattern": DATE_TIME_PATTERN,
            "order": 2
        });
        let input = InputDefinition::from_property("start", &property, true);
        assert_eq!(input.input_type, InputType::DateTime);
        assert_eq!(input.extra.get("order"), Some(&json!(2)));
        assert_eq!(input.to_property(), property);
    }

    #[test]
    fn test_enum_and_secret_property() {
        let property = json!({"type": "string", "enum": ["eu", "us"], "airbyte_secret": true});
        let input = InputDefinition::from_property("region", &property, false);
        assert_eq!(input.input_type, InputType::Enum);
        assert!(input.secret);
        assert_eq!(input.enum_values, Some(vec!["eu".to_string(), "us".to_string()]));
        assert_eq!(input.to_property(), property);
    }

    #[test]
    fn test_input_type_accepts() {
        assert!(InputType::Integer.accepts(&json!(3)));
        assert!(!InputType::Integer.accepts(&json!(3.5)));
        assert!(InputType::Number.accepts(&json!(3.5)));
        assert!(!InputType::Boolean.accepts(&json!("true")));
        assert!(InputType::Date.accepts(&json!("2024-01-01")));
    }

    #[test]
    fn test_next_stream_id() {
        let mut values = BuilderFormValues::default();
        assert_eq!(values.next_stream_id(), "0");
        values.streams.push(BuilderStream::new("0", "a"));
        values.streams.push(BuilderStream::new("4", "b"));
        assert_eq!(values.next_stream_id(), "5");
    }
}
