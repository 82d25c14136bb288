//! Inputs implied by the selected authenticator and incremental-sync
//! variants
//!
//! The table is fixed and ordered, so the derivation is a pure function of
//! the form: auth inputs first, then `start_date`, then `end_date`.

use crate::form::{
    BuilderAuthenticator, BuilderFormValues, DatetimeBound, DatetimeValue, GrantType,
    InputDefinition, InputType, OAuthSettings,
};
use crate::references::config_reference;

/// An authenticator field filled from a fixed config key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferredField {
    /// Field name on the authenticator
    pub field: &'static str,
    /// Config key the field reads
    pub key: &'static str,
}

impl InferredField {
    const fn new(field: &'static str, key: &'static str) -> Self {
        Self { field, key }
    }

    /// Expected value of the authenticator field
    #[must_use]
    pub fn reference(&self) -> String {
        config_reference(self.key)
    }
}

/// Authenticator fields that imply inputs, for a given authenticator
#[must_use]
pub fn auth_inferred_fields(auth: &BuilderAuthenticator) -> Vec<InferredField> {
    match auth {
        BuilderAuthenticator::NoAuth => Vec::new(),
        BuilderAuthenticator::ApiKeyAuthenticator { .. }
        | BuilderAuthenticator::BearerAuthenticator { .. } => {
            vec![InferredField::new("api_token", "api_key")]
        }
        BuilderAuthenticator::BasicHttpAuthenticator { .. } => vec![
            InferredField::new("username", "username"),
            InferredField::new("password", "password"),
        ],
        BuilderAuthenticator::OAuthAuthenticator(settings) => oauth_inferred_fields(settings),
    }
}

fn oauth_inferred_fields(settings: &OAuthSettings) -> Vec<InferredField> {
    let mut fields = vec![
        InferredField::new("client_id", "client_id"),
        InferredField::new("client_secret", "client_secret"),
    ];
    if settings.effective_grant_type() == GrantType::RefreshToken {
        fields.push(InferredField::new("refresh_token", "client_refresh_token"));
    }
    if settings.refresh_token_updater.is_some() {
        fields.push(InferredField::new("access_token_value", "oauth_access_token"));
        fields.push(InferredField::new("token_expiry_date", "oauth_token_expiry_date"));
    }
    fields
}

/// Default definition of an inferred input key
#[must_use]
pub fn inferred_definition(key: &str) -> InputDefinition {
    let base = InputDefinition::new(key, InputType::String).required();
    match key {
        "api_key" => base.with_title("API Key").secret(),
        "username" => base.with_title("Username"),
        "password" => base.with_title("Password").secret(),
        "client_id" => base.with_title("Client ID").secret(),
        "client_secret" => base.with_title("Client secret").secret(),
        "client_refresh_token" => base.with_title("Refresh token").secret(),
        "oauth_access_token" => {
            let mut input = base.with_title("Access token").secret();
            input.description = Some(
                "The current access token. This field might be overridden by the connector based on the token refresh endpoint response."
                    .to_string(),
            );
            input
        }
        "oauth_token_expiry_date" => {
            let mut input = InputDefinition::new(key, InputType::DateTime)
                .required()
                .with_title("Token expiry date");
            input.description = Some(
                "The date the current access token expires in. This field might be overridden by the connector based on the token refresh endpoint response."
                    .to_string(),
            );
            input
        }
        "start_date" => InputDefinition::new(key, InputType::DateTime)
            .required()
            .with_title("Start date"),
        "end_date" => InputDefinition::new(key, InputType::DateTime)
            .required()
            .with_title("End date"),
        _ => base,
    }
}

/// Whether any stream reads `bound` from user input
#[must_use]
pub fn uses_user_input(values: &BuilderFormValues, bound: DatetimeBound) -> bool {
    values.streams.iter().any(|stream| {
        stream.incremental_sync.as_ref().is_some_and(|sync| {
            let value = match bound {
                DatetimeBound::Start => Some(&sync.start_datetime),
                DatetimeBound::End => sync.end_datetime.as_ref(),
            };
            value == Some(&DatetimeValue::UserInput)
        })
    })
}

/// Keys implied by the current form, in table order
#[must_use]
pub fn inferred_keys(values: &BuilderFormValues) -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = values
        .global
        .authenticator
        .modeled()
        .map(auth_inferred_fields)
        .unwrap_or_default()
        .into_iter()
        .map(|f| f.key)
        .collect();
    for bound in [DatetimeBound::Start, DatetimeBound::End] {
        if uses_user_input(values, bound) {
            keys.push(bound.config_key());
        }
    }
    keys
}

/// Inputs implied by the current form, with overrides applied
#[must_use]
pub fn inferred_inputs(values: &BuilderFormValues) -> Vec<InputDefinition> {
    inferred_keys(values)
        .into_iter()
        .map(|key| match values.inferred_input_overrides.get(key) {
            Some(property) => InputDefinition::from_property(key, property, true),
            None => inferred_definition(key),
        })
        .collect()
}

/// Explicit inputs followed by inferred inputs
#[must_use]
pub fn effective_inputs(values: &BuilderFormValues) -> Vec<InputDefinition> {
    let mut inputs = values.inputs.clone();
    inputs.extend(inferred_inputs(values));
    inputs
}

/// Whether a key is taken by an explicit or inferred input
#[must_use]
pub fn is_key_in_use(values: &BuilderFormValues, key: &str) -> bool {
    values.inputs.iter().any(|i| i.key == key) || inferred_keys(values).iter().any(|k| *k == key)
}

/// Property written for an inferred input
#[must_use]
pub fn inferred_property(values: &BuilderFormValues, key: &str) -> serde_json::Value {
    values
        .inferred_input_overrides
        .get(key)
        .cloned()
        .unwrap_or_else(|| inferred_definition(key).to_property())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{Authenticator, BuilderIncrementalSync, BuilderStream, RefreshTokenUpdater};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn with_auth(auth: BuilderAuthenticator) -> BuilderFormValues {
        let mut values = BuilderFormValues::default();
        values.global.authenticator = Authenticator::Modeled(auth);
        values
    }

    #[test]
    fn test_client_credentials_oauth() {
        let values = with_auth(BuilderAuthenticator::OAuthAuthenticator(OAuthSettings {
            grant_type: Some(GrantType::ClientCredentials),
            ..OAuthSettings::default()
        }));
        assert_eq!(inferred_keys(&values), vec!["client_id", "client_secret"]);
    }

    #[test]
    fn test_refresh_token_oauth_with_updater() {
        let values = with_auth(BuilderAuthenticator::OAuthAuthenticator(OAuthSettings {
            refresh_token_updater: Some(RefreshTokenUpdater::default()),
            ..OAuthSettings::default()
        }));
        assert_eq!(
            inferred_keys(&values),
            vec![
                "client_id",
                "client_secret",
                "client_refresh_token",
                "oauth_access_token",
                "oauth_token_expiry_date"
            ]
        );
    }

    #[test]
    fn test_unmodeled_auth_infers_nothing() {
        let mut values = BuilderFormValues::default();
        values.global.authenticator = Authenticator::Unmodeled(json!({"type": "CustomAuthenticator"}));
        assert!(inferred_inputs(&values).is_empty());
    }

    #[test]
    fn test_incremental_user_input_dates() {
        let mut values = with_auth(BuilderAuthenticator::BearerAuthenticator {
            api_token: config_reference("api_key"),
        });
        let mut stream = BuilderStream::new("0", "events");
        stream.incremental_sync = Some(BuilderIncrementalSync {
            cursor_field: "updated_at".to_string(),
            datetime_format: None,
            cursor_datetime_formats: Vec::new(),
            start_datetime: DatetimeValue::UserInput,
            end_datetime: Some(DatetimeValue::Now),
            start_time_option: None,
            end_time_option: None,
            step: None,
            cursor_granularity: None,
            lookback_window: None,
            is_data_feed: None,
        });
        values.streams.push(stream);
        assert_eq!(inferred_keys(&values), vec!["api_key", "start_date"]);
        assert_eq!(inferred_inputs(&values)[1].input_type, InputType::DateTime);
    }

    #[test]
    fn test_override_replaces_definition() {
        let mut values = with_auth(BuilderAuthenticator::BearerAuthenticator {
            api_token: config_reference("api_key"),
        });
        values
            .inferred_input_overrides
            .insert("api_key".to_string(), json!({"type": "string", "title": "Token", "airbyte_secret": true}));
        let inputs = inferred_inputs(&values);
        assert_eq!(inputs[0].title.as_deref(), Some("Token"));
        assert!(inputs[0].required);
    }

    #[test]
    fn test_key_in_use() {
        let mut values = with_auth(BuilderAuthenticator::BasicHttpAuthenticator {
            username: config_reference("username"),
            password: config_reference("password"),
        });
        values.inputs.push(InputDefinition::new("region", InputType::String));
        assert!(is_key_in_use(&values, "password"));
        assert!(is_key_in_use(&values, "region"));
        assert!(!is_key_in_use(&values, "api_key"));
    }
}
