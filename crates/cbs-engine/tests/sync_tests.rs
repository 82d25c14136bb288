//! End-to-end form/manifest sync scenarios

use cbs_engine::mapper::{form_to_manifest, manifest_to_form};
use cbs_engine::prelude::*;
use cbs_engine::BuilderAuthenticator;
use cbs_test_utils::{
    bearer_manifest, error_handling_manifest, incremental_manifest, mixed_auth_manifest, oauth_token_manifest,
    paginated_manifest, partitioned_manifest, simple_manifest,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn offline() -> EngineConfig {
    EngineConfig::new().with_schema_validation(false)
}

#[test]
fn test_fixtures_round_trip_unchanged() {
    for manifest in [simple_manifest(), bearer_manifest(), oauth_token_manifest(), incremental_manifest()] {
        let state = manifest_to_form(&manifest);
        assert!(state.values.unmodeled.is_empty(), "{:?}", state.values.unmodeled);
        assert_eq!(form_to_manifest(&state.values), manifest);
    }
}

#[test]
fn test_modeled_sections_round_trip_unchanged() {
    for manifest in [paginated_manifest(), partitioned_manifest(), error_handling_manifest()] {
        let state = manifest_to_form(&manifest);
        assert!(state.values.unmodeled.is_empty(), "{:?}", state.values.unmodeled);
        for stream in &state.values.streams {
            assert!(stream.unmodeled.is_empty(), "{}: {:?}", stream.name, stream.unmodeled);
        }
        assert_eq!(form_to_manifest(&state.values), manifest);
    }
}

#[test]
fn test_modeled_sections_land_in_the_form() {
    let values = manifest_to_form(&paginated_manifest()).values;
    assert!(values.streams[0].paginator.as_ref().unwrap().page_size_option.is_some());

    let values = manifest_to_form(&partitioned_manifest()).values;
    assert_eq!(values.streams[1].parameterized_requests.as_ref().map(Vec::len), Some(1));
    let parents = values.streams[2].parent_streams.as_ref().unwrap();
    assert_eq!(parents[0].parent_stream_reference, "0");

    let values = manifest_to_form(&error_handling_manifest()).values;
    assert_eq!(values.streams[0].error_handler.as_ref().map(Vec::len), Some(2));
    assert_eq!(values.streams[0].transformations.as_ref().map(Vec::len), Some(2));
    assert!(values.streams[0].schema.is_some());
}

#[test]
fn test_mixed_auth_round_trips_without_inventing_an_authenticator() {
    let manifest = mixed_auth_manifest();
    let state = manifest_to_form(&manifest);
    let keys: Vec<&str> = state.values.streams[1].unmodeled.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["/retriever/requester/authenticator"]);

    let derived = form_to_manifest(&state.values);
    assert!(derived["streams"][1]["retriever"]["requester"].get("authenticator").is_none());
    assert_eq!(derived, manifest);
}

#[test]
fn test_bearer_manifest_is_fully_modeled() {
    let state = manifest_to_form(&bearer_manifest());
    assert_eq!(
        state.values.global.authenticator.modeled(),
        Some(&BuilderAuthenticator::BearerAuthenticator {
            api_token: "{{ config['api_key'] }}".to_string()
        })
    );
    assert!(state.values.inputs.is_empty());
    assert!(state.values.streams[0].unmodeled.is_empty());
}

#[test]
fn test_rename_rewrites_every_reference() {
    let mut engine = SyncEngine::from_manifest(offline(), &oauth_token_manifest()).unwrap();
    engine.set_testing_value("token", json!("s3cret"));

    let mut renamed = engine.values().inputs[0].clone();
    assert_eq!(renamed.key, "token");
    renamed.key = "access_tok".to_string();
    engine.update_input("token", renamed).unwrap();

    let manifest = engine.manifest();
    let requester = &manifest["streams"][0]["retriever"]["requester"];
    assert_eq!(
        requester["authenticator"]["access_token_value"],
        json!("{{ config['access_tok'] }}")
    );
    assert_eq!(requester["request_headers"]["X-Token"], json!("{{ config.access_tok }}"));

    let properties = &manifest["spec"]["connection_specification"]["properties"];
    assert!(properties.get("token").is_none());
    assert!(properties.get("access_tok").is_some());
    assert_eq!(
        manifest["spec"]["connection_specification"]["required"],
        json!(["access_tok", "client_id", "client_secret"])
    );

    assert_eq!(engine.state().testing_values.get("access_tok"), Some(&json!("s3cret")));
    assert!(engine.state().testing_values.get("token").is_none());
}

#[test]
fn test_rename_onto_inferred_key_rejected() {
    let mut engine = SyncEngine::from_manifest(offline(), &oauth_token_manifest()).unwrap();
    let before = engine.manifest().clone();
    let mut renamed = engine.values().inputs[0].clone();
    renamed.key = "client_id".to_string();

    let err = engine.update_input("token", renamed).unwrap_err();
    assert!(matches!(err, EditError::DuplicateKey(_)));
    assert_eq!(engine.manifest(), &before);
}

#[test]
fn test_incremental_toggle_on_and_off() {
    let mut engine = SyncEngine::from_manifest(offline(), &simple_manifest()).unwrap();
    assert!(engine.manifest().get("spec").is_none());

    engine.set_section_enabled(0, StreamSection::IncrementalSync, true).unwrap();
    let keys: Vec<String> = engine.effective_inputs().into_iter().map(|i| i.key).collect();
    assert_eq!(keys, vec!["start_date"]);
    assert_eq!(
        engine.manifest()["spec"]["connection_specification"]["required"],
        json!(["start_date"])
    );
    assert!(engine
        .validation()
        .has_error("streams.0.incremental_sync.cursor_field", ErrorKind::Incomplete));
    assert!(engine.validation().has_error("testing_values.start_date", ErrorKind::Required));

    engine.set_testing_value("start_date", json!("2024-01-01T00:00:00Z"));
    engine.set_section_enabled(0, StreamSection::IncrementalSync, false).unwrap();
    assert!(engine.manifest().get("spec").is_none());
    assert!(engine.manifest()["streams"][0].get("incremental_sync").is_none());
    assert!(engine.state().testing_values.is_empty());
    assert!(engine.effective_inputs().is_empty());
}

#[test]
fn test_reload_keeps_testing_values_of_surviving_inputs() {
    let mut engine = SyncEngine::from_manifest(offline(), &bearer_manifest()).unwrap();
    engine.set_testing_value("api_key", json!("k"));
    engine.load_manifest(&oauth_token_manifest());
    assert!(engine.state().testing_values.get("api_key").is_none());

    engine.set_testing_value("client_id", json!("cid"));
    engine.load_manifest(&oauth_token_manifest());
    assert_eq!(engine.state().testing_values.get("client_id"), Some(&json!("cid")));
}

#[test]
fn test_unknown_variant_rejected_without_change() {
    let mut engine = SyncEngine::from_manifest(offline(), &bearer_manifest()).unwrap();
    let revision = engine.revision();
    let err = engine
        .select_variant("global.authenticator", "SessionTokenAuthenticator", None)
        .unwrap_err();
    assert!(matches!(err, EditError::UnknownVariant(_)));
    assert_eq!(engine.revision(), revision);
}

#[test]
fn test_export_yaml_leads_with_version() {
    let engine = SyncEngine::from_manifest(offline(), &incremental_manifest()).unwrap();
    let yaml = engine.export_yaml().unwrap();
    assert!(yaml.starts_with("version:"));
    assert!(yaml.contains("DatetimeBasedCursor"));
}

#[test]
fn test_schema_validation_with_bundled_schema() {
    let engine = SyncEngine::from_manifest(EngineConfig::new(), &bearer_manifest()).unwrap();
    assert!(!engine.validation().has_errors_in(Section::Global));
    assert!(engine.validation().has_error("testing_values.api_key", ErrorKind::Required));
}

#[test]
fn test_oauth_from_empty_form_then_rename() {
    let mut engine = SyncEngine::new(offline()).unwrap();
    engine.select_variant("global.authenticator", "OAuthAuthenticator", None).unwrap();
    let keys: Vec<String> = engine.inferred_inputs().into_iter().map(|i| i.key).collect();
    assert_eq!(keys, vec!["client_id", "client_secret"]);

    engine.create_input(InputDefinition::new("token", InputType::String)).unwrap();
    engine
        .apply_form_edit("global.authenticator.access_token_value", json!("{{ config['token'] }}"))
        .unwrap();
    engine.set_testing_value("token", json!("abc"));

    engine
        .update_input("token", InputDefinition::new("access_tok", InputType::String))
        .unwrap();
    assert_eq!(
        engine.values().global.authenticator.modeled(),
        Some(&BuilderAuthenticator::OAuthAuthenticator(cbs_engine::form::OAuthSettings {
            client_id: "{{ config['client_id'] }}".to_string(),
            client_secret: "{{ config['client_secret'] }}".to_string(),
            grant_type: Some(cbs_engine::form::GrantType::ClientCredentials),
            access_token_value: Some("{{ config['access_tok'] }}".to_string()),
            ..Default::default()
        }))
    );
    assert_eq!(engine.state().testing_values.get("access_tok"), Some(&json!("abc")));
}
