//! Property tests for renames, variant switches and derived inputs

use cbs_engine::inferred::inferred_keys;
use cbs_engine::mapper::{form_to_manifest, manifest_to_form};
use cbs_engine::prelude::*;
use cbs_engine::UnionField;
use proptest::prelude::*;
use serde_json::json;

const AUTH_TAGS: &[&str] = &[
    "NoAuth",
    "ApiKeyAuthenticator",
    "BearerAuthenticator",
    "BasicHttpAuthenticator",
    "OAuthAuthenticator",
];

const RESERVED: &[&str] = &[
    "api_key",
    "username",
    "password",
    "client_id",
    "client_secret",
    "client_refresh_token",
    "oauth_access_token",
    "oauth_token_expiry_date",
    "start_date",
    "end_date",
];

fn key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}".prop_filter("reserved", |k| !RESERVED.contains(&k.as_str()))
}

fn engine_with_stream() -> SyncEngine {
    let mut engine = SyncEngine::new(EngineConfig::new().with_schema_validation(false)).unwrap();
    engine.apply_form_edit("global.url_base", json!("https://api.example.com")).unwrap();
    engine.add_stream("items");
    engine
}

#[derive(Debug, Clone)]
enum Op {
    Create(String),
    Delete(String),
    Auth(&'static str),
    Incremental(bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        key().prop_map(Op::Create),
        key().prop_map(Op::Delete),
        prop::sample::select(AUTH_TAGS).prop_map(Op::Auth),
        any::<bool>().prop_map(Op::Incremental),
    ]
}

fn apply(engine: &mut SyncEngine, op: &Op) {
    let _ = match op {
        Op::Create(key) => engine
            .create_input(InputDefinition::new(key.as_str(), InputType::String).with_default(json!("d")))
            .map(|_| ()),
        Op::Delete(key) => engine.delete_input(key).map(|_| ()),
        Op::Auth(tag) => engine.select_variant("global.authenticator", tag, None).map(|_| ()),
        Op::Incremental(enabled) => engine
            .set_section_enabled(0, StreamSection::IncrementalSync, *enabled)
            .map(|_| ()),
    };
}

proptest! {
    #[test]
    fn rename_leaves_no_reference_to_the_old_key(old in key(), new in key()) {
        prop_assume!(old != new);
        let mut engine = engine_with_stream();
        engine.create_input(InputDefinition::new(old.as_str(), InputType::String)).unwrap();
        engine
            .apply_form_edit("streams.0.url_path", json!(format!("/{{{{ config['{old}'] }}}}/items")))
            .unwrap();
        engine
            .apply_form_edit(
                "streams.0.request_options.request_headers",
                json!([
                    ["X-Key", format!("{{{{ config.{old} }}}}")],
                    ["X-Pair", format!("{{{{ [config.{old}, 1]|first }}}}")],
                    ["X-Joined", format!("{{{{ config.{old}~'-x' }}}}")],
                ]),
            )
            .unwrap();

        engine
            .update_input(&old, InputDefinition::new(new.as_str(), InputType::String))
            .unwrap();

        let requester = &engine.manifest()["streams"][0]["retriever"]["requester"];
        prop_assert_eq!(&requester["path"], &json!(format!("/{{{{ config['{new}'] }}}}/items")));
        prop_assert_eq!(
            &requester["request_headers"]["X-Key"],
            &json!(format!("{{{{ config.{new} }}}}"))
        );
        prop_assert_eq!(
            &requester["request_headers"]["X-Pair"],
            &json!(format!("{{{{ [config.{new}, 1]|first }}}}"))
        );
        prop_assert_eq!(
            &requester["request_headers"]["X-Joined"],
            &json!(format!("{{{{ config.{new}~'-x' }}}}"))
        );
        let properties = &engine.manifest()["spec"]["connection_specification"]["properties"];
        prop_assert!(properties.get(&old).is_none());
        prop_assert!(properties.get(&new).is_some());
    }

    #[test]
    fn switching_back_restores_the_default_shape(
        first in prop::sample::select(AUTH_TAGS),
        second in prop::sample::select(AUTH_TAGS),
    ) {
        let mut engine = engine_with_stream();
        engine.select_variant("global.authenticator", first, None).unwrap();
        let original = engine.values().global.authenticator.clone();
        let placeholders = engine.state().placeholders.clone();

        engine.select_variant("global.authenticator", second, None).unwrap();
        engine.select_variant("global.authenticator", first, None).unwrap();

        prop_assert_eq!(&engine.values().global.authenticator, &original);
        prop_assert_eq!(&engine.state().placeholders, &placeholders);
        prop_assert!(UnionField::Authenticator.tags().contains(&first));
    }

    #[test]
    fn testing_values_track_the_effective_inputs(ops in prop::collection::vec(op(), 0..12)) {
        let mut engine = engine_with_stream();
        for op in &ops {
            apply(&mut engine, op);
        }
        let effective: Vec<String> = engine.effective_inputs().into_iter().map(|i| i.key).collect();
        for key in engine.state().testing_values.keys() {
            prop_assert!(effective.contains(key), "stale testing value {}", key);
        }
        for input in &engine.values().inputs {
            prop_assert_eq!(engine.state().testing_values.get(&input.key), Some(&json!("d")));
        }
    }

    #[test]
    fn inferred_inputs_depend_only_on_the_form(
        tag in prop::sample::select(AUTH_TAGS),
        incremental in any::<bool>(),
    ) {
        let mut engine = engine_with_stream();
        engine.select_variant("global.authenticator", tag, None).unwrap();
        engine
            .set_section_enabled(0, StreamSection::IncrementalSync, incremental)
            .unwrap();

        let values = engine.values();
        prop_assert_eq!(inferred_keys(values), inferred_keys(&values.clone()));

        let reloaded = manifest_to_form(&form_to_manifest(values));
        prop_assert_eq!(inferred_keys(&reloaded.values), inferred_keys(values));
        prop_assert_eq!(
            inferred_keys(values).contains(&"start_date"),
            incremental
        );
    }
}
