//! Config references inside interpolated strings
//!
//! A reference is `config['key']`, `config["key"]` or `config.key` inside
//! `{{ ... }}`. Renames rewrite string leaves of the parsed tree only, so
//! text outside interpolation blocks is never touched.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on rewrite passes over one string
const MAX_REWRITE_PASSES: usize = 16;

static WHOLE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*\{\{\s*config((?:\[\s*(?:'[^']*'|"[^"]*")\s*\]|\.[A-Za-z0-9_\-]+)+)\s*\}\}\s*$"#,
    )
    .expect("WHOLE_REFERENCE is a valid regex pattern")
});

static REFERENCE_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[\s*'([^']*)'\s*\]|\[\s*"([^"]*)"\s*\]|\.([A-Za-z0-9_\-]+)"#)
        .expect("REFERENCE_SEGMENT is a valid regex pattern")
});

/// Value is a single `{{ ... }}` block
pub static INTERPOLATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{.+\}\}$").expect("INTERPOLATION_PATTERN is a valid regex pattern"));

/// The config path a string refers to, when the whole string is one reference
///
/// Nested lookups resolve to a dotted path: `{{ config['a']['b'] }}` gives
/// `a.b`.
#[must_use]
pub fn extract_referenced_key(value: &str) -> Option<String> {
    let captures = WHOLE_REFERENCE.captures(value)?;
    let rest = captures.get(1)?.as_str();
    let segments: Vec<&str> = REFERENCE_SEGMENT
        .captures_iter(rest)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map(|m| m.as_str())
        .collect();
    if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments.join("."))
}

/// Whether the string is exactly one reference to a config value
#[inline]
#[must_use]
pub fn is_config_reference(value: &str) -> bool {
    extract_referenced_key(value).is_some()
}

/// The conventional reference to a top-level config key
#[must_use]
pub fn config_reference(key: &str) -> String {
    format!("{{{{ config['{key}'] }}}}")
}

/// Rewrite references to `old_key` so they name `new_key`
///
/// Only top-level keys are rewritten, in either delimiter style, and the
/// original style is kept. Text outside `{{ ... }}` is left alone.
#[must_use]
pub fn rewrite_key_references(text: &str, old_key: &str, new_key: &str) -> String {
    if old_key == new_key || old_key.is_empty() || !text.contains("{{") {
        return text.to_string();
    }
    let key = regex::escape(old_key);
    let (Ok(dotted), Ok(bracketed)) = (
        Regex::new(&format!(
            r"(?P<prefix>\{{\{{(?:[^}}]*?[^A-Za-z0-9_.}}])?config\.)(?P<key>{key})(?P<suffix>(?:[^A-Za-z0-9_\-}}][^}}]*?)?\}}\}})"
        )),
        Regex::new(&format!(
            r#"(?P<prefix>\{{\{{(?:[^}}]*?[^A-Za-z0-9_.}}])?config\[\s*(?:'|\\"|"))(?P<key>{key})(?P<suffix>(?:'|\\"|")\s*\][^}}]*?\}}\}})"#
        )),
    ) else {
        return text.to_string();
    };

    let replace = |caps: &Captures<'_>| format!("{}{new_key}{}", &caps["prefix"], &caps["suffix"]);
    let mut current = text.to_string();
    for _ in 0..MAX_REWRITE_PASSES {
        let next = dotted.replace_all(&current, replace).into_owned();
        let next = bracketed.replace_all(&next, replace).into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Rewrite references in every string leaf of a tree, returning how many
/// leaves changed
pub fn rewrite_references_in_tree(value: &mut Value, old_key: &str, new_key: &str) -> usize {
    match value {
        Value::String(text) => {
            let rewritten = rewrite_key_references(text, old_key, new_key);
            if rewritten == *text {
                0
            } else {
                *text = rewritten;
                1
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .map(|item| rewrite_references_in_tree(item, old_key, new_key))
            .sum(),
        Value::Object(map) => map
            .values_mut()
            .map(|item| rewrite_references_in_tree(item, old_key, new_key))
            .sum(),
        _ => 0,
    }
}

/// A config path feeding one field of an OAuth authenticator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPath {
    /// Dotted config path, e.g. `credentials.access_token`
    pub config_path: String,
    /// Dotted location of the field in the manifest
    pub object_path: String,
}

/// Config paths behind every OAuth token field in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OAuthTokenPaths {
    pub access_token_values: Vec<TokenPath>,
    pub refresh_tokens: Vec<TokenPath>,
}

/// Find the config paths used by `access_token_value` and `refresh_token`
/// of every `OAuthAuthenticator` in the document
#[must_use]
pub fn find_oauth_token_paths(manifest: &Value) -> OAuthTokenPaths {
    let mut found = OAuthTokenPaths::default();
    let mut path = Vec::new();
    collect_token_paths(manifest, &mut path, &mut found);
    found
}

fn collect_token_paths(value: &Value, path: &mut Vec<String>, found: &mut OAuthTokenPaths) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("OAuthAuthenticator") {
                let lookups = [
                    ("access_token_value", &mut found.access_token_values),
                    ("refresh_token", &mut found.refresh_tokens),
                ];
                for (field, target) in lookups {
                    let config_path = map
                        .get(field)
                        .and_then(Value::as_str)
                        .and_then(extract_referenced_key);
                    if let Some(config_path) = config_path {
                        let mut object_path = path.clone();
                        object_path.push(field.to_string());
                        target.push(TokenPath {
                            config_path,
                            object_path: object_path.join("."),
                        });
                    }
                }
            }
            for (key, child) in map {
                path.push(key.clone());
                collect_token_paths(child, path, found);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                collect_token_paths(child, path, found);
                path.pop();
            }
        }
        _ => {}
    }
}
