//! Testing values kept in lock-step with the effective input set

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::form::{InputDefinition, InputType};

/// An input key that changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRename {
    pub previous_key: String,
    pub new_key: String,
}

impl KeyRename {
    /// Rename `previous_key` to `new_key`
    #[must_use]
    pub fn new(previous_key: impl Into<String>, new_key: impl Into<String>) -> Self {
        Self {
            previous_key: previous_key.into(),
            new_key: new_key.into(),
        }
    }
}

/// Initial testing value of a freshly declared input
#[must_use]
pub fn initial_value(input: &InputDefinition) -> Option<Value> {
    match (&input.default, input.input_type) {
        (Some(default), _) => Some(default.clone()),
        (None, InputType::Boolean) => Some(Value::Bool(false)),
        (None, _) => None,
    }
}

fn is_compatible(input: &InputDefinition, value: &Value) -> bool {
    if !input.input_type.accepts(value) {
        return false;
    }
    match (&input.enum_values, value) {
        (Some(options), Value::String(s)) => options.contains(s),
        _ => true,
    }
}

/// Reconcile testing values with a change of the effective input set
///
/// Values of removed inputs are dropped, new inputs get their initial
/// value, and renamed inputs keep their value when it still fits the
/// input's type.
#[must_use]
pub fn sync_testing_values(
    old_inputs: &[InputDefinition],
    new_inputs: &[InputDefinition],
    testing_values: &IndexMap<String, Value>,
    renames: &[KeyRename],
) -> IndexMap<String, Value> {
    let old_keys: Vec<&str> = old_inputs.iter().map(|i| i.key.as_str()).collect();
    let new_by_key: IndexMap<&str, &InputDefinition> =
        new_inputs.iter().map(|i| (i.key.as_str(), i)).collect();

    let renames: Vec<&KeyRename> = renames
        .iter()
        .filter(|r| {
            r.previous_key != r.new_key
                && old_keys.contains(&r.previous_key.as_str())
                && new_by_key.contains_key(r.new_key.as_str())
        })
        .collect();

    let mut result = testing_values.clone();

    for rename in &renames {
        let value = result.shift_remove(&rename.previous_key);
        let input = new_by_key[rename.new_key.as_str()];
        match value.filter(|v| is_compatible(input, v)).or_else(|| initial_value(input)) {
            Some(value) => {
                result.insert(rename.new_key.clone(), value);
            }
            None => {
                result.shift_remove(&rename.new_key);
            }
        }
    }

    let renamed_from = |key: &str| renames.iter().any(|r| r.previous_key == key);
    let renamed_to = |key: &str| renames.iter().any(|r| r.new_key == key);

    for key in &old_keys {
        if !new_by_key.contains_key(key) && !renamed_from(key) {
            result.shift_remove(*key);
        }
    }

    for (key, input) in &new_by_key {
        if old_keys.contains(key) || renamed_to(key) {
            continue;
        }
        match initial_value(input) {
            Some(value) => {
                result.insert((*key).to_string(), value);
            }
            None => {
                result.shift_remove(*key);
            }
        }
    }

    result
}
