//! Manifest document model
//!
//! A [`ManifestDocument`] wraps the JSON tree of a declarative connector
//! manifest. It parses from JSON or YAML, addresses values by JSON pointer
//! or [`FieldPath`], and serializes back with the conventional root key
//! order so that exported YAML reads the way people author it.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::hash::ManifestHash;
use crate::path::{FieldPath, PathError};

/// Root keys in the order they are written out. Unlisted keys follow in
/// their existing order.
pub const ROOT_KEY_ORDER: &[&str] = &[
    "version",
    "type",
    "description",
    "check",
    "definitions",
    "streams",
    "dynamic_streams",
    "spec",
    "metadata",
    "schemas",
];

/// A parsed manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDocument {
    value: Value,
}

impl ManifestDocument {
    /// Wrap an existing JSON tree
    #[inline]
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Parse from JSON string
    ///
    /// # Errors
    /// Returns error if JSON is invalid
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::new(value))
    }

    /// Parse from YAML string
    ///
    /// # Errors
    /// Returns error if YAML is invalid
    pub fn from_yaml(yaml: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Ok(Self::new(value))
    }

    /// Parse JSON when the text looks like a JSON object, YAML otherwise
    ///
    /// # Errors
    /// Returns error if the text is neither
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        if text.trim_start().starts_with('{') {
            Self::from_json(text)
        } else {
            Self::from_yaml(text)
        }
    }

    /// Create from typed struct
    ///
    /// # Errors
    /// Returns error if the value cannot be represented as JSON
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, DocumentError> {
        let json = serde_json::to_value(value)?;
        Ok(Self::new(json))
    }

    /// Convert to typed struct
    ///
    /// # Errors
    /// Returns error if value doesn't match type
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, DocumentError> {
        Ok(serde_json::from_value(self.value.clone())?)
    }

    /// Root JSON value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume into the root JSON value
    #[inline]
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Get a value by JSON pointer
    #[inline]
    #[must_use]
    pub fn get(&self, pointer: &str) -> Option<&Value> {
        self.value.pointer(pointer)
    }

    /// Get a value by dotted path
    #[inline]
    #[must_use]
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        self.value.pointer(&path.to_pointer())
    }

    /// Set a value by JSON pointer, creating intermediate objects
    ///
    /// # Errors
    /// Returns error if the pointer is malformed or indexes past the end
    /// of an array
    pub fn set(&mut self, pointer: &str, new_value: Value) -> Result<(), DocumentError> {
        let path = FieldPath::from_pointer(pointer)?;
        set_path(&mut self.value, &path, new_value)
    }

    /// Remove a value by JSON pointer, returning it
    pub fn remove(&mut self, pointer: &str) -> Option<Value> {
        let path = FieldPath::from_pointer(pointer).ok()?;
        remove_path(&mut self.value, &path)
    }

    /// Deep-merge `other` over this document
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self::new(merge_json(&self.value, &other.value))
    }

    /// Content hash of the canonical encoding
    #[inline]
    #[must_use]
    pub fn hash(&self) -> ManifestHash {
        ManifestHash::of_value(&self.value)
    }

    /// Canonical JSON string (sorted keys, no whitespace)
    #[inline]
    #[must_use]
    pub fn to_canonical_json(&self) -> String {
        canonical_json(&self.value)
    }

    /// Serialize to pretty JSON, root keys in conventional order
    ///
    /// # Errors
    /// Returns error if serialization fails (rare for JSON)
    pub fn to_json(&self) -> Result<String, DocumentError> {
        serde_json::to_string_pretty(&order_root_keys(&self.value))
            .map_err(|e| DocumentError::Serialization(e.to_string()))
    }

    /// Serialize to YAML with root keys in conventional order and a blank
    /// line between root entries
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        let ordered = order_root_keys(&self.value);
        let Value::Object(map) = ordered else {
            return serde_yaml::to_string(&ordered)
                .map_err(|e| DocumentError::Serialization(e.to_string()));
        };

        let mut sections = Vec::with_capacity(map.len());
        for (key, value) in map {
            let mut single = Map::new();
            single.insert(key, value);
            let text = serde_yaml::to_string(&Value::Object(single))
                .map_err(|e| DocumentError::Serialization(e.to_string()))?;
            sections.push(text);
        }
        Ok(sections.join("\n"))
    }
}

impl Default for ManifestDocument {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl From<Value> for ManifestDocument {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<ManifestDocument> for Value {
    fn from(document: ManifestDocument) -> Self {
        document.value
    }
}

/// Document error types
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid path: {0}")]
    Path(#[from] PathError),

    #[error("value at '{0}' is not an object or array")]
    NotAContainer(String),

    #[error("array index {index} out of bounds at '{path}'")]
    IndexOutOfBounds { path: String, index: usize },
}

/// Set `value` at `path` inside `root`
///
/// Intermediate objects are created as needed. Array segments must name an
/// existing element or the position one past the end (append).
///
/// # Errors
/// Returns error if an array index is out of bounds
pub fn set_path(root: &mut Value, path: &FieldPath, value: Value) -> Result<(), DocumentError> {
    let Some((last, parents)) = path.segments().split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;
    for (depth, segment) in parents.iter().enumerate() {
        let next_is_index = path
            .get(depth + 1)
            .is_some_and(|s| s.parse::<usize>().is_ok());
        current = descend_or_create(current, segment, next_is_index, path)?;
    }

    match current {
        Value::Array(items) => {
            let index = parse_index(last, path)?;
            if index < items.len() {
                items[index] = value;
            } else if index == items.len() {
                items.push(value);
            } else {
                return Err(DocumentError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                });
            }
        }
        Value::Object(map) => {
            map.insert(last.clone(), value);
        }
        other => {
            let mut map = Map::new();
            map.insert(last.clone(), value);
            *other = Value::Object(map);
        }
    }
    Ok(())
}

fn descend_or_create<'a>(
    current: &'a mut Value,
    segment: &str,
    next_is_index: bool,
    path: &FieldPath,
) -> Result<&'a mut Value, DocumentError> {
    let empty = || {
        if next_is_index {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    };

    if !current.is_object() && !current.is_array() {
        *current = Value::Object(Map::new());
    }

    match current {
        Value::Array(items) => {
            let index = parse_index(segment, path)?;
            if index == items.len() {
                items.push(empty());
            }
            items
                .get_mut(index)
                .ok_or(DocumentError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                })
        }
        Value::Object(map) => {
            let slot = map.entry(segment.to_string()).or_insert_with(empty);
            if slot.is_null() {
                *slot = empty();
            }
            Ok(slot)
        }
        _ => Err(DocumentError::NotAContainer(path.to_string())),
    }
}

fn parse_index(segment: &str, path: &FieldPath) -> Result<usize, DocumentError> {
    segment.parse().map_err(|_| {
        DocumentError::Path(PathError::InvalidSegment(format!(
            "{segment} (expected array index in '{path}')"
        )))
    })
}

/// Remove the value at `path`, returning it
pub fn remove_path(root: &mut Value, path: &FieldPath) -> Option<Value> {
    let (last, parents) = path.segments().split_last()?;
    let parent_path = FieldPath::new(parents.to_vec());
    let parent = root.pointer_mut(&parent_path.to_pointer())?;
    match parent {
        Value::Object(map) => map.shift_remove(last),
        Value::Array(items) => {
            let index: usize = last.parse().ok()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

/// Deep merge: objects merge key by key, everything else from `b` wins
#[must_use]
pub fn merge_json(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(a_map), Value::Object(b_map)) => {
            let mut result = a_map.clone();
            for (key, b_val) in b_map {
                let merged = match result.get(key) {
                    Some(a_val) => merge_json(a_val, b_val),
                    None => b_val.clone(),
                };
                result.insert(key.clone(), merged);
            }
            Value::Object(result)
        }
        (_, b_val) => b_val.clone(),
    }
}

/// Canonical JSON (sorted keys, compact)
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();

            let parts: Vec<String> = keys
                .into_iter()
                .filter_map(|key| {
                    map.get(key)
                        .map(|val| format!("{}:{}", Value::String(key.clone()), canonical_json(val)))
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(arr) => {
            let parts: Vec<_> = arr.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

/// Recursively sort object keys
#[must_use]
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Pretty JSON text, optionally with recursively sorted keys
///
/// # Errors
/// Returns error if serialization fails
pub fn format_json(value: &Value, sorted: bool) -> Result<String, DocumentError> {
    let result = if sorted {
        serde_json::to_string_pretty(&sort_keys(value))
    } else {
        serde_json::to_string_pretty(value)
    };
    result.map_err(|e| DocumentError::Serialization(e.to_string()))
}

fn order_root_keys(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };

    let mut ordered = Map::new();
    for key in ROOT_KEY_ORDER {
        if let Some(val) = map.get(*key) {
            ordered.insert((*key).to_string(), val.clone());
        }
    }
    for (key, val) in map {
        if !ordered.contains_key(key) {
            ordered.insert(key.clone(), val.clone());
        }
    }
    Value::Object(ordered)
}
