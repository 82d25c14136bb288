//! Sync engine facade
//!
//! Owns one form state and sequences every edit through the components:
//! apply the edit to the form tree, re-derive testing values, re-derive the
//! manifest, re-validate. An edit that cannot be applied leaves the state
//! untouched.

use cbs_manifest::{set_path, DocumentError, FieldPath, ManifestDocument, ManifestHash};
use cbs_schema::SchemaRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::error::{DuplicateKey, EditError, EngineError, RewriteConflict};
use crate::form::{
    BuilderFormValues, BuilderStream, FormState, InputDefinition, USER_INPUT_DATE_FORMAT,
};
use crate::inferred::{effective_inputs, inferred_inputs, is_key_in_use};
use crate::mapper::{form_to_manifest, manifest_to_form, shadowed_pointers};
use crate::references::rewrite_references_in_tree;
use crate::testing_values::{sync_testing_values, KeyRename};
use crate::validation::{validate, ValidationReport};
use crate::variant::{select_variant, UnionField, VariantSelection};

/// Toggleable stream sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSection {
    Paginator,
    IncrementalSync,
    ParameterizedRequests,
    ParentStreams,
    ErrorHandler,
    Transformations,
    Schema,
}

impl StreamSection {
    /// Form field holding the section
    #[must_use]
    pub fn field(self) -> &'static str {
        match self {
            Self::Paginator => "paginator",
            Self::IncrementalSync => "incremental_sync",
            Self::ParameterizedRequests => "parameterized_requests",
            Self::ParentStreams => "parent_streams",
            Self::ErrorHandler => "error_handler",
            Self::Transformations => "transformations",
            Self::Schema => "schema",
        }
    }

    /// Value written when the section is switched on, and its placeholders
    fn default_value(self) -> (Value, &'static [&'static str]) {
        match self {
            Self::Paginator => (
                json!({
                    "strategy": {"type": "OffsetIncrement"},
                    "page_token_option": {"inject_into": "request_parameter", "field_name": ""}
                }),
                &["page_token_option.field_name"],
            ),
            Self::IncrementalSync => (
                json!({
                    "cursor_field": "",
                    "datetime_format": USER_INPUT_DATE_FORMAT,
                    "cursor_datetime_formats": [USER_INPUT_DATE_FORMAT],
                    "start_datetime": {"type": "user_input"},
                    "end_datetime": {"type": "now"}
                }),
                &["cursor_field"],
            ),
            Self::ParameterizedRequests => (
                json!([{
                    "cursor_field": "",
                    "values": {"type": "list", "value": []},
                    "request_option": {"inject_into": "request_parameter", "field_name": ""}
                }]),
                &["0.cursor_field", "0.request_option.field_name"],
            ),
            Self::ParentStreams => (
                json!([{"parent_key": "", "partition_field": "", "parent_stream_reference": ""}]),
                &["0.parent_key", "0.partition_field", "0.parent_stream_reference"],
            ),
            Self::ErrorHandler => (
                json!([{"backoff_strategy": {"type": "ExponentialBackoffStrategy"}}]),
                &[],
            ),
            Self::Transformations => (json!([]), &[]),
            Self::Schema => (
                Value::String(
                    "{\n  \"$schema\": \"http://json-schema.org/schema#\",\n  \"additionalProperties\": true,\n  \"properties\": {},\n  \"type\": \"object\"\n}"
                        .to_string(),
                ),
                &[],
            ),
        }
    }
}

/// A derived manifest tagged with the revision it was derived at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSnapshot {
    pub revision: u64,
    pub hash: ManifestHash,
    pub manifest: Value,
}

/// Keeps a builder form and its manifest in sync
pub struct SyncEngine {
    config: EngineConfig,
    registry: Option<&'static SchemaRegistry>,
    state: FormState,
    manifest: Value,
    report: ValidationReport,
    revision: u64,
}

impl SyncEngine {
    /// Engine with an empty form
    ///
    /// # Errors
    /// Returns error if schema validation is enabled and the schema cannot
    /// be loaded
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let mut values = BuilderFormValues::default();
        values.global.connector_name.clone_from(&config.connector_name);
        values.version.clone_from(&config.manifest_version);
        Self::with_state(config, FormState::new(values))
    }

    /// Engine for an existing manifest
    ///
    /// Testing values start from the defaults of the effective inputs.
    ///
    /// # Errors
    /// Returns error if schema validation is enabled and the schema cannot
    /// be loaded
    pub fn from_manifest(config: EngineConfig, manifest: &Value) -> Result<Self, EngineError> {
        let mut state = manifest_to_form(manifest);
        state.values.global.connector_name.clone_from(&config.connector_name);
        Self::with_state(config, state)
    }

    fn with_state(config: EngineConfig, state: FormState) -> Result<Self, EngineError> {
        let registry = if config.validate_schema {
            Some(cbs_schema::init(&config.schema_source)?)
        } else {
            None
        };
        let mut engine = Self {
            config,
            registry,
            state,
            manifest: Value::Null,
            report: ValidationReport::default(),
            revision: 0,
        };
        engine.commit();
        tracing::info!(
            "Sync engine ready: {} streams, {} inputs",
            engine.state.values.streams.len(),
            engine.state.values.inputs.len()
        );
        Ok(engine)
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current form state
    #[inline]
    #[must_use]
    pub fn state(&self) -> &FormState {
        &self.state
    }

    /// Current form values
    #[inline]
    #[must_use]
    pub fn values(&self) -> &BuilderFormValues {
        &self.state.values
    }

    /// Manifest derived from the current form
    #[inline]
    #[must_use]
    pub fn manifest(&self) -> &Value {
        &self.manifest
    }

    /// Validation of the current form
    #[inline]
    #[must_use]
    pub fn validation(&self) -> &ValidationReport {
        &self.report
    }

    /// Number of committed changes
    #[inline]
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Inputs implied by the current variant selection
    #[must_use]
    pub fn inferred_inputs(&self) -> Vec<InputDefinition> {
        inferred_inputs(&self.state.values)
    }

    /// Explicit and inferred inputs
    #[must_use]
    pub fn effective_inputs(&self) -> Vec<InputDefinition> {
        effective_inputs(&self.state.values)
    }

    /// Replace the form with the conversion of another manifest
    ///
    /// Testing values of inputs that exist before and after are kept.
    pub fn load_manifest(&mut self, manifest: &Value) -> &ValidationReport {
        let mut next = manifest_to_form(manifest);
        next.values.global.connector_name.clone_from(&self.state.values.global.connector_name);
        let old = std::mem::replace(&mut self.state.values, next.values);
        self.state.placeholders.clear();
        tracing::info!("Loaded manifest with {} streams", self.state.values.streams.len());
        self.after_values_change(&old, &[])
    }

    /// Write `value` at a dotted form path
    ///
    /// `testing_values.<key>` paths edit testing values; `null` removes one.
    /// Writing `null` to an optional section disables it.
    ///
    /// # Errors
    /// Returns error if the path is malformed or the edited form no longer
    /// matches the form model
    pub fn apply_form_edit(&mut self, path: &str, value: Value) -> Result<&ValidationReport, EditError> {
        let path: FieldPath = path.parse()?;
        if path.first() == Some("testing_values") {
            let key = match path.segments() {
                [_, key] => key.clone(),
                _ => {
                    return Err(EditError::InvalidValue {
                        path: path.to_string(),
                        message: "testing values are addressed by key".to_string(),
                    })
                }
            };
            return Ok(self.set_testing_value(&key, value));
        }
        tracing::debug!("Form edit at {}", path);
        self.edit(&path, value, &[])?;
        Ok(&self.report)
    }

    /// Set or, with `null`, clear one testing value
    pub fn set_testing_value(&mut self, key: &str, value: Value) -> &ValidationReport {
        if value.is_null() {
            self.state.testing_values.shift_remove(key);
        } else {
            self.state.testing_values.insert(key.to_string(), value);
        }
        self.commit();
        &self.report
    }

    /// Switch a union field to `tag`
    ///
    /// Selecting the active tag changes nothing. Otherwise the field is
    /// replaced by the variant's default shape merged with `preseed`, and
    /// values fabricated for the shape are tracked as placeholders.
    ///
    /// # Errors
    /// Returns error if the path is not a union field or the tag is unknown
    pub fn select_variant(
        &mut self,
        path: &str,
        tag: &str,
        preseed: Option<&Value>,
    ) -> Result<&ValidationReport, EditError> {
        let path: FieldPath = path.parse()?;
        let union = UnionField::from_path(&path).ok_or_else(|| EditError::NotAUnion(path.to_string()))?;
        let tree = self.form_tree()?;
        let selection = select_variant(union, tree.pointer(&path.to_pointer()), tag, preseed)?;
        match selection {
            VariantSelection::Unchanged => {
                tracing::debug!("{} already holds {}", path, tag);
            }
            VariantSelection::Replace(resolved) => {
                tracing::debug!(
                    "Switching {} to {} (clearing {} sibling fields)",
                    path,
                    tag,
                    resolved.clear_sibling_paths.len()
                );
                let placeholders: Vec<FieldPath> = resolved
                    .placeholder_paths
                    .iter()
                    .map(|relative| path.join_path(relative))
                    .collect();
                self.edit(&path, resolved.default_value, &placeholders)?;
            }
        }
        Ok(&self.report)
    }

    /// Switch a stream section on (with its default value) or off
    ///
    /// Enabling a section that is already on keeps its current value.
    ///
    /// # Errors
    /// Returns error if there is no stream at `stream_index`
    pub fn set_section_enabled(
        &mut self,
        stream_index: usize,
        section: StreamSection,
        enabled: bool,
    ) -> Result<&ValidationReport, EditError> {
        let tree = self.form_tree()?;
        let path = FieldPath::single("streams")
            .index(stream_index)
            .child(section.field());
        if tree.pointer(&FieldPath::single("streams").index(stream_index).to_pointer()).is_none() {
            return Err(EditError::StreamNotFound(stream_index));
        }
        let current = tree.pointer(&path.to_pointer()).filter(|v| !v.is_null());
        match (current, enabled) {
            (Some(_), true) | (None, false) => {}
            (None, true) => {
                let (value, placeholders) = section.default_value();
                let placeholders: Vec<FieldPath> = placeholders
                    .iter()
                    .filter_map(|p| p.parse::<FieldPath>().ok())
                    .map(|relative| path.join_path(&relative))
                    .collect();
                tracing::debug!("Enabling {} on stream {}", section.field(), stream_index);
                self.edit(&path, value, &placeholders)?;
            }
            (Some(_), false) => {
                tracing::debug!("Disabling {} on stream {}", section.field(), stream_index);
                self.edit(&path, Value::Null, &[])?;
            }
        }
        Ok(&self.report)
    }

    /// Declare a new input
    ///
    /// # Errors
    /// Returns error if the key is taken by an explicit or inferred input
    pub fn create_input(&mut self, input: InputDefinition) -> Result<&ValidationReport, EditError> {
        if is_key_in_use(&self.state.values, &input.key) {
            return Err(DuplicateKey { key: input.key }.into());
        }
        tracing::debug!("Creating input {}", input.key);
        let mut next = self.state.values.clone();
        next.inputs.push(input);
        let old = std::mem::replace(&mut self.state.values, next);
        Ok(self.after_values_change(&old, &[]))
    }

    /// Replace the input `previous_key` with `input`
    ///
    /// A changed key is a rename: every config reference to the old key is
    /// rewritten and the testing value moves with it. The rename is rolled
    /// back as a whole if the rewritten form no longer parses or the derived
    /// manifest gains schema violations.
    ///
    /// # Errors
    /// Returns error if no input has `previous_key`, the new key is taken,
    /// or the rename is rolled back
    pub fn update_input(
        &mut self,
        previous_key: &str,
        input: InputDefinition,
    ) -> Result<&ValidationReport, EditError> {
        let index = self
            .state
            .values
            .inputs
            .iter()
            .position(|i| i.key == previous_key)
            .ok_or_else(|| EditError::InputNotFound(previous_key.to_string()))?;
        let renamed = input.key != previous_key;
        if renamed && is_key_in_use(&self.state.values, &input.key) {
            return Err(DuplicateKey { key: input.key }.into());
        }

        let new_key = input.key.clone();
        let mut next = self.state.values.clone();
        next.inputs[index] = input;
        let renames = if renamed {
            next = self.rewrite_references(next, previous_key, &new_key)?;
            vec![KeyRename::new(previous_key, new_key)]
        } else {
            Vec::new()
        };
        let old = std::mem::replace(&mut self.state.values, next);
        Ok(self.after_values_change(&old, &renames))
    }

    /// Delete an explicit input
    ///
    /// # Errors
    /// Returns error if no input has `key`
    pub fn delete_input(&mut self, key: &str) -> Result<&ValidationReport, EditError> {
        let index = self
            .state
            .values
            .inputs
            .iter()
            .position(|i| i.key == key)
            .ok_or_else(|| EditError::InputNotFound(key.to_string()))?;
        tracing::debug!("Deleting input {}", key);
        let mut next = self.state.values.clone();
        next.inputs.remove(index);
        let old = std::mem::replace(&mut self.state.values, next);
        Ok(self.after_values_change(&old, &[]))
    }

    /// Append an empty stream, returning its identifier
    pub fn add_stream(&mut self, name: &str) -> String {
        let id = self.state.values.next_stream_id();
        let mut next = self.state.values.clone();
        next.streams.push(BuilderStream::new(id.clone(), name));
        let old = std::mem::replace(&mut self.state.values, next);
        self.after_values_change(&old, &[]);
        id
    }

    /// Copy a stream under a new name, returning the copy's identifier
    ///
    /// # Errors
    /// Returns error if there is no stream at `index`
    pub fn duplicate_stream(&mut self, index: usize, name: &str) -> Result<String, EditError> {
        let source = self
            .state
            .values
            .streams
            .get(index)
            .ok_or(EditError::StreamNotFound(index))?;
        let id = self.state.values.next_stream_id();
        let mut copy = source.clone();
        copy.id.clone_from(&id);
        name.clone_into(&mut copy.name);
        copy.test_status = None;

        let mut next = self.state.values.clone();
        next.streams.push(copy);
        let old = std::mem::replace(&mut self.state.values, next);
        self.after_values_change(&old, &[]);
        Ok(id)
    }

    /// Remove the stream at `index`
    ///
    /// # Errors
    /// Returns error if there is no stream at `index`
    pub fn remove_stream(&mut self, index: usize) -> Result<&ValidationReport, EditError> {
        if index >= self.state.values.streams.len() {
            return Err(EditError::StreamNotFound(index));
        }
        let mut next = self.state.values.clone();
        let removed = next.streams.remove(index);
        next.check_streams.retain(|name| *name != removed.name);
        tracing::debug!("Removing stream {}", removed.name);

        self.state.placeholders = std::mem::take(&mut self.state.placeholders)
            .into_iter()
            .filter_map(|p| shift_stream_placeholder(&p, index))
            .collect();
        let old = std::mem::replace(&mut self.state.values, next);
        Ok(self.after_values_change(&old, &[]))
    }

    /// The derived manifest as a document
    #[must_use]
    pub fn export_manifest(&self) -> ManifestDocument {
        tracing::info!("Exporting manifest at revision {}", self.revision);
        ManifestDocument::new(self.manifest.clone())
    }

    /// The derived manifest as YAML
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn export_yaml(&self) -> Result<String, DocumentError> {
        self.export_manifest().to_yaml()
    }

    /// The derived manifest tagged with the current revision
    #[must_use]
    pub fn snapshot(&self) -> ManifestSnapshot {
        ManifestSnapshot {
            revision: self.revision,
            hash: ManifestHash::of_value(&self.manifest),
            manifest: self.manifest.clone(),
        }
    }

    /// Whether no change was committed after `snapshot` was taken
    #[inline]
    #[must_use]
    pub fn is_latest(&self, snapshot: &ManifestSnapshot) -> bool {
        snapshot.revision == self.revision
    }

    fn form_tree(&self) -> Result<Value, EditError> {
        serde_json::to_value(&self.state.values)
            .map_err(|e| EditError::Document(DocumentError::Serialization(e.to_string())))
    }

    /// Write `value` at `path`, re-parse, and commit
    fn edit(&mut self, path: &FieldPath, value: Value, placeholders: &[FieldPath]) -> Result<(), EditError> {
        let mut tree = self.form_tree()?;
        set_path(&mut tree, path, value)?;
        let mut next: BuilderFormValues =
            serde_json::from_value(tree).map_err(|e| EditError::InvalidValue {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        if let (Some("streams"), Some(index)) = (path.first(), path.index_at(1)) {
            if let Some(stream) = next.streams.get_mut(index) {
                let rest: Vec<&str> = path.iter().skip(2).collect();
                for pointer in shadowed_pointers(&rest) {
                    if stream.unmodeled.shift_remove(*pointer).is_some() {
                        tracing::debug!("Form value at {} replaces verbatim {}", path, pointer);
                    }
                }
            }
        }
        next.cascade();

        self.state.placeholders.retain(|existing| {
            existing
                .parse::<FieldPath>()
                .map_or(true, |existing| !path.is_prefix_of(&existing))
        });
        self.state
            .placeholders
            .extend(placeholders.iter().map(ToString::to_string));

        let old = std::mem::replace(&mut self.state.values, next);
        self.after_values_change(&old, &[]);
        Ok(())
    }

    fn rewrite_references(
        &self,
        values: BuilderFormValues,
        previous_key: &str,
        new_key: &str,
    ) -> Result<BuilderFormValues, EditError> {
        let conflict = |reason: String| {
            tracing::error!("Rename of {} to {} rolled back: {}", previous_key, new_key, reason);
            EditError::from(RewriteConflict {
                previous_key: previous_key.to_string(),
                new_key: new_key.to_string(),
                reason,
            })
        };

        let mut tree = serde_json::to_value(&values).map_err(|e| conflict(e.to_string()))?;
        let changed = rewrite_references_in_tree(&mut tree, previous_key, new_key);
        let rewritten: BuilderFormValues =
            serde_json::from_value(tree).map_err(|e| conflict(e.to_string()))?;

        if let Some(registry) = self.registry {
            let before = registry.validate(&form_to_manifest(&values)).len();
            let after = registry.validate(&form_to_manifest(&rewritten)).len();
            if after > before {
                return Err(conflict(format!(
                    "derived manifest gains {} schema violations",
                    after - before
                )));
            }
        }
        tracing::info!("Renamed input {} to {} ({} references rewritten)", previous_key, new_key, changed);
        Ok(rewritten)
    }

    fn after_values_change(&mut self, old: &BuilderFormValues, renames: &[KeyRename]) -> &ValidationReport {
        let old_inputs = effective_inputs(old);
        let new_inputs = effective_inputs(&self.state.values);
        self.state.testing_values =
            sync_testing_values(&old_inputs, &new_inputs, &self.state.testing_values, renames);
        self.commit();
        &self.report
    }

    fn commit(&mut self) {
        self.manifest = form_to_manifest(&self.state.values);
        self.report = validate(&self.state, &self.manifest, self.registry);
        self.revision += 1;
        tracing::debug!(
            revision = self.revision,
            errors = self.report.error_count(),
            "form committed"
        );
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("schema_validation", &self.registry.is_some())
            .field("revision", &self.revision)
            .field("streams", &self.state.values.streams.len())
            .finish_non_exhaustive()
    }
}

fn shift_stream_placeholder(placeholder: &str, removed: usize) -> Option<String> {
    let Ok(path) = placeholder.parse::<FieldPath>() else {
        return Some(placeholder.to_string());
    };
    match (path.first(), path.index_at(1)) {
        (Some("streams"), Some(index)) if index == removed => None,
        (Some("streams"), Some(index)) if index > removed => {
            let mut segments = path.segments().to_vec();
            segments[1] = (index - 1).to_string();
            Some(FieldPath::new(segments).to_string())
        }
        _ => Some(placeholder.to_string()),
    }
}
