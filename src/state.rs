//! State, [`Schema`], and schema-driven merges (spec component B).
//!
//! Grounded on the teacher's `VersionedState`/`StateSnapshot`
//! (`weavegraph::state`), generalized from three hardcoded fields
//! (messages/extra/errors) to an arbitrary, caller-declared set of fields,
//! each with its own [`crate::reducer::Reducer`] — matching spec §3's
//! "mapping from field name to (type descriptor, reducer, optional
//! default)".

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::reducer::{DefaultReducer, Reducer};

/// The value flowing between nodes: an ordered-irrelevant mapping from
/// field name to JSON value.
///
/// Keys prefixed with `_` are internal (exec context markers, routing
/// commands) and are stripped from any caller-visible snapshot by
/// [`State::visible`], while remaining present on the engine-owned copy.
pub type State = FxHashMap<String, Value>;

/// Prefix marking a state key as engine-internal (spec §3 invariant).
pub const INTERNAL_KEY_PREFIX: &str = "_";

/// Key under which a node's `Command{Resume, ResumeMap}` is staged at
/// startup (spec §6, run configuration keys).
pub const COMMAND_KEY: &str = "_command_";
/// Key the executor uses to force the next super-step's frontier
/// (plan-by-`_next_nodes_`, spec §4.F `planStep` step 1).
pub const NEXT_NODES_KEY: &str = "_next_nodes_";
/// Injected into a task's isolated input view so node bodies can recover
/// their own node id (spec §6).
pub const CURRENT_NODE_ID_KEY: &str = "_current_node_id_";
/// Injected into a task's isolated input view (spec §6, "exec context").
pub const EXEC_CONTEXT_KEY: &str = "_exec_context_";

/// Returns true if `key` is an engine-internal key (spec §3).
#[must_use]
pub fn is_internal_key(key: &str) -> bool {
    key.starts_with(INTERNAL_KEY_PREFIX)
}

/// Returns a copy of `state` with internal keys removed, suitable for
/// handing to a caller (`graph.completion` event payloads, cache keys,
/// checkpoint-restore merges).
#[must_use]
pub fn visible(state: &State) -> State {
    state
        .iter()
        .filter(|(k, _)| !is_internal_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Declared shape of one field: its reducer and zero/default value.
#[derive(Clone)]
pub struct FieldSpec {
    pub reducer: Arc<dyn Reducer>,
    pub default: Value,
}

impl FieldSpec {
    #[must_use]
    pub fn new(reducer: Arc<dyn Reducer>, default: Value) -> Self {
        Self { reducer, default }
    }

    /// A field with no declared reducer: last-write-wins, defaulting to `null`.
    #[must_use]
    pub fn default_field() -> Self {
        Self::new(Arc::new(DefaultReducer), Value::Null)
    }
}

/// Mapping from field name to its declared [`FieldSpec`] (spec §3:
/// `StateSchema`). Drives state initialization and `apply_update`.
#[derive(Clone, Default)]
pub struct Schema {
    fields: FxHashMap<String, FieldSpec>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field with an explicit reducer and default value.
    #[must_use]
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        reducer: Arc<dyn Reducer>,
        default: Value,
    ) -> Self {
        self.fields
            .insert(name.into(), FieldSpec::new(reducer, default));
        self
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Every declared field gets its default at state init (spec §3 invariant).
    #[must_use]
    pub fn initial_state(&self) -> State {
        self.fields
            .iter()
            .map(|(name, spec)| (name.clone(), spec.default.clone()))
            .collect()
    }

    /// `ApplyUpdate(existing, update) -> merged` (spec §4.B).
    ///
    /// For each key in `update`: if the schema declares a reducer, invoke it
    /// with `(existing[key], update[key])`; otherwise default-replace with a
    /// deep copy. Keys present only in `existing` are preserved. Never
    /// mutates either argument.
    #[must_use]
    pub fn apply_update(&self, existing: &State, update: &State) -> State {
        let mut merged = existing.clone();
        for (key, update_value) in update {
            let current = existing.get(key).cloned().unwrap_or(Value::Null);
            let merged_value = match self.field(key) {
                Some(spec) => spec.reducer.apply(&current, update_value),
                None => update_value.clone(),
            };
            merged.insert(key.clone(), merged_value);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::AppendReducer;
    use serde_json::json;

    fn counter_schema() -> Schema {
        Schema::new()
            .with_field("counter", Arc::new(DefaultReducer), json!(0))
            .with_field("messages", Arc::new(AppendReducer), json!([]))
    }

    #[test]
    fn initial_state_fills_every_declared_default() {
        let schema = counter_schema();
        let state = schema.initial_state();
        assert_eq!(state.get("counter"), Some(&json!(0)));
        assert_eq!(state.get("messages"), Some(&json!([])));
    }

    #[test]
    fn apply_update_uses_declared_reducer_per_key() {
        let schema = counter_schema();
        let existing = schema.initial_state();
        let mut update = State::default();
        update.insert("counter".into(), json!(1));
        update.insert("messages".into(), json!(["hi"]));

        let merged = schema.apply_update(&existing, &update);
        assert_eq!(merged.get("counter"), Some(&json!(1)));
        assert_eq!(merged.get("messages"), Some(&json!(["hi"])));
    }

    #[test]
    fn apply_update_preserves_keys_only_in_existing() {
        let schema = Schema::new();
        let mut existing = State::default();
        existing.insert("untouched".into(), json!("kept"));
        let update = State::default();

        let merged = schema.apply_update(&existing, &update);
        assert_eq!(merged.get("untouched"), Some(&json!("kept")));
    }

    #[test]
    fn apply_update_without_reducer_is_last_write_wins() {
        let schema = Schema::new();
        let mut existing = State::default();
        existing.insert("x".into(), json!("old"));
        let mut update = State::default();
        update.insert("x".into(), json!("new"));

        let merged = schema.apply_update(&existing, &update);
        assert_eq!(merged.get("x"), Some(&json!("new")));
    }

    #[test]
    fn apply_update_does_not_mutate_arguments() {
        let schema = counter_schema();
        let existing = schema.initial_state();
        let mut update = State::default();
        update.insert("counter".into(), json!(5));
        let existing_before = existing.clone();

        let _ = schema.apply_update(&existing, &update);
        assert_eq!(existing, existing_before);
        assert_eq!(update.get("counter"), Some(&json!(5)));
    }

    #[test]
    fn visible_strips_internal_keys() {
        let mut state = State::default();
        state.insert("counter".into(), json!(1));
        state.insert(CURRENT_NODE_ID_KEY.into(), json!("node-a"));

        let visible_state = visible(&state);
        assert!(visible_state.contains_key("counter"));
        assert!(!visible_state.contains_key(CURRENT_NODE_ID_KEY));
    }
}
