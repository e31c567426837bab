//! Versioned single-value channels (spec component A).
//!
//! A [`Channel`] is a single-valued mailbox: it tracks a current value, a
//! monotonic version, an availability flag, and the last super-step that
//! wrote to it. It is the primitive both [`crate::state::State`] (one
//! channel per declared field) and the scheduler's triggering logic
//! (availability-based and version-based) are built from.
//!
//! Grounded on the teacher's `Channel` trait (`get_channel_type`,
//! `persistent`, `version`, `get_mut`, `snapshot`, `set_version`) in
//! `weavegraph::channels`, generalized from three hardcoded channel kinds
//! (messages/extra/errors) to one `Channel` type parameterized over any
//! JSON value, keyed by field name in the schema.

use serde_json::Value;

/// A versioned, single-valued mailbox for one state field.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    value: Value,
    version: u64,
    available: bool,
    updated_in_step: Option<i64>,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            value: Value::Null,
            version: 0,
            available: false,
            updated_in_step: None,
        }
    }
}

impl Channel {
    /// Creates a channel seeded with `value` at version 0, not yet available.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Current value held by the channel.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Monotonic version counter. Incremented once per [`Channel::update`] call.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the channel carries an unacknowledged update.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Whether the channel was last written during `step`.
    #[must_use]
    pub fn is_updated_in_step(&self, step: i64) -> bool {
        self.updated_in_step == Some(step)
    }

    /// Updates the channel's value to the last of `values`, bumps the
    /// version, marks it available, and records `step`. Fails silently
    /// (no-op) if `values` is empty, per spec §4.A.
    ///
    /// `step` may be `-1` for replay (initial/fork checkpoints use step -1
    /// as a sentinel source, not a real super-step number).
    pub fn update(&mut self, values: &[Value], step: i64) {
        if let Some(last) = values.last() {
            self.value = last.clone();
            self.version += 1;
            self.available = true;
            self.updated_in_step = Some(step);
        }
    }

    /// Clears the availability flag. Version and the step mark are preserved.
    pub fn acknowledge(&mut self) {
        self.available = false;
    }

    /// Clears the step mark without touching availability or version.
    /// Called once per super-step after checkpointing, so the next step's
    /// `is_updated_in_step` checks start clean.
    pub fn clear_step_mark(&mut self) {
        self.updated_in_step = None;
    }

    /// Directly sets the version, used when restoring a channel from a
    /// persisted checkpoint (`channelVersions` map) without replaying every
    /// intermediate `update` call.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_sets_last_value_and_bumps_version() {
        let mut ch = Channel::default();
        ch.update(&[json!(1), json!(2), json!(3)], 0);
        assert_eq!(ch.value(), &json!(3));
        assert_eq!(ch.version(), 1);
        assert!(ch.is_available());
        assert!(ch.is_updated_in_step(0));
    }

    #[test]
    fn update_with_empty_values_is_noop() {
        let mut ch = Channel::new(json!("seed"));
        ch.update(&[], 5);
        assert_eq!(ch.value(), &json!("seed"));
        assert_eq!(ch.version(), 0);
        assert!(!ch.is_available());
    }

    #[test]
    fn acknowledge_clears_available_but_keeps_version() {
        let mut ch = Channel::default();
        ch.update(&[json!(1)], 0);
        ch.acknowledge();
        assert!(!ch.is_available());
        assert_eq!(ch.version(), 1);
    }

    #[test]
    fn clear_step_mark_does_not_touch_availability() {
        let mut ch = Channel::default();
        ch.update(&[json!(1)], 4);
        ch.clear_step_mark();
        assert!(!ch.is_updated_in_step(4));
        assert!(ch.is_available());
    }

    #[test]
    fn repeated_updates_keep_incrementing_version() {
        let mut ch = Channel::default();
        ch.update(&[json!(1)], 0);
        ch.update(&[json!(2)], 1);
        ch.update(&[json!(3)], 2);
        assert_eq!(ch.version(), 3);
        assert_eq!(ch.value(), &json!(3));
    }
}
