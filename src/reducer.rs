//! Built-in reducers for [`crate::state::State`] field merges (spec component B).
//!
//! A reducer is a pure merge function for one field: `(existing, update) ->
//! merged`. It must never mutate its arguments (spec §8: "Reducer purity").
//! Grounded on the teacher's `Reducer` trait (`reducers/mod.rs`) and its
//! concrete `MapMerge`/`AddMessages`/`AddErrors` implementations, generalized
//! from `VersionedState`-specific signatures (`&mut VersionedState,
//! &NodePartial`) to a schema-driven `(&Value, &Value) -> Value` contract so
//! arbitrary user-declared fields can opt into the same semantics.

use crate::message::{Message, MessageOp};
use serde_json::{Map, Value};

/// A pure per-field merge function.
///
/// Implementations MUST NOT mutate `existing` or `update`, and MUST be
/// deterministic: applying the same `(existing, update)` pair twice yields
/// the same result (spec §8, "Reducer purity").
pub trait Reducer: Send + Sync + std::fmt::Debug {
    fn apply(&self, existing: &Value, update: &Value) -> Value;
}

/// Replaces `existing` with a deep copy of `update`. This is the reducer
/// used for any field with no declared reducer (last-write-wins).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultReducer;

impl Reducer for DefaultReducer {
    fn apply(&self, _existing: &Value, update: &Value) -> Value {
        update.clone()
    }
}

/// Appends `update` to the end of an ordered sequence of any JSON value.
/// `update` may itself be a sequence (extended element-wise) or a scalar
/// (appended as a single element).
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn apply(&self, existing: &Value, update: &Value) -> Value {
        let mut out = as_array(existing);
        match update {
            Value::Array(items) => out.extend(items.iter().cloned()),
            other => out.push(other.clone()),
        }
        Value::Array(out)
    }
}

/// Like [`AppendReducer`] but only ever stores/accepts strings; non-string
/// elements are dropped rather than corrupting the sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSliceReducer;

impl Reducer for StringSliceReducer {
    fn apply(&self, existing: &Value, update: &Value) -> Value {
        let mut out: Vec<Value> = as_array(existing)
            .into_iter()
            .filter(|v| v.is_string())
            .collect();
        match update {
            Value::Array(items) => out.extend(items.iter().filter(|v| v.is_string()).cloned()),
            s @ Value::String(_) => out.push(s.clone()),
            _ => {}
        }
        Value::Array(out)
    }
}

/// Shallow key-wise merge for mapping-valued fields: keys in `update`
/// overwrite keys in `existing`; keys present only in `existing` survive.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn apply(&self, existing: &Value, update: &Value) -> Value {
        let mut out = as_object(existing);
        if let Value::Object(updates) = update {
            for (k, v) in updates {
                out.insert(k.clone(), v.clone());
            }
        }
        Value::Object(out)
    }
}

/// Reducer for sequences of chat messages. `update` may be:
/// - a single message object (implicitly appended),
/// - an array of message objects (implicitly appended, element-wise),
/// - a serialized [`MessageOp`] (`Append`/`ReplaceLastUser`/`RemoveAll`).
///
/// Values that fail to deserialize as any of the above fall back to
/// slice-concatenation of the raw JSON (spec §4.B: "opaque values fall back
/// to append-if-message or slice-concat").
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageReducer;

impl Reducer for MessageReducer {
    fn apply(&self, existing: &Value, update: &Value) -> Value {
        let mut messages = as_messages(existing);

        if let Ok(op) = serde_json::from_value::<MessageOp>(update.clone()) {
            match op {
                MessageOp::Append(new_messages) => messages.extend(new_messages),
                MessageOp::ReplaceLastUser(replacement) => {
                    if let Some(idx) = messages.iter().rposition(|m| m.has_role(Message::USER)) {
                        messages[idx] = replacement;
                    } else {
                        messages.push(replacement);
                    }
                }
                MessageOp::RemoveAll => messages.clear(),
            }
            return to_value(&messages);
        }

        if let Ok(one) = serde_json::from_value::<Message>(update.clone()) {
            messages.push(one);
            return to_value(&messages);
        }

        if let Ok(many) = serde_json::from_value::<Vec<Message>>(update.clone()) {
            messages.extend(many);
            return to_value(&messages);
        }

        // Opaque fallback: append-if-message-shaped, else slice-concat raw JSON.
        match update {
            Value::Array(items) => {
                let mut raw = as_array(existing);
                raw.extend(items.iter().cloned());
                Value::Array(raw)
            }
            other => {
                let mut raw = as_array(existing);
                raw.push(other.clone());
                Value::Array(raw)
            }
        }
    }
}

fn as_array(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn as_object(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

fn as_messages(value: &Value) -> Vec<Message> {
    serde_json::from_value::<Vec<Message>>(value.clone()).unwrap_or_default()
}

fn to_value(messages: &[Message]) -> Value {
    serde_json::to_value(messages).unwrap_or(Value::Array(Vec::new()))
}
