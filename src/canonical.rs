//! Canonicalization and content hashing for result-cache keys (spec §4.C, part 1).
//!
//! There is no teacher equivalent of this subsystem — `Idleness76-Weavegraph`
//! has no result cache at all. It is grounded on the teacher's JSON-handling
//! idiom in `utils/json_ext.rs` (`miette`+`thiserror` error enum, `serde_json`
//! throughout) and its general error-taxonomy style, extended with the one
//! new dependency this subsystem needs: `sha2` for the content hash spec §4.C
//! requires ("JSON-encode -> SHA-256 -> lowercase hex").

use std::collections::BTreeMap;

use miette::Diagnostic;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::state::{is_internal_key, State};

#[derive(Debug, Error, Diagnostic)]
pub enum CanonicalError {
    #[error("value is not canonicalizable: {reason}")]
    #[diagnostic(
        code(bspgraph::canonical::not_canonicalizable),
        help("Remove functions, channels, or NaN/Infinity floats from cached state before caching.")
    )]
    NotCanonicalizable { reason: String },

    #[error("failed to encode canonical form as JSON: {source}")]
    #[diagnostic(code(bspgraph::canonical::encode))]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

/// Produces a deterministic canonical form of `value`: maps become
/// key-sorted, arrays/scalars canonicalize element-wise/unchanged (spec
/// §4.C). `serde_json::Value` already forbids functions and NaN/Infinity at
/// construction time, so the only failure mode reachable here is a
/// `Value::Number` carrying a non-finite float smuggled in via
/// `serde_json::Number::from_f64`'s safe constructors being bypassed by a
/// future caller — kept as an explicit error rather than a silent `null` so
/// cache keys never silently collide.
pub fn canonicalize(value: &Value) -> Result<Value, CanonicalError> {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(canonicalize(item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CanonicalError::NotCanonicalizable {
                        reason: "non-finite float".to_string(),
                    });
                }
            }
            Ok(value.clone())
        }
        other => Ok(other.clone()),
    }
}

/// Strips keys unsafe for caching from `state`: every internal key (current
/// node id, exec context, callback pointers — spec §4.C names these
/// explicitly) plus anything the caller additionally excludes via
/// `extra_excluded`.
#[must_use]
pub fn sanitize_for_cache(state: &State, extra_excluded: &[&str]) -> State {
    state
        .iter()
        .filter(|(k, _)| !is_internal_key(k) && !extra_excluded.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Default cache key function (spec §4.C): canonicalize sanitized state,
/// JSON-encode, SHA-256, lowercase hex.
///
/// `key_fields`, if non-empty, narrows the input to only those fields
/// before canonicalization (a per-node cache policy may declare this to
/// avoid keying on fields irrelevant to the node's output).
pub fn content_hash(
    state: &State,
    extra_excluded: &[&str],
    key_fields: &[&str],
) -> Result<String, CanonicalError> {
    let sanitized = sanitize_for_cache(state, extra_excluded);
    let narrowed: State = if key_fields.is_empty() {
        sanitized
    } else {
        sanitized
            .into_iter()
            .filter(|(k, _)| key_fields.contains(&k.as_str()))
            .collect()
    };

    let as_value = Value::Object(narrowed.into_iter().collect());
    let canonical = canonicalize(&as_value)?;
    let encoded =
        serde_json::to_vec(&canonical).map_err(|source| CanonicalError::Encode { source })?;

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(hex_lower(&hasher.finalize()))
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String cannot fail");
    }
    out
}
