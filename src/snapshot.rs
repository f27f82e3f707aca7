//! Point-in-time captures of aggregate store state.
//!
//! A [`Snapshot`] maps store names to state values. The coordinator keeps
//! two of them: the initial snapshot, which gains one frozen entry per
//! registered store, and the last snapshot, which every capture merges
//! into. Both cross the serializer boundary as a single map value.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::binder::StoreHandle;
use crate::codec::Serializer;
use crate::error::{AltError, Result};

/// Store name to state value.
pub type Snapshot = BTreeMap<String, Value>;

/// The two snapshots retained by a coordinator.
#[derive(Debug, Default)]
pub(crate) struct Snapshots {
    /// One entry per registered store, written once at registration.
    pub initial: Snapshot,
    /// Merged target of every capture.
    pub last: Snapshot,
}

impl Snapshots {
    /// Record a newly registered store's state.
    ///
    /// Seeds the last snapshot as well, so a rollback before any explicit
    /// capture returns the store to where it started. An existing initial
    /// entry is never overwritten.
    pub(crate) fn record_initial(&mut self, name: &str, state: Value) {
        self.last.insert(name.to_owned(), state.clone());
        self.initial.entry(name.to_owned()).or_insert(state);
    }

    /// Merge `captured` into the last snapshot and return the merged result.
    ///
    /// Keys absent from `captured` keep their previous value.
    pub(crate) fn merge_last(&mut self, captured: Snapshot) -> Snapshot {
        self.last.extend(captured);
        self.last.clone()
    }
}

/// Read the current state of every store in `stores`.
///
/// # Errors
///
/// Returns [`AltError::Codec`] if a store's state cannot be converted to a
/// value.
pub(crate) fn capture(stores: &[StoreHandle]) -> Result<Snapshot> {
    stores
        .iter()
        .map(|store| Ok((store.name().to_owned(), store.state_value()?)))
        .collect()
}

/// Keep only the entries of `full` named in `names`.
///
/// # Errors
///
/// Returns [`AltError::UnknownStore`] for the first requested name that has
/// no entry in `full`.
///
/// # Examples
///
/// ```
/// use alt_flux::{Snapshot, filter_snapshot};
/// use serde_json::json;
///
/// let full: Snapshot = [("A".to_string(), json!(1)), ("B".to_string(), json!(2))].into();
/// let only_a = filter_snapshot(&full, &["A"]).unwrap();
/// assert_eq!(only_a.len(), 1);
/// assert!(filter_snapshot(&full, &["C"]).is_err());
/// ```
pub fn filter_snapshot(full: &Snapshot, names: &[&str]) -> Result<Snapshot> {
    names
        .iter()
        .map(|name| {
            full.get(*name)
                .map(|state| ((*name).to_owned(), state.clone()))
                .ok_or_else(|| AltError::UnknownStore((*name).to_owned()))
        })
        .collect()
}

/// Serialize `snapshot` as one map value.
pub(crate) fn encode(serializer: &dyn Serializer, snapshot: &Snapshot) -> Result<String> {
    let map: serde_json::Map<String, Value> = snapshot
        .iter()
        .map(|(name, state)| (name.clone(), state.clone()))
        .collect();
    serializer.serialize(&Value::Object(map))
}

/// Deserialize `data` into a snapshot.
///
/// # Errors
///
/// Returns [`AltError::MalformedSnapshot`] if the decoded value is not a
/// map, and whatever the serializer returns if decoding fails.
pub(crate) fn decode(serializer: &dyn Serializer, data: &str) -> Result<Snapshot> {
    match serializer.deserialize(data)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(AltError::MalformedSnapshot(format!(
            "expected a map of store name to state, got {}",
            value_kind(&other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}
