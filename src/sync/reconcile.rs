//! Idempotent mutation primitives over an ordered, id-keyed cache.
//!
//! Applying the same logical change twice, in either order relative to the
//! matching REST result, converges to the same state:
//!
//! - insert-if-absent never duplicates an id
//! - replace-by-id is a no-op when the id is absent
//! - remove-by-id is a no-op when the id is absent
//!
//! Updates replace the stored entity wholesale. Optional fields missing from
//! the pushed payload take their serde defaults; nothing is merged from the
//! previous value.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::SyncError;

/// A synchronized record with a stable identifier.
pub trait Entity: Clone + Send + Sync + DeserializeOwned + 'static {
    fn id(&self) -> &str;
}

/// How an inbound event changes a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// Add the payload entity unless its id is already present.
    Insert,
    /// Replace the entity with the payload's id; no-op if absent.
    Replace,
    /// Remove the entity named by the payload; no-op if absent.
    Remove,
    /// Ignore the payload and re-fetch the snapshot.
    Refresh,
}

impl Mutation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutation::Insert => "insert",
            Mutation::Replace => "replace",
            Mutation::Remove => "remove",
            Mutation::Refresh => "refresh",
        }
    }
}

pub fn insert_if_absent<T: Entity>(items: &mut Vec<T>, entity: T) -> bool {
    if items.iter().any(|existing| existing.id() == entity.id()) {
        return false;
    }
    items.push(entity);
    true
}

pub fn replace_by_id<T: Entity>(items: &mut [T], entity: T) -> bool {
    match items.iter_mut().find(|existing| existing.id() == entity.id()) {
        Some(slot) => {
            *slot = entity;
            true
        }
        None => false,
    }
}

pub fn remove_by_id<T: Entity>(items: &mut Vec<T>, id: &str) -> bool {
    let before = items.len();
    items.retain(|existing| existing.id() != id);
    items.len() != before
}

/// Identifier carried by a delete-style payload.
///
/// Accepts a bare string (`"t1"`), or an object with `_id` or `id`, or a
/// wrapper such as `{"taskId": "t1"}` when it is the only `*Id` field.
pub fn extract_id(payload: &Value) -> Option<String> {
    match payload {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => {
            for key in ["_id", "id"] {
                match map.get(key) {
                    Some(Value::String(id)) if !id.is_empty() => return Some(id.clone()),
                    Some(Value::Number(n)) => return Some(n.to_string()),
                    _ => {}
                }
            }
            let mut ids = map
                .iter()
                .filter(|(k, _)| k.ends_with("Id"))
                .filter_map(|(_, v)| v.as_str());
            match (ids.next(), ids.next()) {
                (Some(id), None) if !id.is_empty() => Some(id.to_string()),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Decode an event payload into a typed entity.
pub fn decode<T: DeserializeOwned>(event: &str, payload: &Value) -> Result<T, SyncError> {
    T::deserialize(payload).map_err(|e| SyncError::MalformedPayload {
        event: event.to_string(),
        message: e.to_string(),
    })
}
