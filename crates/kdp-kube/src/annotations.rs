//! Metadata the reconciler manages on rendered objects
//!
//! - the last-applied configuration annotation feeding three-way merges
//! - common labels and annotations of the owning group
//! - the controller owner reference pointing at the subject

use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;

use kdp_core::ObjectIdentity;

/// Annotation holding the configuration last applied by the reconciler
pub const LAST_APPLIED: &str = "kdp.io/last-applied-configuration";

/// Value of [`LAST_APPLIED`] opting an object out of tracking
pub const OPT_OUT: &str = "-";

/// Kinds that never carry the last-applied annotation
pub const EXCLUDED_KINDS: &[&str] = &["Secret", "ConfigMap", "CustomResourceDefinition", "Application"];

fn annotations(object: &JsonValue) -> Option<&Map<String, JsonValue>> {
    object.pointer("/metadata/annotations")?.as_object()
}

fn metadata_mut(object: &mut JsonValue) -> Option<&mut Map<String, JsonValue>> {
    let root = object.as_object_mut()?;
    root.entry("metadata")
        .or_insert_with(|| JsonValue::Object(Map::new()))
        .as_object_mut()
}

fn string_map_mut<'a>(metadata: &'a mut Map<String, JsonValue>, key: &str) -> Option<&'a mut Map<String, JsonValue>> {
    let entry = metadata.entry(key).or_insert_with(|| JsonValue::Object(Map::new()));
    if entry.is_null() {
        *entry = JsonValue::Object(Map::new());
    }
    entry.as_object_mut()
}

/// Whether the object should carry the last-applied annotation
pub fn tracks_last_applied(object: &JsonValue) -> bool {
    if is_excluded_kind(object) {
        return false;
    }
    let opted_out = annotations(object)
        .and_then(|a| a.get(LAST_APPLIED))
        .and_then(JsonValue::as_str)
        == Some(OPT_OUT);
    !opted_out
}

/// Record the object's own configuration in its last-applied annotation
///
/// Objects that are excluded or opted out are returned untouched; an
/// excluded kind has a stray annotation removed.
pub fn stamp_last_applied(object: &mut JsonValue) -> Result<(), serde_json::Error> {
    if !tracks_last_applied(object) {
        if is_excluded_kind(object) {
            if let Some(metadata) = metadata_mut(object) {
                if let Some(JsonValue::Object(annotations)) = metadata.get_mut("annotations") {
                    annotations.remove(LAST_APPLIED);
                }
            }
        }
        return Ok(());
    }

    let mut recorded = object.clone();
    if let Some(JsonValue::Object(metadata)) = recorded.get_mut("metadata") {
        let emptied = match metadata.get_mut("annotations") {
            Some(JsonValue::Object(annotations)) => {
                annotations.remove(LAST_APPLIED);
                annotations.is_empty()
            }
            _ => false,
        };
        if emptied {
            metadata.remove("annotations");
        }
    }
    let text = serde_json::to_string(&recorded)?;

    if let Some(annotations) = metadata_mut(object).and_then(|m| string_map_mut(m, "annotations")) {
        annotations.insert(LAST_APPLIED.to_string(), JsonValue::String(text));
    }
    Ok(())
}

/// Configuration recorded in a live object's last-applied annotation
pub fn read_last_applied(object: &JsonValue) -> Option<JsonValue> {
    let text = annotations(object)?.get(LAST_APPLIED)?.as_str()?;
    if text == OPT_OUT {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(%err, "ignoring unreadable last-applied configuration");
            None
        }
    }
}

/// Whether objects of this kind are excluded from last-applied tracking
pub fn is_excluded_kind(object: &JsonValue) -> bool {
    object
        .get("kind")
        .and_then(JsonValue::as_str)
        .is_some_and(|kind| EXCLUDED_KINDS.contains(&kind))
}

/// Remove a last-applied annotation an excluded live object still carries
pub fn clear_stale_last_applied(patch: &mut JsonValue, live: &JsonValue) {
    if !is_excluded_kind(live) || annotations(live).is_none_or(|a| !a.contains_key(LAST_APPLIED)) {
        return;
    }
    if let Some(target) = metadata_mut(patch).and_then(|m| string_map_mut(m, "annotations")) {
        target.insert(LAST_APPLIED.to_string(), JsonValue::Null);
    }
}

/// Merge common labels and annotations into the object's metadata
///
/// Common values override the keys the template set.
pub fn merge_common_metadata(
    object: &mut JsonValue,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) {
    let Some(metadata) = metadata_mut(object) else {
        return;
    };
    for (key, values) in [("labels", labels), ("annotations", annotations)] {
        if values.is_empty() {
            continue;
        }
        if let Some(target) = string_map_mut(metadata, key) {
            for (k, v) in values {
                target.insert(k.clone(), JsonValue::String(v.clone()));
            }
        }
    }
}

/// Set the subject as the controller owner of the object
///
/// Other owner references are kept; a previous controller reference to
/// the same UID is replaced.
pub fn set_controller_owner(object: &mut JsonValue, owner: &ObjectIdentity) -> bool {
    let Some(uid) = owner.uid.as_deref() else {
        return false;
    };
    let Some(metadata) = metadata_mut(object) else {
        return false;
    };
    let reference = json!({
        "apiVersion": owner.api_version,
        "kind": owner.kind,
        "name": owner.name,
        "uid": uid,
        "controller": true,
        "blockOwnerDeletion": true,
    });

    let entry = metadata
        .entry("ownerReferences")
        .or_insert_with(|| JsonValue::Array(Vec::new()));
    if !entry.is_array() {
        *entry = JsonValue::Array(Vec::new());
    }
    if let JsonValue::Array(references) = entry {
        references.retain(|r| r.get("uid").and_then(JsonValue::as_str) != Some(uid));
        references.push(reference);
    }
    true
}

fn owner_references(object: &JsonValue) -> Option<&Vec<JsonValue>> {
    object.pointer("/metadata/ownerReferences")?.as_array()
}

fn reference_uid(reference: &JsonValue) -> Option<&str> {
    reference.get("uid").and_then(JsonValue::as_str)
}

/// Carry over owner references the live object holds from other writers
///
/// Merge patches replace arrays whole, so the desired list is rebuilt from
/// the live one in live order: references with a desired UID take the
/// desired value, references only the last-applied configuration listed
/// are dropped, and any other live reference is kept. Desired references
/// missing from the live object are appended.
pub fn merge_owner_references(desired: &mut JsonValue, live: &JsonValue, last_applied: Option<&JsonValue>) {
    let Some(live_refs) = owner_references(live).filter(|refs| !refs.is_empty()) else {
        return;
    };
    let wanted: Vec<JsonValue> = owner_references(desired).cloned().unwrap_or_default();
    let previous: Vec<&str> = last_applied
        .and_then(owner_references)
        .map(|refs| refs.iter().filter_map(reference_uid).collect())
        .unwrap_or_default();

    let mut merged = Vec::with_capacity(live_refs.len() + wanted.len());
    for reference in live_refs {
        let uid = reference_uid(reference);
        match wanted.iter().find(|w| uid.is_some() && reference_uid(w) == uid) {
            Some(replacement) => merged.push(replacement.clone()),
            None if uid.is_some_and(|uid| previous.contains(&uid)) => {}
            None => merged.push(reference.clone()),
        }
    }
    for reference in &wanted {
        let uid = reference_uid(reference);
        if !live_refs.iter().any(|l| uid.is_some() && reference_uid(l) == uid) {
            merged.push(reference.clone());
        }
    }

    if let Some(metadata) = metadata_mut(desired) {
        metadata.insert("ownerReferences".to_string(), JsonValue::Array(merged));
    }
}
