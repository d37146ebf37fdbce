//! Three-way merge patches
//!
//! The patch moves a live object to the desired configuration without
//! touching fields other writers own. Inputs are the configuration the
//! reconciler applied last time, the desired configuration and the live
//! object. The result uses JSON merge patch semantics (RFC 7386):
//! - a key present in last-applied but absent in desired is set to `null`
//! - a key whose desired value differs from live is set
//! - nested objects recurse; arrays are replaced whole

use serde_json::{Map, Value as JsonValue};

/// Compute the merge patch taking `live` to `desired`
///
/// Without a last-applied configuration nothing is deleted.
pub fn three_way_merge(last_applied: Option<&JsonValue>, desired: &JsonValue, live: &JsonValue) -> JsonValue {
    match (desired, live) {
        (JsonValue::Object(desired), JsonValue::Object(live)) => JsonValue::Object(merge_objects(
            last_applied.and_then(JsonValue::as_object),
            desired,
            live,
        )),
        _ => desired.clone(),
    }
}

fn merge_objects(
    last: Option<&Map<String, JsonValue>>,
    desired: &Map<String, JsonValue>,
    live: &Map<String, JsonValue>,
) -> Map<String, JsonValue> {
    let mut patch = Map::new();

    if let Some(last) = last {
        for key in last.keys() {
            if !desired.contains_key(key) && live.contains_key(key) {
                patch.insert(key.clone(), JsonValue::Null);
            }
        }
    }

    for (key, want) in desired {
        let have = live.get(key);
        match (want, have) {
            (JsonValue::Object(want), Some(JsonValue::Object(have))) => {
                let last = last.and_then(|l| l.get(key)).and_then(JsonValue::as_object);
                let nested = merge_objects(last, want, have);
                if !nested.is_empty() {
                    patch.insert(key.clone(), JsonValue::Object(nested));
                }
            }
            (want, Some(have)) if want == have => {}
            (want, _) => {
                patch.insert(key.clone(), want.clone());
            }
        }
    }

    patch
}

/// Whether a patch changes nothing
pub fn is_empty_patch(patch: &JsonValue) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

/// Apply a JSON merge patch in place
pub fn apply_merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    let JsonValue::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = JsonValue::Object(Map::new());
    }
    if let JsonValue::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply_merge_patch(target.entry(key.clone()).or_insert(JsonValue::Null), value);
            }
        }
    }
}
