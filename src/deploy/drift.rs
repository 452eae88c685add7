//! Drift Monitor (C8): compares the live cluster state of a
//! BundleDeployment's resources against the rendered desired state,
//! classifying each as Ready/Modified/Missing/Orphaned and optionally
//! triggering a Helm rollback (spec §4.8).

use std::collections::BTreeSet;

use json_patch::diff;
use kube::api::DynamicObject;
use serde_json::Value;

use crate::types::bundle::ComparePatch;
use crate::types::bundle_deployment::ModifiedResource;

/// Identifies a resource well enough to correlate desired vs. live state
/// and to report in status.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceIdentity {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceIdentity {
    pub fn from_object(obj: &DynamicObject) -> Self {
        ResourceIdentity {
            api_version: obj.types.as_ref().map(|t| t.api_version.clone()).unwrap_or_default(),
            kind: obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone().unwrap_or_default(),
        }
    }
}

fn matches_compare_patch(patch: &ComparePatch, id: &ResourceIdentity) -> bool {
    patch.api_version == id.api_version
        && patch.kind == id.kind
        && patch.namespace.as_deref().map(|ns| Some(ns) == id.namespace.as_deref()).unwrap_or(true)
        && patch.name.as_deref().map(|n| n == id.name).unwrap_or(true)
}

/// Additive Fleet-managed fields a live object may carry that the rendered
/// manifest never declares; these never count as drift on their own
/// (spec §4.8, tolerance for Fleet's own namespace labels/annotations).
const TOLERATED_ADD_PATHS: &[&str] = &[
    "/metadata/labels/objectset.rio.cattle.io~1hash",
    "/metadata/labels/fleet.cattle.io~1managed-by",
];

/// Applies the Bundle's `comparePatches` rules to `live` before diffing:
/// `remove` drops the named subtree, `ignore` elides the whole resource
/// (returns `None`).
fn apply_compare_patches(mut live: Value, id: &ResourceIdentity, patches: &[ComparePatch]) -> Option<Value> {
    for patch in patches {
        if !matches_compare_patch(patch, id) {
            continue;
        }
        for op in &patch.operations {
            match op.op.as_str() {
                "ignore" => return None,
                "remove" => remove_pointer(&mut live, &op.path),
                _ => {}
            }
        }
    }
    Some(live)
}

/// Removes the value at `pointer` (an RFC6901 JSON pointer such as
/// `/metadata/annotations/foo`) from `value`, if present. Unlike the
/// `json_patch` crate's remove operation this never errors on a missing
/// path, since a `comparePatches` rule naming a field a given resource
/// doesn't have is a no-op, not a failure (spec §4.8).
fn remove_pointer(value: &mut Value, pointer: &str) {
    let Some(pointer) = pointer.strip_prefix('/') else {
        return;
    };
    let mut parts: Vec<String> = pointer.split('/').map(unescape_pointer_token).collect();
    let Some(last) = parts.pop() else { return };

    let mut current = value;
    for part in &parts {
        current = match current {
            Value::Object(map) => match map.get_mut(part) {
                Some(v) => v,
                None => return,
            },
            Value::Array(items) => match part.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(v) => v,
                None => return,
            },
            _ => return,
        };
    }

    match current {
        Value::Object(map) => {
            map.remove(&last);
        }
        Value::Array(items) => {
            if let Ok(idx) = last.parse::<usize>() {
                if idx < items.len() {
                    items.remove(idx);
                }
            }
        }
        _ => {}
    }
}

fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Ready,
    Modified,
    Missing,
    Orphaned,
}

pub struct DriftResult {
    pub classification: Classification,
    pub identity: ResourceIdentity,
    /// RFC6902 patch (as text) describing the drift, when `Modified`.
    pub patch: Option<String>,
}

/// Diffs one desired resource against its live counterpart, honoring
/// `comparePatches`. `live` is `None` when the resource is absent from the
/// cluster entirely (Missing).
pub fn classify_one(
    desired: &DynamicObject,
    live: Option<&DynamicObject>,
    compare_patches: &[ComparePatch],
) -> DriftResult {
    let identity = ResourceIdentity::from_object(desired);

    let Some(live) = live else {
        return DriftResult {
            classification: Classification::Missing,
            identity,
            patch: None,
        };
    };

    let desired_value = serde_json::to_value(desired).unwrap_or(Value::Null);
    let live_value = serde_json::to_value(live).unwrap_or(Value::Null);

    let Some(live_filtered) = apply_compare_patches(live_value, &identity, compare_patches) else {
        return DriftResult {
            classification: Classification::Ready,
            identity,
            patch: None,
        };
    };
    let Some(desired_filtered) = apply_compare_patches(desired_value, &identity, compare_patches) else {
        return DriftResult {
            classification: Classification::Ready,
            identity,
            patch: None,
        };
    };

    let patch = diff(&desired_filtered, &live_filtered);
    let meaningful: Vec<_> = patch
        .0
        .into_iter()
        .filter(|op| !is_tolerated_addition(op))
        .collect();

    if meaningful.is_empty() {
        DriftResult {
            classification: Classification::Ready,
            identity,
            patch: None,
        }
    } else {
        let rendered = serde_json::to_string(&json_patch::Patch(meaningful)).unwrap_or_default();
        DriftResult {
            classification: Classification::Modified,
            identity,
            patch: Some(rendered),
        }
    }
}

fn is_tolerated_addition(op: &json_patch::PatchOperation) -> bool {
    if !matches!(op, json_patch::PatchOperation::Add(_)) {
        return false;
    }
    let path = op.path().to_string();
    TOLERATED_ADD_PATHS.contains(&path.as_str())
}

/// Full pass: classifies every desired resource, then flags any live
/// resource carrying our `managed-by` label that isn't in the desired set
/// at all as Orphaned (spec §4.8).
pub fn classify_all(
    desired: &[DynamicObject],
    live_lookup: impl Fn(&ResourceIdentity) -> Option<DynamicObject>,
    managed_live: &[DynamicObject],
    compare_patches: &[ComparePatch],
) -> Vec<DriftResult> {
    let mut results = Vec::new();
    let mut desired_ids = BTreeSet::new();

    for d in desired {
        let id = ResourceIdentity::from_object(d);
        desired_ids.insert(id.clone());
        let live = live_lookup(&id);
        results.push(classify_one(d, live.as_ref(), compare_patches));
    }

    for live in managed_live {
        let id = ResourceIdentity::from_object(live);
        if !desired_ids.contains(&id) {
            results.push(DriftResult {
                classification: Classification::Orphaned,
                identity: id,
                patch: None,
            });
        }
    }

    results
}

pub fn to_modified_resources(results: Vec<DriftResult>) -> Vec<ModifiedResource> {
    results
        .into_iter()
        .filter(|r| r.classification != Classification::Ready)
        .map(|r| ModifiedResource {
            kind: r.identity.kind,
            api_version: r.identity.api_version,
            namespace: r.identity.namespace,
            name: r.identity.name,
            classification: match r.classification {
                Classification::Ready => unreachable!(),
                Classification::Modified => "Modified".to_string(),
                Classification::Missing => "Missing".to_string(),
                Classification::Orphaned => "Orphaned".to_string(),
            },
            patch: r.patch,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::{ObjectMeta, TypeMeta};
    use serde_json::json;

    fn object(name: &str, data: Value) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn identical_resources_are_ready() {
        let desired = object("a", json!({"data": {"k": "v"}}));
        let live = object("a", json!({"data": {"k": "v"}}));
        let result = classify_one(&desired, Some(&live), &[]);
        assert_eq!(result.classification, Classification::Ready);
    }

    #[test]
    fn changed_field_is_modified() {
        let desired = object("a", json!({"data": {"k": "v"}}));
        let live = object("a", json!({"data": {"k": "changed"}}));
        let result = classify_one(&desired, Some(&live), &[]);
        assert_eq!(result.classification, Classification::Modified);
        assert!(result.patch.is_some());
    }

    #[test]
    fn missing_live_resource_is_missing() {
        let desired = object("a", json!({"data": {}}));
        let result = classify_one(&desired, None, &[]);
        assert_eq!(result.classification, Classification::Missing);
    }

    #[test]
    fn ignore_compare_patch_suppresses_drift() {
        let desired = object("a", json!({"data": {"k": "v"}}));
        let live = object("a", json!({"data": {"k": "changed"}}));
        let patches = vec![ComparePatch {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            namespace: None,
            name: None,
            operations: vec![crate::types::bundle::ComparePatchOperation {
                op: "ignore".to_string(),
                path: String::new(),
            }],
        }];
        let result = classify_one(&desired, Some(&live), &patches);
        assert_eq!(result.classification, Classification::Ready);
    }

    #[test]
    fn unmatched_managed_resource_is_orphaned() {
        let desired = vec![object("a", json!({"data": {}}))];
        let managed_live = vec![object("b", json!({"data": {}}))];
        let results = classify_all(&desired, |_| None, &managed_live, &[]);
        let orphaned: Vec<_> = results
            .iter()
            .filter(|r| r.classification == Classification::Orphaned)
            .collect();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].identity.name, "b");
    }
}
