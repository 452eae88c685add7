use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::target::{BundleTarget, TargetRestriction};

pub const BUNDLE_KIND: &str = "Bundle";

/// One file contributed to a Bundle's payload (spec §3, §6).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct BundleResource {
    /// POSIX path relative to the bundle root, or `.chart/<hash>/<path>`
    /// for files that came from a downloaded Helm chart.
    pub name: String,
    /// Raw UTF-8 content, or base64-encoded gzip bytes when `encoding` is set.
    pub content: String,
    /// Empty for inline content, `"base64+gz"` when compressed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoding: String,
}

/// A predicted output resource identity, used to size `desiredReady` without
/// re-rendering every BundleDeployment.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct ResourceKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema, Default)]
pub struct HelmOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(default)]
    pub values: serde_json::Value,
    #[serde(default)]
    pub take_ownership: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_true")]
    pub atomic: bool,
    #[serde(default)]
    pub wait_for_jobs: bool,
    #[serde(default)]
    pub max_history: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
    /// Disables the Go-template-style `${ ... }` substitution pass (spec §4.5).
    #[serde(default)]
    pub disable_preprocess: bool,
}

fn default_true() -> bool {
    true
}

/// One JSON-patch-shaped drift comparison rule (spec §4.8).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct ComparePatch {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub operations: Vec<ComparePatchOperation>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct ComparePatchOperation {
    /// `"remove"` drops the JSON-pointer subtree before comparison;
    /// `"ignore"` elides the whole resource from drift checking.
    pub op: String,
    pub path: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct DriftCorrection {
    #[serde(default)]
    pub enabled: bool,
    /// Whether a failed rollback remains in Helm history.
    #[serde(default)]
    pub keep_fail_history: bool,
}

/// Merged deployment-time knobs: defaults live on `Bundle.spec.options`,
/// overridden per-target by `BundleTarget.options`, and further customized
/// by cluster-label/template substitution before being baked into a
/// BundleDeployment.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct BundleDeploymentOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmOptions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compare_patches: Vec<ComparePatch>,
    #[serde(default)]
    pub correct_drift: DriftCorrection,
    #[serde(default)]
    pub service_account: Option<String>,
}

impl BundleDeploymentOptions {
    /// Merge `override_` on top of `self`, `Some` fields from `override_`
    /// winning. Used to layer a target's options onto the Bundle defaults.
    pub fn merged_with(&self, override_: &BundleDeploymentOptions) -> BundleDeploymentOptions {
        BundleDeploymentOptions {
            default_namespace: override_
                .default_namespace
                .clone()
                .or_else(|| self.default_namespace.clone()),
            helm: match (&self.helm, &override_.helm) {
                (Some(base), Some(over)) => Some(merge_helm(base, over)),
                (None, Some(over)) => Some(over.clone()),
                (base, None) => base.clone(),
            },
            compare_patches: if override_.compare_patches.is_empty() {
                self.compare_patches.clone()
            } else {
                override_.compare_patches.clone()
            },
            correct_drift: if override_.correct_drift.enabled {
                override_.correct_drift.clone()
            } else {
                self.correct_drift.clone()
            },
            service_account: override_
                .service_account
                .clone()
                .or_else(|| self.service_account.clone()),
        }
    }
}

fn merge_helm(base: &HelmOptions, over: &HelmOptions) -> HelmOptions {
    let mut merged = base.clone();
    if over.repo.is_some() {
        merged.repo = over.repo.clone();
    }
    if over.chart.is_some() {
        merged.chart = over.chart.clone();
    }
    if over.version.is_some() {
        merged.version = over.version.clone();
    }
    if over.release_name.is_some() {
        merged.release_name = over.release_name.clone();
    }
    if !over.values.is_null() {
        merged.values = crate::targeting::customize::deep_merge_json(&merged.values, &over.values);
    }
    merged.take_ownership = over.take_ownership || base.take_ownership;
    merged.force = over.force || base.force;
    merged.atomic = over.atomic && base.atomic;
    merged.wait_for_jobs = over.wait_for_jobs || base.wait_for_jobs;
    merged.max_history = over.max_history.or(base.max_history);
    merged.timeout_seconds = over.timeout_seconds.or(base.timeout_seconds);
    merged.disable_preprocess = over.disable_preprocess || base.disable_preprocess;
    merged
}

/// A single user-declared rollout partition; unmatched clusters fall into a
/// trailing auto-partition (spec §4.6).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct RolloutPartition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, flatten)]
    pub match_: crate::types::target::TargetMatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct RolloutStrategy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<RolloutPartition>,
    /// Percentage (e.g. `"25%"`) used to auto-partition when `partitions` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_partition_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable_partitions: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct BundleSpecFields {
    #[serde(default)]
    pub resources: Vec<BundleResource>,

    #[serde(default)]
    pub targets: Vec<BundleTarget>,

    #[serde(default, rename = "targetRestrictions")]
    pub target_restrictions: Vec<TargetRestriction>,

    #[serde(default, rename = "rolloutStrategy")]
    pub rollout_strategy: RolloutStrategy,

    #[serde(default)]
    pub options: BundleDeploymentOptions,

    #[serde(default, rename = "resourceKeys")]
    pub resource_keys: Vec<ResourceKey>,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gitjob.fleet.cattle.io",
    version = "v1alpha1",
    kind = "Bundle",
    shortname = "bd",
    namespaced,
    status = "BundleStatus",
    printcolumn = r#"{"name":"Ready", "jsonPath":".status.summary.ready", "type":"integer"}"#,
    printcolumn = r#"{"name":"DesiredReady", "jsonPath":".status.summary.desiredReady", "type":"integer"}"#
)]
pub struct BundleSpec {
    #[serde(flatten)]
    pub fields: BundleSpecFields,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct BundleSummary {
    #[serde(default)]
    pub ready: u32,
    #[serde(default, rename = "desiredReady")]
    pub desired_ready: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct BundleStatus {
    #[serde(default)]
    pub summary: BundleSummary,
    #[serde(default, rename = "observedGeneration")]
    pub observed_generation: i64,
}

impl Bundle {
    pub fn owning_repo_name(&self) -> Option<String> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(crate::labels::REPO_NAME))
            .cloned()
    }
}
