use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::bundle::{BundleDeploymentOptions, BundleResource};

pub const BUNDLE_DEPLOYMENT_KIND: &str = "BundleDeployment";

/// A dependency on another Bundle's readiness within the same cluster
/// before this one is applied (spec §9, cycle detection Design Note).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct BundleDependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct BundleDeploymentSpecFields {
    /// The Bundle's resource payload, copied in verbatim so the Deployer can
    /// render it without a second trip to the Bundle (spec §4.7 step 1: a
    /// Bundle that stores inline resources, rather than referencing an
    /// OCI/HTTP chart, is rendered through an on-the-fly chart built from
    /// these files).
    #[serde(default)]
    pub resources: Vec<BundleResource>,

    #[serde(default)]
    pub options: BundleDeploymentOptions,

    #[serde(default, rename = "stagedOptions", skip_serializing_if = "Option::is_none")]
    pub staged_options: Option<BundleDeploymentOptions>,

    /// SHA-256 over (resources, options); see `crate::content_hash`.
    #[serde(rename = "deploymentID")]
    pub deployment_id: String,

    #[serde(default, rename = "stagedDeploymentID", skip_serializing_if = "Option::is_none")]
    pub staged_deployment_id: Option<String>,

    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<BundleDependency>,

    #[serde(default, rename = "correctDrift")]
    pub correct_drift: crate::types::bundle::DriftCorrection,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gitjob.fleet.cattle.io",
    version = "v1alpha1",
    kind = "BundleDeployment",
    shortname = "bdep",
    namespaced,
    status = "BundleDeploymentStatus",
    printcolumn = r#"{"name":"Ready", "jsonPath":".status.ready", "type":"boolean"}"#,
    printcolumn = r#"{"name":"NonModified", "jsonPath":".status.nonModified", "type":"boolean"}"#
)]
pub struct BundleDeploymentSpec {
    #[serde(flatten)]
    pub fields: BundleDeploymentSpecFields,
}

/// One non-ready resource reported in status, capped at 10 entries (spec §3).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct NonReadyResource {
    pub kind: String,
    pub api_version: String,
    pub namespace: Option<String>,
    pub name: String,
    pub summary: String,
}

/// One drifted resource reported in status, capped at 10 entries (spec §4.8).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct ModifiedResource {
    pub kind: String,
    pub api_version: String,
    pub namespace: Option<String>,
    pub name: String,
    /// `Modified`, `Missing`, or `Orphaned`.
    pub classification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct BundleDeploymentStatus {
    #[serde(default, rename = "appliedDeploymentID", skip_serializing_if = "Option::is_none")]
    pub applied_deployment_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    #[serde(default)]
    pub ready: bool,

    #[serde(default, rename = "nonModified")]
    pub non_modified: bool,

    #[serde(default, rename = "nonReadyStatus")]
    pub non_ready_status: Vec<NonReadyResource>,

    #[serde(default, rename = "modifiedStatus")]
    pub modified_status: Vec<ModifiedResource>,

    #[serde(default, rename = "incompleteState")]
    pub incomplete_state: bool,

    /// `Installed`, `Ready`, and `Monitored` conditions (spec §7's error
    /// taxonomy surfaces Helm failures as `Installed=False`; the Cluster
    /// Monitor surfaces offline clusters as `Ready=False`/`Monitored=False`
    /// with an "offline" message, spec §8 scenario 6).
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

pub const CONDITION_INSTALLED: &str = "Installed";
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_MONITORED: &str = "Monitored";

const MAX_STATUS_RESOURCES: usize = 10;

impl BundleDeployment {
    /// Invariant 2 from spec §3: ready requires no pending drift and no
    /// incomplete-state flag.
    pub fn is_ready(&self) -> bool {
        let status = &self.status;
        match status {
            Some(s) => s.ready && !s.incomplete_state,
            None => false,
        }
    }

    /// Caps a non-ready-resource list at 10 entries, returning whether
    /// truncation happened so the caller can set `incompleteState` (spec §3,
    /// §8 boundary behavior: "the 11th sets incompleteState=true").
    pub fn cap_non_ready(resources: Vec<NonReadyResource>) -> (Vec<NonReadyResource>, bool) {
        let truncated = resources.len() > MAX_STATUS_RESOURCES;
        (resources.into_iter().take(MAX_STATUS_RESOURCES).collect(), truncated)
    }

    pub fn cap_modified(resources: Vec<ModifiedResource>) -> (Vec<ModifiedResource>, bool) {
        let truncated = resources.len() > MAX_STATUS_RESOURCES;
        (resources.into_iter().take(MAX_STATUS_RESOURCES).collect(), truncated)
    }
}

/// Inserts or replaces a condition by `type_`, mirroring the upsert
/// semantics `kube`'s own `Condition` lists expect.
pub fn set_condition(conditions: &mut Vec<Condition>, type_: &str, status: bool, reason: &str, message: &str) {
    let now = k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now());
    let status_str = if status { "True" } else { "False" }.to_string();
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status_str {
            existing.last_transition_time = now;
        }
        existing.status = status_str;
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status_str,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now,
            observed_generation: None,
        });
    }
}
