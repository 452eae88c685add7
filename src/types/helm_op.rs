use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::target::TargetMatch;

pub const HELM_OP_KIND: &str = "HelmOp";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct HelmOpSpecFields {
    pub chart: String,

    /// May be an `oci://` reference.
    pub repo: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, rename = "secretName", skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    #[serde(default, rename = "pollingIntervalSeconds", skip_serializing_if = "Option::is_none")]
    pub polling_interval_seconds: Option<u64>,

    /// A HelmOp projects to exactly one implicit target.
    #[serde(default)]
    pub target: TargetMatch,

    #[serde(default)]
    pub helm: crate::types::bundle::HelmOptions,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gitjob.fleet.cattle.io",
    version = "v1alpha1",
    kind = "HelmOp",
    shortname = "ho",
    namespaced,
    status = "HelmOpStatus",
    printcolumn = r#"{"name":"Repo", "jsonPath":".spec.repo", "type":"string"}"#,
    printcolumn = r#"{"name":"Version", "jsonPath":".status.version", "type":"string"}"#
)]
pub struct HelmOpSpec {
    #[serde(flatten)]
    pub fields: HelmOpSpecFields,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct HelmOpStatus {
    /// Resolved concrete version, e.g. after a semver range or "latest" is settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, rename = "observedGeneration")]
    pub observed_generation: i64,
}
