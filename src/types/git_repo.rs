use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::target::BundleTarget;

pub const GIT_REPO_KIND: &str = "GitRepo";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct GitRepoSpecFields {
    pub repo: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Wins over `branch` when both are set (Open Question resolved in DESIGN.md).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    #[serde(default, rename = "clientSecretName", skip_serializing_if = "Option::is_none")]
    pub client_secret_name: Option<String>,

    #[serde(default, rename = "helmRepoURLRegex", skip_serializing_if = "Option::is_none")]
    pub helm_repo_url_regex: Option<String>,

    #[serde(default)]
    pub targets: Vec<BundleTarget>,

    #[serde(default, rename = "pollingIntervalSeconds", skip_serializing_if = "Option::is_none")]
    pub polling_interval_seconds: Option<u64>,

    /// Bumping this forces a resync even when the observed commit is unchanged.
    #[serde(default, rename = "forceSyncGeneration")]
    pub force_sync_generation: i64,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gitjob.fleet.cattle.io",
    version = "v1alpha1",
    kind = "GitRepo",
    shortname = "gr",
    namespaced,
    status = "GitRepoStatus",
    printcolumn = r#"{"name":"Repo", "jsonPath":".spec.repo", "type":"string"}"#,
    printcolumn = r#"{"name":"Commit", "jsonPath":".status.commit", "type":"string"}"#
)]
pub struct GitRepoSpec {
    #[serde(flatten)]
    pub fields: GitRepoSpecFields,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct GitRepoStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    #[serde(default, rename = "observedGeneration")]
    pub observed_generation: i64,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// RFC3339 timestamp of whichever observation (poll or webhook) is most
    /// recent; internal only, used to decide which observation wins
    /// (invariant 4, spec §3). Not surfaced in `kubectl get` output.
    #[serde(default, rename = "observedAt", skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<String>,
}

impl GitRepo {
    /// `revision` takes precedence over `branch` when both are set.
    pub fn effective_ref(&self) -> Option<&str> {
        self.spec
            .fields
            .revision
            .as_deref()
            .or(self.spec.fields.branch.as_deref())
    }
}
