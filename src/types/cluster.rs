use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only input: this crate never writes Clusters. No token-issuance
/// logic is implemented (Non-goal); `ClusterRegistrationToken` is
/// represented only as an opaque name field should a future caller need it.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gitjob.fleet.cattle.io",
    version = "v1alpha1",
    kind = "Cluster",
    shortname = "cl",
    namespaced,
    status = "ClusterStatus"
)]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_name: Option<String>,
    #[serde(default, rename = "agentNamespace", skip_serializing_if = "Option::is_none")]
    pub agent_namespace: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ClusterStatus {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// RFC3339 timestamp of the agent's last check-in; the Cluster Monitor
    /// (spec §7, §8 scenario 6) uses this to force BundleDeployments offline
    /// once it's older than `max(3 * checkin_interval, configured_threshold)`.
    #[serde(default, rename = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gitjob.fleet.cattle.io",
    version = "v1alpha1",
    kind = "ClusterGroup",
    shortname = "cg",
    namespaced,
    status = "ClusterGroupStatus"
)]
pub struct ClusterGroupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ClusterGroupStatus {
    #[serde(default, rename = "clusterCount")]
    pub cluster_count: u32,
}

impl Cluster {
    /// True once `status.lastSeen` is older than `threshold`, or absent
    /// entirely (an agent that has never checked in counts as offline).
    pub fn is_offline(&self, threshold: chrono::Duration) -> bool {
        let Some(last_seen) = self.status.as_ref().and_then(|s| s.last_seen.as_deref()) else {
            return true;
        };
        match chrono::DateTime::parse_from_rfc3339(last_seen) {
            Ok(seen) => chrono::Utc::now().signed_duration_since(seen) > threshold,
            Err(_) => true,
        }
    }
}
