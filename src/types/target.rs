use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::bundle::BundleDeploymentOptions;

/// The selector half of a target: chooses which Clusters a target applies
/// to. Shared between `BundleTarget` (a full target with deployment
/// options) and `TargetRestriction` (an allow-list entry with none).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct TargetMatch {
    /// Target display name; auto-defaulted to `target000`, `target001`, ...
    /// by the Bundle Reader when `fleet.yaml` omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, rename = "clusterName", skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    #[serde(default, rename = "clusterSelector", skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<LabelSelector>,

    #[serde(default, rename = "clusterGroup", skip_serializing_if = "Option::is_none")]
    pub cluster_group: Option<String>,

    #[serde(
        default,
        rename = "clusterGroupSelector",
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_group_selector: Option<LabelSelector>,
}

impl TargetMatch {
    /// A target with none of its selector fields set matches every cluster;
    /// this is only meaningful for the catch-all trailing target some
    /// `fleet.yaml` files declare.
    pub fn is_wildcard(&self) -> bool {
        self.cluster_name.is_none()
            && self.cluster_selector.is_none()
            && self.cluster_group.is_none()
            && self.cluster_group_selector.is_none()
    }
}

/// A full target: selector plus the deployment options it contributes when
/// it wins the match for a cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct BundleTarget {
    #[serde(flatten)]
    pub match_: TargetMatch,

    /// If true, clusters matched by this target get no BundleDeployment at all.
    #[serde(default, rename = "doNotDeploy")]
    pub do_not_deploy: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BundleDeploymentOptions>,
}

/// An allow-list entry restricting which targets a customization may widen
/// a Bundle's reach to. Structurally identical to a target minus options.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct TargetRestriction {
    #[serde(flatten)]
    pub match_: TargetMatch,
}

impl From<BundleTarget> for TargetRestriction {
    fn from(t: BundleTarget) -> Self {
        TargetRestriction { match_: t.match_ }
    }
}
