//! Target Matcher (C4): for each cluster, finds the first Bundle target
//! (in declaration order) whose selectors all pass, then checks the result
//! against target restrictions (spec §4.4).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::types::bundle::BundleSpecFields;
use crate::types::cluster::Cluster;
use crate::types::target::{BundleTarget, TargetMatch, TargetRestriction};

/// A minimal view of a Cluster's identity, decoupled from the full CR so
/// targeting logic can be unit-tested without constructing one.
#[derive(Clone, Debug)]
pub struct ClusterView {
    pub name: String,
    pub group_names: Vec<String>,
    pub labels: std::collections::BTreeMap<String, String>,
}

impl ClusterView {
    pub fn from_cluster(cluster: &Cluster, group_names: Vec<String>) -> Self {
        ClusterView {
            name: cluster.metadata.name.clone().unwrap_or_default(),
            group_names,
            labels: cluster
                .metadata
                .labels
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect(),
        }
    }
}

fn label_selector_matches(selector: &LabelSelector, labels: &std::collections::BTreeMap<String, String>) -> bool {
    let set: std::collections::BTreeMap<String, String> = labels.clone();
    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if set.get(k) != Some(v) {
                return false;
            }
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let value = set.get(&expr.key);
            let ok = match expr.operator.as_str() {
                "In" => expr
                    .values
                    .as_ref()
                    .map(|vs| value.map(|v| vs.contains(v)).unwrap_or(false))
                    .unwrap_or(false),
                "NotIn" => expr
                    .values
                    .as_ref()
                    .map(|vs| value.map(|v| !vs.contains(v)).unwrap_or(true))
                    .unwrap_or(true),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            };
            if !ok {
                return false;
            }
        }
    }
    true
}

/// Whether `cluster` satisfies every selector field set on `m` (spec §4.4,
/// §4.6 - rollout partitions reuse this same selector grammar).
pub fn match_against(m: &TargetMatch, cluster: &ClusterView) -> bool {
    if let Some(name) = &m.cluster_name {
        if name != &cluster.name {
            return false;
        }
    }
    if let Some(selector) = &m.cluster_selector {
        if !label_selector_matches(selector, &cluster.labels) {
            return false;
        }
    }
    if let Some(group) = &m.cluster_group {
        if !cluster.group_names.iter().any(|g| g == group) {
            return false;
        }
    }
    // clusterGroupSelector matches against a ClusterGroup's own labels,
    // which the caller must have already resolved into `group_names` for
    // groups whose selector passed - nothing further to check here.
    true
}

/// Returns the first matching target for `cluster`, per spec §4.4's
/// "first matching target wins" rule. `None` means no BundleDeployment for
/// this cluster.
pub fn first_matching_target<'a>(targets: &'a [BundleTarget], cluster: &ClusterView) -> Option<&'a BundleTarget> {
    targets.iter().find(|t| match_against(&t.match_, cluster))
}

/// A matched target with `doNotDeploy` still "wins" the match (no other
/// target is considered) but yields no BundleDeployment.
pub fn should_deploy(target: &BundleTarget) -> bool {
    !target.do_not_deploy
}

/// `TargetRestrictions` is an allow-list: an emitted BundleDeployment must
/// match at least one restriction or it's suppressed (spec §4.4).
pub fn passes_restrictions(restrictions: &[TargetRestriction], cluster: &ClusterView) -> bool {
    restrictions.is_empty() || restrictions.iter().any(|r| match_against(&r.match_, cluster))
}

/// Full matcher pass for one cluster against a Bundle's spec: `Some(target)`
/// only if a target matched, it isn't `doNotDeploy`, and it clears the
/// restriction allow-list.
pub fn resolve_target_for_cluster<'a>(
    spec: &'a BundleSpecFields,
    cluster: &ClusterView,
) -> Option<&'a BundleTarget> {
    let target = first_matching_target(&spec.targets, cluster)?;
    if !should_deploy(target) {
        return None;
    }
    if !passes_restrictions(&spec.target_restrictions, cluster) {
        return None;
    }
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(name: &str, labels: &[(&str, &str)]) -> ClusterView {
        ClusterView {
            name: name.to_string(),
            group_names: vec![],
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn target_named(name: &str) -> BundleTarget {
        BundleTarget {
            match_: TargetMatch {
                name: Some(name.to_string()),
                cluster_name: Some(name.to_string()),
                ..Default::default()
            },
            do_not_deploy: false,
            options: None,
        }
    }

    #[test]
    fn first_matching_target_wins() {
        let targets = vec![target_named("a"), target_named("b")];
        let c = cluster("a", &[]);
        let matched = first_matching_target(&targets, &c).unwrap();
        assert_eq!(matched.match_.name.as_deref(), Some("a"));
    }

    #[test]
    fn do_not_deploy_suppresses_deployment() {
        let mut target = target_named("a");
        target.do_not_deploy = true;
        let spec = BundleSpecFields {
            targets: vec![target],
            ..Default::default()
        };
        let c = cluster("a", &[]);
        assert!(resolve_target_for_cluster(&spec, &c).is_none());
    }

    #[test]
    fn restriction_must_match_to_emit() {
        let spec = BundleSpecFields {
            targets: vec![target_named("a")],
            target_restrictions: vec![TargetRestriction {
                match_: TargetMatch {
                    cluster_name: Some("other".to_string()),
                    ..Default::default()
                },
            }],
            ..Default::default()
        };
        let c = cluster("a", &[]);
        assert!(resolve_target_for_cluster(&spec, &c).is_none());
    }

    #[test]
    fn empty_restrictions_allow_everything() {
        let spec = BundleSpecFields {
            targets: vec![target_named("a")],
            ..Default::default()
        };
        let c = cluster("a", &[]);
        assert!(resolve_target_for_cluster(&spec, &c).is_some());
    }
}
