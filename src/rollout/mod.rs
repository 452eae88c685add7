//! Rollout Controller (C6): paces how many BundleDeployments move to a new
//! `deploymentID` per reconciliation round, honoring partitions and
//! `maxUnavailable`/`maxUnavailablePartitions` (spec §4.6). Pure functions
//! over `&[...]` + `RolloutStrategy`, no I/O, unit-testable without a
//! cluster - grounded in the teacher's preference for small composable
//! `AppResult<T>`-returning functions in `kubernetes/deploy_config_status_builder.rs`.

use crate::targeting::matcher::ClusterView;
use crate::types::bundle::RolloutStrategy;

/// Global cap on simultaneous new-`deploymentID` staging per Bundle per
/// round (spec §3 invariant 6, §4.6).
pub const MAX_NEW: usize = 50;

/// One cluster's current pacing-relevant state.
#[derive(Clone, Debug)]
pub struct DeploymentState {
    pub cluster_name: String,
    /// `status.appliedDeploymentID`, if any.
    pub applied_deployment_id: Option<String>,
    /// `spec.deploymentID`, the one this cluster should end up running.
    pub desired_deployment_id: String,
    pub ready: bool,
}

impl DeploymentState {
    fn is_pending(&self) -> bool {
        self.applied_deployment_id.as_deref() != Some(self.desired_deployment_id.as_str())
    }

    /// "unavailable" per spec §4.6: not Ready, or not yet on the desired ID.
    fn is_unavailable(&self) -> bool {
        !self.ready || self.is_pending()
    }
}

#[derive(Clone, Debug)]
pub struct Partition {
    pub name: Option<String>,
    pub clusters: Vec<String>,
    pub max_unavailable: Option<String>,
}

/// Splits `clusters` into partitions per spec §4.6: explicit
/// `strategy.partitions` first (by declaration order), any cluster matched
/// by none of them falling into a trailing auto-partition; if no partitions
/// are declared at all, clusters are auto-partitioned into groups sized by
/// `autoPartitionSize` (default 25%).
pub fn partition_clusters(strategy: &RolloutStrategy, clusters: &[ClusterView]) -> Vec<Partition> {
    if strategy.partitions.is_empty() {
        return auto_partition(clusters, strategy.auto_partition_size.as_deref());
    }

    let mut assigned: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut partitions = Vec::new();

    for (i, p) in strategy.partitions.iter().enumerate() {
        let members: Vec<String> = clusters
            .iter()
            .filter(|c| !assigned.contains(&c.name) && crate::targeting::matcher::match_against(&p.match_, c))
            .map(|c| c.name.clone())
            .collect();
        for name in &members {
            assigned.insert(name.clone());
        }
        partitions.push(Partition {
            name: p.name.clone().or_else(|| Some(format!("partition{i}"))),
            clusters: members,
            max_unavailable: p.max_unavailable.clone(),
        });
    }

    let trailing: Vec<String> = clusters
        .iter()
        .filter(|c| !assigned.contains(&c.name))
        .map(|c| c.name.clone())
        .collect();
    if !trailing.is_empty() {
        partitions.push(Partition {
            name: Some("auto".to_string()),
            clusters: trailing,
            max_unavailable: None,
        });
    }

    partitions
}

fn auto_partition(clusters: &[ClusterView], size_spec: Option<&str>) -> Vec<Partition> {
    if clusters.is_empty() {
        return Vec::new();
    }
    let percent = size_spec
        .and_then(parse_percent)
        .unwrap_or(25);
    let chunk_size = percent_to_count(percent, clusters.len()).max(1);

    let mut sorted: Vec<&ClusterView> = clusters.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    sorted
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| Partition {
            name: Some(format!("auto{i}")),
            clusters: chunk.iter().map(|c| c.name.clone()).collect(),
            max_unavailable: None,
        })
        .collect()
}

fn parse_percent(s: &str) -> Option<u32> {
    s.trim().trim_end_matches('%').parse().ok()
}

/// Rounds `percent`% of `total` up to the nearest whole count, the way
/// Kubernetes rolling-update budgets round (spec §4.6: "rounded up").
fn percent_to_count(percent: u32, total: usize) -> usize {
    ((total as u64 * percent as u64 + 99) / 100) as usize
}

/// Resolves a `maxUnavailable` spec string (`"10%"` or an absolute count)
/// against a partition's size, falling back to `default_percent` when unset.
fn resolve_max_unavailable(spec: Option<&str>, default_percent: u8, size: usize) -> usize {
    match spec {
        Some(s) if s.trim().ends_with('%') => {
            percent_to_count(parse_percent(s).unwrap_or(default_percent as u32), size)
        }
        Some(s) => s.trim().parse().unwrap_or_else(|_| percent_to_count(default_percent as u32, size)),
        None => percent_to_count(default_percent as u32, size),
    }
}

pub struct RolloutPlan {
    /// Cluster names allowed to stage their new `deploymentID` this round.
    pub advance: Vec<String>,
    /// True if at least one partition is holding back pending deployments
    /// because its `maxUnavailable` budget (or the global `MaxNew`/
    /// `maxUnavailablePartitions` budget) is exhausted (spec §4.6: "stalls
    /// due to these caps, the reconciler requeues with backoff").
    pub stalled: bool,
}

/// Plans one reconciliation round's worth of transitions (spec §4.6).
/// `default_max_unavailable_percent` backs partitions (and the strategy
/// overall) that don't set their own `maxUnavailable`.
pub fn plan_rollout(
    deployments: &[DeploymentState],
    partitions: &[Partition],
    default_max_unavailable_percent: u8,
    max_unavailable_partitions: usize,
) -> RolloutPlan {
    use std::collections::HashMap;

    let by_name: HashMap<&str, &DeploymentState> =
        deployments.iter().map(|d| (d.cluster_name.as_str(), d)).collect();

    let mut advance = Vec::new();
    let mut new_budget = MAX_NEW;
    let mut unavailable_partitions = 0usize;
    let mut stalled = false;

    for partition in partitions {
        if partition.clusters.is_empty() {
            continue;
        }
        let budget = resolve_max_unavailable(
            partition.max_unavailable.as_deref(),
            default_max_unavailable_percent,
            partition.clusters.len(),
        )
        .max(1);

        let mut unavailable_now = partition
            .clusters
            .iter()
            .filter_map(|c| by_name.get(c.as_str()))
            .filter(|d| d.is_unavailable())
            .count();

        if unavailable_now >= budget {
            unavailable_partitions += 1;
            if unavailable_partitions > max_unavailable_partitions {
                stalled = true;
            }
            continue;
        }

        let mut pending: Vec<&DeploymentState> = partition
            .clusters
            .iter()
            .filter_map(|c| by_name.get(c.as_str()))
            .filter(|d| d.is_pending())
            .collect();
        pending.sort_by(|a, b| a.cluster_name.cmp(&b.cluster_name));

        for d in pending {
            if unavailable_now >= budget {
                stalled = true;
                break;
            }
            if new_budget == 0 {
                stalled = true;
                break;
            }
            advance.push(d.cluster_name.clone());
            unavailable_now += 1;
            new_budget -= 1;
        }
    }

    RolloutPlan { advance, stalled }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(name: &str, applied: Option<&str>, desired: &str, ready: bool) -> DeploymentState {
        DeploymentState {
            cluster_name: name.to_string(),
            applied_deployment_id: applied.map(str::to_string),
            desired_deployment_id: desired.to_string(),
            ready,
        }
    }

    #[test]
    fn percent_rounds_up() {
        assert_eq!(percent_to_count(10, 25), 3);
        assert_eq!(percent_to_count(10, 100), 10);
        assert_eq!(percent_to_count(25, 7), 2);
    }

    #[test]
    fn single_partition_respects_max_unavailable_budget() {
        let deployments: Vec<DeploymentState> = (0..20)
            .map(|i| state(&format!("c{i}"), Some("old"), "new", true))
            .collect();
        let partitions = vec![Partition {
            name: None,
            clusters: deployments.iter().map(|d| d.cluster_name.clone()).collect(),
            max_unavailable: Some("10%".to_string()),
        }];

        let plan = plan_rollout(&deployments, &partitions, 10, 0);
        // 10% of 20 = 2: only 2 may advance before the partition saturates.
        assert_eq!(plan.advance.len(), 2);
        assert!(plan.stalled);
    }

    #[test]
    fn already_unavailable_deployments_block_new_advances() {
        let mut deployments: Vec<DeploymentState> = (0..10)
            .map(|i| state(&format!("c{i}"), Some("old"), "new", true))
            .collect();
        // two already mid-rollout and not ready yet
        deployments[0].applied_deployment_id = Some("new".to_string());
        deployments[0].ready = false;
        deployments[1].applied_deployment_id = Some("new".to_string());
        deployments[1].ready = false;

        let partitions = vec![Partition {
            name: None,
            clusters: deployments.iter().map(|d| d.cluster_name.clone()).collect(),
            max_unavailable: Some("20%".to_string()),
        }];

        // budget = ceil(10 * 20 / 100) = 2, already 2 unavailable -> no room.
        let plan = plan_rollout(&deployments, &partitions, 10, 0);
        assert!(plan.advance.is_empty());
        assert!(plan.stalled);
    }

    #[test]
    fn global_max_new_caps_total_advances_across_partitions() {
        let deployments: Vec<DeploymentState> = (0..120)
            .map(|i| state(&format!("c{i}"), Some("old"), "new", true))
            .collect();
        // one partition per 30 clusters, generous per-partition budget so MaxNew is the binding constraint.
        let partitions: Vec<Partition> = deployments
            .chunks(30)
            .enumerate()
            .map(|(i, chunk)| Partition {
                name: Some(format!("p{i}")),
                clusters: chunk.iter().map(|d| d.cluster_name.clone()).collect(),
                max_unavailable: Some("100%".to_string()),
            })
            .collect();

        let plan = plan_rollout(&deployments, &partitions, 10, 0);
        assert_eq!(plan.advance.len(), MAX_NEW);
    }
}
