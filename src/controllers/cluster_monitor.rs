//! Cluster Monitor: periodically sweeps every Cluster and forces
//! BundleDeployments targeting an offline one into `Ready=False`/
//! `Monitored=False` (spec §7, §8 scenario 6) rather than waiting for an
//! agent that may never check back in. Not a `kube::runtime::Controller`
//! reconciler since there's no single watched kind driving it - a plain
//! polling loop the way the teacher's `watchdog.rs` periodically sweeps
//! build state instead of reacting to an event stream.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::ResourceExt;

use crate::error::AppError;
use crate::labels;
use crate::types::bundle_deployment::{set_condition, CONDITION_MONITORED, CONDITION_READY};
use crate::types::cluster::Cluster;
use crate::types::BundleDeployment;

use super::Context;

/// A cluster agent silent for longer than this is considered offline
/// (spec §8 scenario 6's "missed checkin" window).
const OFFLINE_THRESHOLD: chrono::Duration = chrono::Duration::minutes(5);

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(ctx: Arc<Context>) {
    loop {
        tokio::time::sleep(SWEEP_INTERVAL).await;
        if super::skip_unless_leader(&ctx) {
            continue;
        }
        if let Err(e) = sweep(&ctx).await {
            log::warn!("cluster monitor sweep failed: {e}");
        }
    }
}

async fn sweep(ctx: &Context) -> Result<(), AppError> {
    let clusters: Api<Cluster> = Api::all(ctx.client.clone());
    let list = clusters.list(&ListParams::default()).await.map_err(AppError::Kubernetes)?;

    for cluster in &list.items {
        if !cluster.is_offline(OFFLINE_THRESHOLD) {
            continue;
        }
        let Some(ns) = cluster.namespace() else { continue };
        let Some(name) = cluster.metadata.name.clone() else { continue };

        mark_bundle_deployments_offline(ctx, &ns, &name).await?;
    }

    Ok(())
}

async fn mark_bundle_deployments_offline(ctx: &Context, ns: &str, cluster_name: &str) -> Result<(), AppError> {
    let api: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), ns);
    let lp = ListParams::default().labels(&format!("{}={}", labels::CLUSTER, cluster_name));
    let list = api.list(&lp).await.map_err(AppError::Kubernetes)?;

    for bd in &list.items {
        let mut status = bd.status.clone().unwrap_or_default();
        if !status.ready && has_offline_condition(&status) {
            continue;
        }
        status.ready = false;
        set_condition(&mut status.conditions, CONDITION_READY, false, "ClusterOffline", "cluster agent has not checked in recently");
        set_condition(&mut status.conditions, CONDITION_MONITORED, false, "ClusterOffline", "cluster agent has not checked in recently");

        let name = bd.name_any();
        let patch = serde_json::json!({ "status": status });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(AppError::Kubernetes)?;
    }

    Ok(())
}

fn has_offline_condition(status: &crate::types::bundle_deployment::BundleDeploymentStatus) -> bool {
    status
        .conditions
        .iter()
        .any(|c| c.type_ == CONDITION_READY && c.reason == "ClusterOffline")
}
