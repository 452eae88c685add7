//! Bundle reconciler (C4 Target Matcher + C5 Customizer + C6 Rollout
//! Controller entrypoint): for every Cluster in the Bundle's namespace,
//! resolves the winning target, customizes its options, computes the
//! content-addressed `deploymentID`, then paces how many of the resulting
//! BundleDeployments are allowed to advance to that ID this round
//! (spec §4.4, §4.5, §4.6).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::{controller::Action, watcher, Controller};
use kube::ResourceExt;

use crate::content_hash;
use crate::error::AppError;
use crate::labels;
use crate::rollout::{self, DeploymentState, Partition};
use crate::targeting::{customize, matcher};
use crate::types::bundle_deployment::BundleDeploymentSpecFields;
use crate::types::cluster::Cluster;
use crate::types::{Bundle, BundleDeployment};

use super::Context;

pub async fn run(ctx: Arc<Context>) {
    let api: Api<Bundle> = Api::all(ctx.client.clone());
    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                log::warn!("Bundle reconcile error: {e}");
            }
        })
        .await;
}

async fn reconcile(bundle: Arc<Bundle>, ctx: Arc<Context>) -> Result<Action, AppError> {
    if super::skip_unless_leader(&ctx) {
        return Ok(Action::requeue(super::DEFAULT_REQUEUE));
    }

    let ns = bundle.namespace().unwrap_or_default();
    let name = bundle.name_any();
    log::debug!("reconciling Bundle {ns}/{name}");

    let clusters = list_cluster_views(&ctx, &ns).await?;
    let mut per_cluster_id = BTreeMap::new();

    for cluster in &clusters {
        let Some(target) = matcher::resolve_target_for_cluster(&bundle.spec.fields, cluster) else {
            continue;
        };

        let cluster_ctx = customize::ClusterContext {
            namespace: ns.clone(),
            name: cluster.name.clone(),
            labels: cluster.labels.clone(),
            annotations: BTreeMap::new(),
            values: serde_json::Value::Null,
        };
        let options = customize::customize(&bundle.spec.fields.options, target.options.as_ref(), &cluster_ctx);
        let deployment_id = content_hash::compute(&bundle.spec.fields.resources, &options);
        per_cluster_id.insert(cluster.name.clone(), (deployment_id, options));
    }

    let existing = list_bundle_deployments(&ctx, &ns, &name).await?;
    let deployment_states: Vec<DeploymentState> = existing
        .iter()
        .filter_map(|bd| {
            let cluster_name = bd.labels().get(labels::CLUSTER)?.clone();
            Some(DeploymentState {
                cluster_name,
                applied_deployment_id: bd.status.as_ref().and_then(|s| s.applied_deployment_id.clone()),
                desired_deployment_id: bd.spec.fields.deployment_id.clone(),
                ready: bd.is_ready(),
            })
        })
        .collect();

    let partitions: Vec<Partition> = rollout::partition_clusters(&bundle.spec.fields.rollout_strategy, &clusters);
    let plan = rollout::plan_rollout(
        &deployment_states,
        &partitions,
        ctx.config.rollout_max_unavailable_percent,
        resolve_max_unavailable_partitions(&bundle.spec.fields.rollout_strategy),
    );
    let allowed: std::collections::HashSet<&str> = plan.advance.iter().map(String::as_str).collect();

    for (cluster_name, (deployment_id, options)) in &per_cluster_id {
        let already_applied = existing
            .iter()
            .find(|bd| bd.labels().get(labels::CLUSTER).map(String::as_str) == Some(cluster_name.as_str()))
            .map(|bd| bd.spec.fields.deployment_id == *deployment_id)
            .unwrap_or(false);

        if already_applied || allowed.contains(cluster_name.as_str()) || !rollout_in_progress(&existing, cluster_name) {
            apply_bundle_deployment(
                &ctx,
                &ns,
                &name,
                cluster_name,
                deployment_id,
                options,
                &bundle.spec.fields.resources,
            )
            .await?;
        }
    }

    if plan.stalled {
        log::debug!("Bundle {ns}/{name} rollout stalled on maxUnavailable budget, will retry");
        return Ok(Action::requeue(Duration::from_secs(15)));
    }

    Ok(Action::requeue(Duration::from_secs(60)))
}

/// True only if this cluster already has a BundleDeployment pinned to an ID
/// different from the one we're about to compute - i.e. advancing it is
/// actually gated by the rollout plan rather than a first-time deploy.
fn rollout_in_progress(existing: &[BundleDeployment], cluster_name: &str) -> bool {
    existing
        .iter()
        .any(|bd| bd.labels().get(labels::CLUSTER).map(String::as_str) == Some(cluster_name))
}

fn resolve_max_unavailable_partitions(strategy: &crate::types::bundle::RolloutStrategy) -> usize {
    strategy
        .max_unavailable_partitions
        .as_deref()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

async fn list_cluster_views(ctx: &Context, ns: &str) -> Result<Vec<matcher::ClusterView>, AppError> {
    let api: Api<Cluster> = Api::namespaced(ctx.client.clone(), ns);
    let list = api.list(&ListParams::default()).await.map_err(AppError::Kubernetes)?;
    Ok(list
        .items
        .iter()
        .map(|c| matcher::ClusterView::from_cluster(c, Vec::new()))
        .collect())
}

async fn list_bundle_deployments(ctx: &Context, ns: &str, bundle_name: &str) -> Result<Vec<BundleDeployment>, AppError> {
    let api: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), ns);
    let lp = ListParams::default().labels(&format!("{}={}", labels::BUNDLE_NAME, bundle_name));
    let list = api.list(&lp).await.map_err(AppError::Kubernetes)?;
    Ok(list.items)
}

async fn apply_bundle_deployment(
    ctx: &Context,
    ns: &str,
    bundle_name: &str,
    cluster_name: &str,
    deployment_id: &str,
    options: &crate::types::bundle::BundleDeploymentOptions,
    resources: &[crate::types::bundle::BundleResource],
) -> Result<(), AppError> {
    let bd_name = format!("{bundle_name}-{cluster_name}");
    let fields = BundleDeploymentSpecFields {
        resources: resources.to_vec(),
        options: options.clone(),
        staged_options: None,
        deployment_id: deployment_id.to_string(),
        staged_deployment_id: None,
        depends_on: Vec::new(),
        correct_drift: options.correct_drift.clone(),
    };

    let mut bd = BundleDeployment::new(&bd_name, crate::types::bundle_deployment::BundleDeploymentSpec { fields });
    bd.labels_mut().insert(labels::BUNDLE_NAME.to_string(), bundle_name.to_string());
    bd.labels_mut().insert(labels::BUNDLE_NAMESPACE.to_string(), ns.to_string());
    bd.labels_mut().insert(labels::CLUSTER.to_string(), cluster_name.to_string());
    bd.labels_mut().insert(labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string());

    let api: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), ns);
    let pp = PatchParams::apply("gitjobctl").force();
    api.patch(&bd_name, &pp, &Patch::Apply(&bd))
        .await
        .map_err(AppError::Kubernetes)?;
    Ok(())
}

fn error_policy(_bundle: Arc<Bundle>, error: &AppError, _ctx: Arc<Context>) -> Action {
    log::error!("Bundle reconcile failed: {error}");
    Action::requeue(super::DEFAULT_REQUEUE)
}
