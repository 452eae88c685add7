//! HelmOp reconciler: resolves the chart version (mirroring the GitRepo
//! poll, C1) then synthesizes the single implicit Bundle a HelmOp always
//! produces - no fleet.yaml, no multiple paths, just one chart reference
//! turned into deployable options (spec §4.1 Non-goal note: HelmOp skips
//! the Bundle Reader's filesystem walk entirely).
//!
//! Gated behind `Config::enable_helm_ops` (`EXPERIMENTAL_HELM_OPS`), mirroring
//! Fleet's own experimental-feature flag for this kind.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::{controller::Action, watcher, Controller};
use kube::ResourceExt;

use crate::error::AppError;
use crate::labels;
use crate::types::bundle::{BundleDeploymentOptions, BundleSpecFields, BundleTarget, HelmOptions};
use crate::types::{Bundle, HelmOp};

use super::Context;

pub async fn run(ctx: Arc<Context>) {
    if !ctx.config.enable_helm_ops {
        log::info!("HelmOp reconciliation disabled (EXPERIMENTAL_HELM_OPS is not set)");
        return;
    }

    let api: Api<HelmOp> = Api::all(ctx.client.clone());
    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                log::warn!("HelmOp reconcile error: {e}");
            }
        })
        .await;
}

async fn reconcile(op: Arc<HelmOp>, ctx: Arc<Context>) -> Result<Action, AppError> {
    if super::skip_unless_leader(&ctx) {
        return Ok(Action::requeue(super::DEFAULT_REQUEUE));
    }

    let ns = op.namespace().unwrap_or_default();
    let name = op.name_any();
    log::debug!("reconciling HelmOp {ns}/{name}");

    let decision = crate::poller::helm_op::poll_once(&ctx.http, &ctx.client, &op).await?;
    let version = match decision {
        crate::poller::helm_op::PollDecision::Update { version } => version,
        crate::poller::helm_op::PollDecision::Unchanged => {
            op.status.as_ref().and_then(|s| s.version.clone()).unwrap_or_default()
        }
    };

    let fields = BundleSpecFields {
        resources: Vec::new(),
        targets: vec![BundleTarget {
            match_: op.spec.fields.target.clone(),
            do_not_deploy: false,
            options: None,
        }],
        target_restrictions: Vec::new(),
        rollout_strategy: Default::default(),
        options: BundleDeploymentOptions {
            helm: Some(HelmOptions {
                repo: Some(op.spec.fields.repo.clone()),
                chart: Some(op.spec.fields.chart.clone()),
                version: Some(version),
                ..op.spec.fields.helm.clone()
            }),
            ..Default::default()
        },
        resource_keys: Vec::new(),
    };

    let mut bundle_obj = Bundle::new(&name, crate::types::bundle::BundleSpec { fields });
    bundle_obj
        .labels_mut()
        .insert(labels::REPO_NAME.to_string(), name.clone());
    bundle_obj
        .labels_mut()
        .insert(labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string());

    let api: Api<Bundle> = Api::namespaced(ctx.client.clone(), &ns);
    let pp = PatchParams::apply("gitjobctl").force();
    api.patch(&name, &pp, &Patch::Apply(&bundle_obj))
        .await
        .map_err(AppError::Kubernetes)?;

    Ok(Action::requeue(Duration::from_secs(60)))
}

fn error_policy(_op: Arc<HelmOp>, error: &AppError, _ctx: Arc<Context>) -> Action {
    log::error!("HelmOp reconcile failed: {error}");
    Action::requeue(super::DEFAULT_REQUEUE)
}
