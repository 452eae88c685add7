//! BundleDeployment reconciler (C7 Deployer + C8 Drift Monitor): renders and
//! installs the Helm release for `spec.deploymentID` if it isn't already
//! applied, then compares live state against desired state and writes the
//! Ready/Modified/Missing/Orphaned summary back to status (spec §4.7, §4.8).

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::{controller::Action, watcher, Controller};
use kube::ResourceExt;

use crate::deploy::drift;
use crate::deploy::helm::{HelmRenderer, InstallRequest};
use crate::error::AppError;
use crate::labels;
use crate::types::bundle::BundleResource;
use crate::types::bundle_deployment::{
    set_condition, BundleDeployment, CONDITION_INSTALLED, CONDITION_MONITORED, CONDITION_READY,
};

use super::Context;

pub async fn run(ctx: Arc<Context>) {
    let api: Api<BundleDeployment> = Api::all(ctx.client.clone());
    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                log::warn!("BundleDeployment reconcile error: {e}");
            }
        })
        .await;
}

async fn reconcile(bd: Arc<BundleDeployment>, ctx: Arc<Context>) -> Result<Action, AppError> {
    if super::skip_unless_leader(&ctx) {
        return Ok(Action::requeue(super::DEFAULT_REQUEUE));
    }

    let ns = bd.namespace().unwrap_or_default();
    let name = bd.name_any();
    log::debug!("reconciling BundleDeployment {ns}/{name}");

    let bd = (*bd).clone();
    let needs_install = bd.status.as_ref().and_then(|s| s.applied_deployment_id.as_deref())
        != Some(bd.spec.fields.deployment_id.as_str());

    let cluster_name = bd.labels().get(labels::CLUSTER).cloned().unwrap_or_default();
    let release_name = format!("{name}-{cluster_name}");

    let mut status = bd.status.clone().unwrap_or_default();

    if needs_install {
        match install(&ctx, &bd, &release_name, &ns).await {
            Ok(resources) => {
                status.applied_deployment_id = Some(bd.spec.fields.deployment_id.clone());
                status.release = Some(release_name.clone());
                set_condition(&mut status.conditions, CONDITION_INSTALLED, true, "Installed", "helm release installed");
                let _ = resources;
            }
            Err(e) => {
                set_condition(&mut status.conditions, CONDITION_INSTALLED, false, "InstallFailed", &e.to_string());
                write_status(&ctx, &ns, &name, &status).await?;
                return Ok(Action::requeue(super::DEFAULT_REQUEUE));
            }
        }
    }

    let render = match render_current(&ctx, &bd, &release_name, &ns).await {
        Ok(r) => r,
        Err(e) => {
            log::warn!("BundleDeployment {ns}/{name} drift render failed: {e}");
            write_status(&ctx, &ns, &name, &status).await?;
            return Ok(Action::requeue(super::DEFAULT_REQUEUE));
        }
    };

    let managed_live = crate::store::list_managed_objects(&ctx.client, &ns).await.unwrap_or_default();
    let live_lookup = |id: &drift::ResourceIdentity| -> Option<kube::api::DynamicObject> {
        managed_live
            .iter()
            .find(|o| {
                let kind = o.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
                let av = o.types.as_ref().map(|t| t.api_version.as_str()).unwrap_or_default();
                kind == id.kind && av == id.api_version && o.metadata.name.as_deref() == Some(id.name.as_str())
            })
            .cloned()
    };

    let desired: Vec<kube::api::DynamicObject> = render.iter().map(|r| r.object.clone()).collect();
    let classification = drift::classify_all(&desired, live_lookup, &managed_live, &bd.spec.fields.options.compare_patches);

    let (modified, truncated) = BundleDeployment::cap_modified(drift::to_modified_resources(classification));
    let ready = modified.is_empty() && status.applied_deployment_id.is_some();

    status.modified_status = modified;
    status.non_modified = status.modified_status.is_empty();
    status.ready = ready;
    status.incomplete_state = truncated;

    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        ready,
        if ready { "Ready" } else { "Drifted" },
        if ready { "all resources match desired state" } else { "one or more resources have drifted" },
    );
    set_condition(&mut status.conditions, CONDITION_MONITORED, true, "Monitored", "drift check completed");

    if !ready && bd.spec.fields.correct_drift.enabled {
        if let Err(e) = ctx.helm.rollback(&release_name, &ns).await {
            log::warn!("drift correction rollback failed for {ns}/{release_name}: {e}");
        }
    }

    write_status(&ctx, &ns, &name, &status).await?;

    Ok(Action::requeue(Duration::from_secs(30)))
}

async fn install(
    ctx: &Context,
    bd: &BundleDeployment,
    release_name: &str,
    ns: &str,
) -> Result<Vec<crate::deploy::helm::RenderedResource>, AppError> {
    let helm_opts = bd.spec.fields.options.helm.clone().unwrap_or_default();
    let (chart_dir, _scratch) = resolve_chart_dir(bd, &helm_opts)?;
    let req = InstallRequest {
        chart_dir: &chart_dir,
        release_name,
        namespace: ns,
        values: &helm_opts.values,
        options: &helm_opts,
    };
    let outcome = ctx.helm.install(&req).await?;
    Ok(outcome.resources)
}

async fn render_current(
    ctx: &Context,
    bd: &BundleDeployment,
    release_name: &str,
    ns: &str,
) -> Result<Vec<crate::deploy::helm::RenderedResource>, AppError> {
    let helm_opts = bd.spec.fields.options.helm.clone().unwrap_or_default();
    let (chart_dir, _scratch) = resolve_chart_dir(bd, &helm_opts)?;
    let req = crate::deploy::helm::RenderRequest {
        chart_dir: &chart_dir,
        release_name,
        namespace: ns,
        values: &helm_opts.values,
    };
    ctx.helm.template(&req).await
}

/// Deletes a materialized on-the-fly chart's scratch directory once the
/// caller is done with it (install/template have both already run by then).
struct ScratchDir(std::path::PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Locates the chart to render for this BundleDeployment (spec §4.7 step 1).
///
/// A `helm.chart` reference means the Bundle pointed at an OCI/HTTP chart
/// that the Bundle Reader already materialized on disk under a
/// content-addressed scratch path (spec §4.3 step 7); this just locates it.
/// Otherwise the Bundle stored inline resources, which must be rendered
/// "through an on-the-fly chart" built from those files.
fn resolve_chart_dir(
    bd: &BundleDeployment,
    helm_opts: &crate::types::bundle::HelmOptions,
) -> Result<(std::path::PathBuf, Option<ScratchDir>), AppError> {
    if let Some(chart) = helm_opts.chart.as_deref() {
        return Ok((std::path::PathBuf::from(chart), None));
    }

    let (dir, guard) = materialize_onthefly_chart(&bd.spec.fields.resources)?;
    Ok((dir, Some(guard)))
}

/// Builds a minimal Helm chart on disk from a Bundle's raw resource files so
/// they can be rendered/installed the same way a real chart is (spec §4.7
/// step 1). If the resources already include their own `Chart.yaml` (the
/// source directory was itself a chart), they're laid out at the chart root
/// as-is; otherwise every file is wrapped under `templates/` beneath a
/// synthesized `Chart.yaml`.
fn materialize_onthefly_chart(resources: &[BundleResource]) -> Result<(std::path::PathBuf, ScratchDir), AppError> {
    if resources.is_empty() {
        return Err(AppError::Validation(
            "BundleDeployment has neither a helm chart reference nor any inline resources to render".to_string(),
        ));
    }

    let root = std::env::temp_dir().join(format!("gitjobctl-chart-{}", scratch_suffix()));
    let has_own_chart_yaml = resources.iter().any(|r| r.name == "Chart.yaml");
    let content_root = if has_own_chart_yaml { root.clone() } else { root.join("templates") };
    std::fs::create_dir_all(&content_root).map_err(AppError::Io)?;

    for resource in resources {
        let bytes = crate::bundle::compress::decode(&resource.content, &resource.encoding)?;
        let dest = content_root.join(&resource.name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(AppError::Io)?;
        }
        std::fs::write(&dest, bytes).map_err(AppError::Io)?;
    }

    if !has_own_chart_yaml {
        std::fs::write(root.join("Chart.yaml"), "apiVersion: v2\nname: onthefly\nversion: 0.1.0\n")
            .map_err(AppError::Io)?;
    }

    Ok((root.clone(), ScratchDir(root)))
}

/// A cheap process-unique suffix for a scratch directory name; not a
/// cryptographic identifier, just a disambiguator (mirrors `git::client`'s
/// own scratch-dir naming for the same reason).
fn scratch_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
    format!("{nanos:x}-{:?}", std::thread::current().id())
}

async fn write_status(
    ctx: &Context,
    ns: &str,
    name: &str,
    status: &crate::types::bundle_deployment::BundleDeploymentStatus,
) -> Result<(), AppError> {
    let api: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), ns);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(AppError::Kubernetes)?;
    Ok(())
}

fn error_policy(_bd: Arc<BundleDeployment>, error: &AppError, _ctx: Arc<Context>) -> Action {
    log::error!("BundleDeployment reconcile failed: {error}");
    Action::requeue(super::DEFAULT_REQUEUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str, content: &str) -> BundleResource {
        BundleResource {
            name: name.to_string(),
            content: content.to_string(),
            encoding: String::new(),
        }
    }

    #[test]
    fn wraps_plain_manifests_under_templates() {
        let resources = vec![resource("configmap.yaml", "apiVersion: v1\nkind: ConfigMap\n")];
        let (dir, _scratch) = materialize_onthefly_chart(&resources).unwrap();

        assert!(dir.join("Chart.yaml").is_file());
        let rendered = std::fs::read_to_string(dir.join("templates/configmap.yaml")).unwrap();
        assert_eq!(rendered, "apiVersion: v1\nkind: ConfigMap\n");
    }

    #[test]
    fn preserves_an_existing_chart_layout() {
        let resources = vec![
            resource("Chart.yaml", "apiVersion: v2\nname: mychart\nversion: 1.0.0\n"),
            resource("templates/deployment.yaml", "kind: Deployment\n"),
        ];
        let (dir, _scratch) = materialize_onthefly_chart(&resources).unwrap();

        let chart_yaml = std::fs::read_to_string(dir.join("Chart.yaml")).unwrap();
        assert_eq!(chart_yaml, "apiVersion: v2\nname: mychart\nversion: 1.0.0\n");
        assert!(dir.join("templates/deployment.yaml").is_file());
    }

    #[test]
    fn errors_with_no_chart_reference_and_no_resources() {
        let err = materialize_onthefly_chart(&[]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
