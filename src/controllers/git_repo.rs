//! GitRepo reconciler: on every watch event, resolves the current commit
//! (reusing the same poll path C9's scheduler calls on a timer) and, once a
//! commit is known, ensures one Bundle per `spec.paths` entry exists with
//! that commit baked into its content (spec §4.1, §4.2 handoff to the
//! Bundle Reader).

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::{controller::Action, watcher, Controller};
use kube::ResourceExt;

use crate::bundle;
use crate::error::AppError;
use crate::git::auth::GitCredentials;
use crate::labels;
use crate::types::bundle::BundleSpecFields;
use crate::types::{Bundle, GitRepo};

use super::Context;

pub async fn run(ctx: Arc<Context>) {
    let api: Api<GitRepo> = Api::all(ctx.client.clone());
    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                log::warn!("GitRepo reconcile error: {e}");
            }
        })
        .await;
}

async fn reconcile(repo: Arc<GitRepo>, ctx: Arc<Context>) -> Result<Action, AppError> {
    if super::skip_unless_leader(&ctx) {
        return Ok(Action::requeue(super::DEFAULT_REQUEUE));
    }

    let ns = repo.namespace().unwrap_or_default();
    let name = repo.name_any();
    log::debug!("reconciling GitRepo {ns}/{name}");

    let creds = resolve_credentials(&ctx, &repo).await.unwrap_or_default();
    let decision = crate::poller::poll_once(&ctx.client, ctx.git_client.as_ref(), &repo, &creds).await?;

    let commit = match decision {
        crate::poller::PollDecision::Update { commit } => commit,
        crate::poller::PollDecision::Unchanged => match repo.status.as_ref().and_then(|s| s.commit.clone()) {
            Some(commit) => commit,
            None => return Ok(Action::requeue(super::DEFAULT_REQUEUE)),
        },
    };

    build_and_apply_bundles(&ctx, &repo, &commit).await?;

    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn resolve_credentials(ctx: &Context, repo: &GitRepo) -> Option<GitCredentials> {
    let secret_name = repo.spec.fields.client_secret_name.as_ref()?;
    let ns = repo.namespace()?;
    let api: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(ctx.client.clone(), &ns);
    let secret = api.get(secret_name).await.ok()?;
    let data = secret.data.as_ref()?;
    let get = |k: &str| data.get(k).map(|b| String::from_utf8_lossy(&b.0).to_string());
    Some(GitCredentials {
        username: get("username"),
        password: get("password").or_else(|| get("token")),
        ssh_private_key: get("ssh-privatekey"),
        ssh_known_hosts: get("known_hosts"),
        ca_bundle: get("cacerts"),
        insecure_skip_tls_verify: false,
    })
}

/// Builds one Bundle per `spec.paths` entry (defaulting to a single root
/// path) against the checked-out commit, applying each via Server-Side
/// Apply labeled back to this GitRepo (spec §4.2, §4.3).
async fn build_and_apply_bundles(ctx: &Context, repo: &GitRepo, commit: &str) -> Result<(), AppError> {
    let ns = repo.namespace().unwrap_or_default();
    let repo_name = repo.name_any();

    let scratch = checkout_scratch_dir(ctx, repo, commit).await?;

    let paths: Vec<String> = if repo.spec.fields.paths.is_empty() {
        vec![".".to_string()]
    } else {
        repo.spec.fields.paths.clone()
    };

    for path in &paths {
        let dir = scratch.join(path);
        let outcome = bundle::build(&dir, &bundle::BuildOptions::default()).await?;
        let Some(outcome) = outcome else { continue };

        let bundle_name = derive_bundle_name(&repo_name, path);
        apply_bundle(ctx, &ns, &bundle_name, &repo_name, outcome.spec_fields, repo).await?;
    }

    Ok(())
}

fn derive_bundle_name(repo_name: &str, path: &str) -> String {
    if path == "." || path.is_empty() {
        repo_name.to_string()
    } else {
        let slug: String = path
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("{repo_name}-{slug}")
    }
}

/// Checks out `commit` into a scratch directory via a shallow `git fetch` +
/// `checkout`; this goes through the system `git` binary since `gix` is only
/// wired for the lightweight `ls-remote` path today (spec §4.2 step: the
/// heavier checkout happens once a commit is already known).
async fn checkout_scratch_dir(_ctx: &Context, repo: &GitRepo, commit: &str) -> Result<std::path::PathBuf, AppError> {
    let dir = std::env::temp_dir().join(format!(
        "gitjobctl-checkout-{}-{}",
        repo.name_any(),
        &commit[..commit.len().min(12)]
    ));
    if dir.is_dir() {
        return Ok(dir);
    }
    std::fs::create_dir_all(&dir).map_err(AppError::Io)?;

    let status = tokio::process::Command::new("git")
        .args(["clone", "--depth", "1", &repo.spec.fields.repo, "."])
        .current_dir(&dir)
        .status()
        .await
        .map_err(AppError::Io)?;
    if !status.success() {
        return Err(AppError::Git(format!("git clone of {} failed", repo.spec.fields.repo)));
    }

    let status = tokio::process::Command::new("git")
        .args(["fetch", "--depth", "1", "origin", commit])
        .current_dir(&dir)
        .status()
        .await
        .map_err(AppError::Io)?;
    if status.success() {
        let _ = tokio::process::Command::new("git")
            .args(["checkout", commit])
            .current_dir(&dir)
            .status()
            .await;
    }

    Ok(dir)
}

async fn apply_bundle(
    ctx: &Context,
    ns: &str,
    bundle_name: &str,
    repo_name: &str,
    mut fields: BundleSpecFields,
    repo: &GitRepo,
) -> Result<(), AppError> {
    if fields.targets.is_empty() {
        fields.targets = repo.spec.fields.targets.clone();
    }

    let mut bundle_obj = Bundle::new(
        bundle_name,
        crate::types::bundle::BundleSpec { fields: fields.clone() },
    );
    bundle_obj
        .labels_mut()
        .insert(labels::REPO_NAME.to_string(), repo_name.to_string());
    bundle_obj
        .labels_mut()
        .insert(labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string());

    let api: Api<Bundle> = Api::namespaced(ctx.client.clone(), ns);
    let pp = PatchParams::apply("gitjobctl").force();
    api.patch(bundle_name, &pp, &Patch::Apply(&bundle_obj))
        .await
        .map_err(AppError::Kubernetes)?;
    Ok(())
}

fn error_policy(_repo: Arc<GitRepo>, error: &AppError, _ctx: Arc<Context>) -> Action {
    log::error!("GitRepo reconcile failed: {error}");
    Action::requeue(super::DEFAULT_REQUEUE)
}
