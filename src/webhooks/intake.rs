//! The actix-web surface for C2: `POST /webhook` accepts a provider push
//! event, matches it against known `GitRepo`s by canonicalized URL, verifies
//! the provider's signature using that GitRepo's referenced secret, and (on
//! success) notifies the scheduler to resync immediately instead of waiting
//! for the next poll tick.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;

use crate::error::{AppError, AppResult};
use crate::types::GitRepo;
use crate::webhooks::{providers, repo_match};

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedEvent {
    pub provider: &'static str,
    pub repo_url: String,
    pub git_ref: Option<String>,
    pub commit: Option<String>,
}

/// Abstracts "wake the poller for this GitRepo right now" so the HTTP layer
/// doesn't need to know how the scheduler is implemented (spec §4.9's
/// relaxed-interval short-circuit).
#[async_trait]
pub trait ResyncNotifier: Send + Sync {
    async fn notify(&self, namespace: &str, name: &str, commit: Option<&str>) -> AppResult<()>;
}

pub struct SchedulerNotifier {
    pub sender: tokio::sync::mpsc::Sender<(String, String, Option<String>)>,
}

#[async_trait]
impl ResyncNotifier for SchedulerNotifier {
    async fn notify(&self, namespace: &str, name: &str, commit: Option<&str>) -> AppResult<()> {
        self.sender
            .send((namespace.to_string(), name.to_string(), commit.map(str::to_string)))
            .await
            .map_err(|e| AppError::Internal(format!("scheduler channel closed: {e}")))
    }
}

pub struct WebhookState {
    pub client: Client,
    pub notifier: Arc<dyn ResyncNotifier>,
    /// Interval an unset `pollingIntervalSeconds` is relaxed to once a webhook
    /// proves push delivery works for this GitRepo (spec §4.2 step 5).
    pub relaxed_polling_interval: std::time::Duration,
}

pub fn webhook_scope() -> actix_web::Scope {
    web::scope("/webhook").route("", web::post().to(handle_webhook))
}

async fn handle_webhook(req: HttpRequest, body: web::Bytes, state: web::Data<WebhookState>) -> impl Responder {
    match process(&req, &body, &state).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(AppError::WebhookSignature) => HttpResponse::Unauthorized().finish(),
        Err(AppError::NotFound(msg)) => HttpResponse::NotFound().body(msg),
        Err(e) => {
            log::warn!("webhook processing failed: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn process(req: &HttpRequest, body: &[u8], state: &WebhookState) -> AppResult<()> {
    crate::metrics::get().webhook_events_received.inc();

    let Some(kind) = providers::detect(req.headers()) else {
        return Err(AppError::Webhook("no matching provider for this request".to_string()));
    };

    // First pass: extract repo identity without verifying a signature, since
    // we don't know which GitRepo's secret applies until we've matched it.
    let Some(unverified) = providers::parse(kind, req.headers(), body, None)? else {
        return Ok(());
    };

    let candidates = matching_git_repos(&state.client, &unverified.repo_url).await?;
    if candidates.is_empty() {
        return Err(AppError::NotFound(format!(
            "no GitRepo matches {:?}",
            unverified.repo_url
        )));
    }

    let mut last_err = AppError::WebhookSignature;
    for repo in candidates {
        let secret = resolve_secret(&state.client, &repo).await?;
        match providers::parse(kind, req.headers(), body, secret.as_deref()) {
            Ok(Some(event)) => {
                let ns = repo.metadata.namespace.clone().unwrap_or_default();
                let name = repo.metadata.name.clone().unwrap_or_default();
                apply_webhook_commit(&state.client, &repo, &event, state.relaxed_polling_interval).await?;
                state.notifier.notify(&ns, &name, event.commit.as_deref()).await?;
                return Ok(());
            }
            Ok(None) => continue,
            Err(e) => {
                last_err = e;
            }
        }
    }

    crate::metrics::get().webhook_signature_failures.inc();
    Err(last_err)
}

/// Writes the pushed revision into `status.commit`/`status.observedAt` (spec
/// §4.2 step 4) and, if the GitRepo had no explicit polling interval, relaxes
/// it to `relaxed_polling_interval` (step 5) - once push delivery is proven to
/// work, aggressive polling is no longer needed as a safety net.
///
/// Skips GitRepos that pin an exact `revision` (a push can't override a pin),
/// that track a different branch than the event reports, or whose
/// `status.commit` already equals the pushed revision.
async fn apply_webhook_commit(
    client: &Client,
    repo: &GitRepo,
    event: &ParsedEvent,
    relaxed_polling_interval: std::time::Duration,
) -> AppResult<()> {
    let Some(revision) = event.commit.as_deref() else {
        return Ok(());
    };
    if repo.spec.fields.revision.is_some() {
        return Ok(());
    }
    if let (Some(wanted), Some(got)) = (repo.spec.fields.branch.as_deref(), event.git_ref.as_deref()) {
        if wanted != got {
            return Ok(());
        }
    }

    let status = repo.status.clone().unwrap_or_default();
    if status.commit.as_deref() == Some(revision) {
        return Ok(());
    }

    let ns = repo
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| AppError::Internal("GitRepo missing namespace".to_string()))?;
    let name = repo
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| AppError::Internal("GitRepo missing name".to_string()))?;

    let api: Api<GitRepo> = Api::namespaced(client.clone(), ns);
    let status_patch = serde_json::json!({
        "status": {
            "commit": revision,
            "observedAt": chrono::Utc::now().to_rfc3339(),
        }
    });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
        .await
        .map_err(AppError::Kubernetes)?;

    if repo.spec.fields.polling_interval_seconds.is_none() {
        let spec_patch = serde_json::json!({
            "spec": { "pollingIntervalSeconds": relaxed_polling_interval.as_secs() }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&spec_patch))
            .await
            .map_err(AppError::Kubernetes)?;
    }

    Ok(())
}

async fn matching_git_repos(client: &Client, repo_url: &str) -> AppResult<Vec<GitRepo>> {
    let api: Api<GitRepo> = Api::all(client.clone());
    let list = api.list(&ListParams::default()).await.map_err(AppError::Kubernetes)?;
    Ok(list
        .items
        .into_iter()
        .filter(|r| repo_match::matches(&r.spec.fields.repo, repo_url))
        .collect())
}

async fn resolve_secret(client: &Client, repo: &GitRepo) -> AppResult<Option<String>> {
    let Some(secret_name) = &repo.spec.fields.client_secret_name else {
        return Ok(None);
    };
    let ns = repo
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| AppError::Internal("GitRepo missing namespace".to_string()))?;

    let secrets: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(client.clone(), ns);
    let secret = secrets.get(secret_name).await.map_err(AppError::Kubernetes)?;

    let value = secret
        .data
        .as_ref()
        .and_then(|d| d.get("token").or_else(|| d.get("secret")))
        .map(|b| String::from_utf8_lossy(&b.0).to_string());

    Ok(value)
}
