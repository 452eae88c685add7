use actix_web::http::header::HeaderMap;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::webhooks::intake::ParsedEvent;
use crate::webhooks::repo_match;
use crate::webhooks::signature;

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "eventType")]
    event_type: String,
    resource: ResourceField,
}

#[derive(Deserialize)]
struct ResourceField {
    #[serde(rename = "refUpdates")]
    ref_updates: Vec<RefUpdate>,
    repository: RepoField,
}

#[derive(Deserialize)]
struct RefUpdate {
    name: String,
    #[serde(rename = "newObjectId")]
    new_object_id: String,
}

#[derive(Deserialize)]
struct RepoField {
    #[serde(rename = "remoteUrl")]
    remote_url: String,
}

/// Azure DevOps authenticates with HTTP Basic auth on the webhook
/// subscription rather than a body signature; the "secret" here is the
/// basic-auth password configured on the subscription.
pub fn parse(headers: &HeaderMap, body: &[u8], secret: Option<&str>) -> AppResult<Option<ParsedEvent>> {
    if let Some(secret) = secret {
        let auth = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::WebhookSignature)?;
        let provided = auth.strip_prefix("Basic ").unwrap_or(auth);
        signature::verify_shared_secret(secret, provided)?;
    }

    let payload: PushPayload = serde_json::from_slice(body)?;
    if payload.event_type != "git.push" {
        return Ok(None);
    }

    let Some(update) = payload.resource.ref_updates.into_iter().next() else {
        return Ok(None);
    };

    let repo_url = repo_match::canonicalize_azure_devops(&payload.resource.repository.remote_url);
    let branch = update.name.strip_prefix("refs/heads/").map(str::to_string);

    Ok(Some(ParsedEvent {
        provider: "azure_devops",
        repo_url,
        git_ref: branch,
        commit: Some(update.new_object_id),
    }))
}
