use actix_web::http::header::HeaderMap;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::webhooks::intake::ParsedEvent;
use crate::webhooks::signature;

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    checkout_sha: Option<String>,
    project: ProjectField,
}

#[derive(Deserialize)]
struct ProjectField {
    git_http_url: String,
}

/// GitLab uses a plain shared-secret token in `X-Gitlab-Token` rather than
/// an HMAC digest over the body.
pub fn parse(headers: &HeaderMap, body: &[u8], secret: Option<&str>) -> AppResult<Option<ParsedEvent>> {
    if let Some(secret) = secret {
        let token = headers
            .get("X-Gitlab-Token")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::WebhookSignature)?;
        signature::verify_shared_secret(secret, token)?;
    }

    let Some(event_type) = headers.get("X-Gitlab-Event").and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };

    if event_type != "Push Hook" {
        return Ok(None);
    }

    let payload: PushPayload = serde_json::from_slice(body)?;
    let branch = payload.git_ref.strip_prefix("refs/heads/").map(str::to_string);

    Ok(Some(ParsedEvent {
        provider: "gitlab",
        repo_url: payload.project.git_http_url,
        git_ref: branch,
        commit: payload.checkout_sha,
    }))
}
