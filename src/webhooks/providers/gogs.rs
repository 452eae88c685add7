use actix_web::http::header::HeaderMap;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::webhooks::intake::ParsedEvent;
use crate::webhooks::signature;

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    repository: RepoField,
}

#[derive(Deserialize)]
struct RepoField {
    clone_url: String,
}

/// Gogs signs with HMAC-SHA256 like GitHub but uses its own header name;
/// `providers::detect` must prefer this parser over GitHub's since Gogs
/// payloads also carry `X-GitHub-Event` for client compatibility.
pub fn parse(headers: &HeaderMap, body: &[u8], secret: Option<&str>) -> AppResult<Option<ParsedEvent>> {
    if let Some(secret) = secret {
        let sig = headers
            .get("X-Gogs-Signature")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::WebhookSignature)?;
        signature::verify_hmac_sha256_hex(secret, body, sig)?;
    }

    let Some(event_type) = headers.get("X-Gogs-Event").and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };

    if event_type != "push" {
        return Ok(None);
    }

    let payload: PushPayload = serde_json::from_slice(body)?;
    let branch = payload.git_ref.strip_prefix("refs/heads/").map(str::to_string);

    Ok(Some(ParsedEvent {
        provider: "gogs",
        repo_url: payload.repository.clone_url,
        git_ref: branch,
        commit: Some(payload.after),
    }))
}
