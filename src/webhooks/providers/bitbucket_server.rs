use actix_web::http::header::HeaderMap;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::webhooks::intake::ParsedEvent;
use crate::webhooks::signature;

#[derive(Deserialize)]
struct PushPayload {
    changes: Vec<Change>,
    repository: RepoField,
}

#[derive(Deserialize)]
struct Change {
    #[serde(rename = "ref")]
    git_ref: RefField,
    #[serde(rename = "toHash")]
    to_hash: String,
}

#[derive(Deserialize)]
struct RefField {
    #[serde(rename = "displayId")]
    display_id: String,
}

#[derive(Deserialize)]
struct RepoField {
    links: LinksField,
}

#[derive(Deserialize)]
struct LinksField {
    clone: Vec<CloneLink>,
}

#[derive(Deserialize)]
struct CloneLink {
    href: String,
    name: String,
}

pub fn parse(headers: &HeaderMap, body: &[u8], secret: Option<&str>) -> AppResult<Option<ParsedEvent>> {
    if let Some(secret) = secret {
        let sig = headers
            .get("X-Hub-Signature")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::WebhookSignature)?;
        signature::verify_hmac_sha256_hex(secret, body, sig)?;
    }

    let Some(event_key) = headers.get("X-Event-Key").and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    if event_key != "repo:refs_changed" {
        return Ok(None);
    }

    let payload: PushPayload = serde_json::from_slice(body)?;
    let Some(change) = payload.changes.into_iter().next() else {
        return Ok(None);
    };

    let repo_url = payload
        .repository
        .links
        .clone
        .iter()
        .find(|l| l.name == "http" || l.name == "https")
        .or_else(|| payload.repository.links.clone.first())
        .map(|l| l.href.clone())
        .unwrap_or_default();

    Ok(Some(ParsedEvent {
        provider: "bitbucket_server",
        repo_url,
        git_ref: Some(change.git_ref.display_id),
        commit: Some(change.to_hash),
    }))
}
