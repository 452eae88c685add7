use actix_web::http::header::HeaderMap;
use serde::Deserialize;

use crate::error::AppResult;
use crate::webhooks::intake::ParsedEvent;

#[derive(Deserialize)]
struct PushPayload {
    push: PushField,
    repository: RepoField,
}

#[derive(Deserialize)]
struct PushField {
    changes: Vec<Change>,
}

#[derive(Deserialize)]
struct Change {
    new: Option<BranchRef>,
}

#[derive(Deserialize)]
struct BranchRef {
    name: String,
    target: CommitTarget,
}

#[derive(Deserialize)]
struct CommitTarget {
    hash: String,
}

#[derive(Deserialize)]
struct RepoField {
    links: Links,
}

#[derive(Deserialize)]
struct Links {
    html: HrefField,
}

#[derive(Deserialize)]
struct HrefField {
    href: String,
}

/// Bitbucket Cloud authenticates webhook delivery with a secret embedded in
/// the callback URL rather than a request header, so there is no signature
/// to verify here - the caller is responsible for treating the URL path
/// itself as the shared secret.
pub fn parse(_headers: &HeaderMap, body: &[u8], _secret: Option<&str>) -> AppResult<Option<ParsedEvent>> {
    let payload: PushPayload = serde_json::from_slice(body)?;
    let Some(change) = payload.push.changes.into_iter().find_map(|c| c.new) else {
        return Ok(None);
    };

    Ok(Some(ParsedEvent {
        provider: "bitbucket_cloud",
        repo_url: payload.repository.links.html.href,
        git_ref: Some(change.name),
        commit: Some(change.target.hash),
    }))
}
