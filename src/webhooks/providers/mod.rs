//! One parser per provider (spec §4.2): each inspects a provider-specific
//! header to confirm it's the right parser, then turns the payload into a
//! `ParsedEvent`. Dispatch order matters - Gogs also sends an
//! `X-Github-Event` header for backwards compatibility, so its own
//! `X-Gogs-Event` header must be checked first (Design Note, spec §9).

pub mod azure_devops;
pub mod bitbucket_cloud;
pub mod bitbucket_server;
pub mod github;
pub mod gitlab;
pub mod gogs;

use actix_web::http::header::HeaderMap;

use crate::error::AppResult;
use crate::webhooks::intake::ParsedEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Gogs,
    GitHub,
    GitLab,
    BitbucketCloud,
    BitbucketServer,
    AzureDevOps,
}

/// Identify which provider sent this request by header shape alone, without
/// looking at the body. Order is significant: Gogs must be checked before
/// GitHub.
pub fn detect(headers: &HeaderMap) -> Option<ProviderKind> {
    if headers.contains_key("X-Gogs-Event") {
        return Some(ProviderKind::Gogs);
    }
    if headers.contains_key("X-GitHub-Event") {
        return Some(ProviderKind::GitHub);
    }
    if headers.contains_key("X-Gitlab-Event") {
        return Some(ProviderKind::GitLab);
    }
    if headers.contains_key("X-Event-Key") {
        // Both Cloud and Server use this header; Server additionally signs
        // with HMAC via X-Hub-Signature, which Cloud does not send.
        return Some(if headers.contains_key("X-Hub-Signature") {
            ProviderKind::BitbucketServer
        } else {
            ProviderKind::BitbucketCloud
        });
    }
    if headers.contains_key("X-Vss-ActivityId") {
        return Some(ProviderKind::AzureDevOps);
    }
    None
}

pub fn parse(
    kind: ProviderKind,
    headers: &HeaderMap,
    body: &[u8],
    secret: Option<&str>,
) -> AppResult<Option<ParsedEvent>> {
    match kind {
        ProviderKind::Gogs => gogs::parse(headers, body, secret),
        ProviderKind::GitHub => github::parse(headers, body, secret),
        ProviderKind::GitLab => gitlab::parse(headers, body, secret),
        ProviderKind::BitbucketCloud => bitbucket_cloud::parse(headers, body, secret),
        ProviderKind::BitbucketServer => bitbucket_server::parse(headers, body, secret),
        ProviderKind::AzureDevOps => azure_devops::parse(headers, body, secret),
    }
}
