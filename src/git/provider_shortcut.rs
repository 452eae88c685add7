//! Spec §4.1: well-known hosts expose a cheap HTTP endpoint for the current
//! HEAD commit of a branch, avoiding a full git handshake on every poll tick.

use crate::error::AppResult;

#[derive(serde::Deserialize)]
struct GitHubCommitRef {
    object: GitHubCommitObject,
}

#[derive(serde::Deserialize)]
struct GitHubCommitObject {
    sha: String,
}

#[derive(serde::Deserialize)]
struct GitLabCommit {
    id: String,
}

/// Returns `Some(commit)` if `repo_url` matched a known host's shortcut API,
/// `None` if the caller should fall back to a full `ls-remote`.
pub async fn try_head_commit(
    http: &reqwest::Client,
    repo_url: &str,
    git_ref: &str,
) -> AppResult<Option<String>> {
    let Some((host, owner_repo)) = split_host_path(repo_url) else {
        return Ok(None);
    };

    match host.as_str() {
        "github.com" => github_head_commit(http, &owner_repo, git_ref).await,
        "gitlab.com" => gitlab_head_commit(http, &owner_repo, git_ref).await,
        "bitbucket.org" => bitbucket_head_commit(http, &owner_repo, git_ref).await,
        _ => Ok(None),
    }
}

fn split_host_path(repo_url: &str) -> Option<(String, String)> {
    let url = url::Url::parse(repo_url).ok()?;
    let host = url.host_str()?.to_string();
    let path = url
        .path()
        .trim_start_matches('/')
        .trim_end_matches(".git")
        .to_string();
    Some((host, path))
}

async fn github_head_commit(
    http: &reqwest::Client,
    owner_repo: &str,
    git_ref: &str,
) -> AppResult<Option<String>> {
    let endpoint = format!("https://api.github.com/repos/{owner_repo}/commits/{git_ref}");
    let resp = http
        .get(&endpoint)
        .header("User-Agent", "gitjobctl")
        .header("Accept", "application/vnd.github.v3.sha")
        .send()
        .await;

    match resp {
        Ok(r) if r.status().is_success() => Ok(Some(r.text().await?.trim().to_string())),
        _ => {
            // Fall back to the refs API, which reports SHAs as JSON instead of plaintext.
            let endpoint = format!("https://api.github.com/repos/{owner_repo}/git/ref/heads/{git_ref}");
            match http
                .get(&endpoint)
                .header("User-Agent", "gitjobctl")
                .send()
                .await
            {
                Ok(r) if r.status().is_success() => {
                    let parsed: GitHubCommitRef = r.json().await?;
                    Ok(Some(parsed.object.sha))
                }
                _ => Ok(None),
            }
        }
    }
}

async fn gitlab_head_commit(
    http: &reqwest::Client,
    owner_repo: &str,
    git_ref: &str,
) -> AppResult<Option<String>> {
    let project = urlencoding_like(owner_repo);
    let endpoint = format!(
        "https://gitlab.com/api/v4/projects/{project}/repository/commits/{git_ref}"
    );
    match http.get(&endpoint).send().await {
        Ok(r) if r.status().is_success() => {
            let parsed: GitLabCommit = r.json().await?;
            Ok(Some(parsed.id))
        }
        _ => Ok(None),
    }
}

async fn bitbucket_head_commit(
    http: &reqwest::Client,
    owner_repo: &str,
    git_ref: &str,
) -> AppResult<Option<String>> {
    let endpoint = format!(
        "https://api.bitbucket.org/2.0/repositories/{owner_repo}/commit/{git_ref}"
    );
    #[derive(serde::Deserialize)]
    struct BitbucketCommit {
        hash: String,
    }
    match http.get(&endpoint).send().await {
        Ok(r) if r.status().is_success() => {
            let parsed: BitbucketCommit = r.json().await?;
            Ok(Some(parsed.hash))
        }
        _ => Ok(None),
    }
}

fn urlencoding_like(path: &str) -> String {
    path.replace('/', "%2F")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_github_host_and_path() {
        let (host, path) = split_host_path("https://github.com/rancher/fleet.git").unwrap();
        assert_eq!(host, "github.com");
        assert_eq!(path, "rancher/fleet");
    }

    #[test]
    fn non_url_returns_none() {
        assert!(split_host_path("git@github.com:rancher/fleet.git").is_none());
    }
}
