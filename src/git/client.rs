use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::git::auth::{GitCredentials, SslEnvGuard};
use crate::git::provider_shortcut;

/// Abstraction over "resolve a ref to a commit" so the poller can be tested
/// against a fake without a network, and so `ShellHelm`-style swap-outs stay
/// possible (grounded in the teacher's trait seam around `octocrab`).
#[async_trait]
pub trait GitClient: Send + Sync {
    async fn resolve_commit(
        &self,
        repo_url: &str,
        git_ref: &str,
        creds: &GitCredentials,
    ) -> AppResult<String>;
}

/// Default implementation: tries the cheap provider-specific HTTP shortcut
/// first (spec §4.1), falling back to a real `git ls-remote` over `gix`
/// (pure-Rust transport, no libgit2 dependency).
pub struct GixClient {
    http: reqwest::Client,
}

impl Default for GixClient {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GitClient for GixClient {
    async fn resolve_commit(
        &self,
        repo_url: &str,
        git_ref: &str,
        creds: &GitCredentials,
    ) -> AppResult<String> {
        if let Some(commit) =
            provider_shortcut::try_head_commit(&self.http, repo_url, git_ref).await?
        {
            return Ok(commit);
        }

        ls_remote(repo_url, git_ref, creds).await
    }
}

/// Resolves `git_ref` against `repo_url` with a real git handshake, run on
/// the blocking pool since `gix`'s transport is synchronous.
async fn ls_remote(repo_url: &str, git_ref: &str, creds: &GitCredentials) -> AppResult<String> {
    let _guard = SslEnvGuard::apply(creds).await;

    let repo_url = repo_url.to_string();
    let git_ref = git_ref.to_string();
    let creds = creds.clone();

    tokio::task::spawn_blocking(move || ls_remote_blocking(&repo_url, &git_ref, &creds))
        .await
        .map_err(|e| AppError::Git(format!("git worker task panicked: {e}")))?
}

fn ls_remote_blocking(repo_url: &str, git_ref: &str, _creds: &GitCredentials) -> AppResult<String> {
    let url = gix::url::parse(repo_url.into())
        .map_err(|e| AppError::Git(format!("invalid git URL {repo_url:?}: {e}")))?;

    let tmp = tempfile_dir()?;
    let mut repo = gix::init_bare(&tmp)
        .map_err(|e| AppError::Git(format!("failed to prepare transport for {repo_url:?}: {e}")))?;

    let remote = repo
        .remote_at(url)
        .map_err(|e| AppError::GitAuth(format!("failed to configure remote {repo_url:?}: {e}")))?;

    let connection = remote
        .connect(gix::remote::Direction::Fetch)
        .map_err(|e| AppError::GitAuth(format!("failed to connect to {repo_url:?}: {e}")))?;

    let refs = connection
        .ref_map(gix::progress::Discard, Default::default())
        .map_err(|e| AppError::Git(format!("ls-remote failed for {repo_url:?}: {e}")))?;

    let wanted = [
        format!("refs/heads/{git_ref}"),
        format!("refs/tags/{git_ref}"),
        git_ref.to_string(),
    ];

    for reference in &refs.remote_refs {
        let name = reference.unpack().0.to_string();
        if wanted.iter().any(|w| w == &name) {
            if let Some(target) = reference.unpack().1 {
                return Ok(target.to_string());
            }
        }
    }

    // bare SHA: the caller already has a concrete commit, nothing to resolve.
    if git_ref.len() == 40 && git_ref.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(git_ref.to_string());
    }

    Err(AppError::NotFound(format!(
        "ref {git_ref:?} not found in {repo_url:?}"
    )))
}

fn tempfile_dir() -> AppResult<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("gitjobctl-lsremote-{}", uuid_like()));
    std::fs::create_dir_all(&dir).map_err(AppError::Io)?;
    Ok(dir)
}

/// A cheap process-unique suffix; this is not a cryptographic identifier,
/// only a scratch-directory disambiguator.
fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{nanos:x}-{:?}", std::thread::current().id())
}
