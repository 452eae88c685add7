//! Source Poller (C1): resolves a GitRepo's configured ref to a commit and
//! writes it to status, respecting the poll-vs-webhook precedence invariant
//! (spec §3 invariant 4: whichever observation is more recent wins, so a
//! slow poll that started before a webhook arrived must not clobber it).

pub mod helm_op;

use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use crate::error::{AppError, AppResult};
use crate::git::auth::GitCredentials;
use crate::git::GitClient;
use crate::types::git_repo::GitRepoStatus;
use crate::types::GitRepo;

/// What a single poll attempt decided.
#[derive(Debug, PartialEq)]
pub enum PollDecision {
    /// Commit is unchanged and no forced resync is pending; nothing to write.
    Unchanged,
    /// Status should be updated to `commit`.
    Update { commit: String },
}

/// Pure decision logic, split out from the I/O so the precedence rule is
/// unit-testable: a poll observation loses to a webhook observation that's
/// already newer (spec §3 invariant 4), even if the poll resolved a
/// different commit than what's currently recorded.
pub fn decide(
    current_status: &GitRepoStatus,
    current_generation: i64,
    force_sync_generation: i64,
    resolved_commit: &str,
    poll_started_at: chrono::DateTime<chrono::Utc>,
) -> PollDecision {
    let forced = current_generation != force_sync_generation;
    let unchanged_commit = current_status.commit.as_deref() == Some(resolved_commit);

    if unchanged_commit && !forced {
        return PollDecision::Unchanged;
    }

    if let Some(observed_at) = current_status.observed_at.as_deref() {
        if let Ok(observed_at) = chrono::DateTime::parse_from_rfc3339(observed_at) {
            if observed_at.with_timezone(&chrono::Utc) > poll_started_at && !forced {
                return PollDecision::Unchanged;
            }
        }
    }

    PollDecision::Update {
        commit: resolved_commit.to_string(),
    }
}

/// Resolves `repo`'s effective ref to a commit and, if `decide` says to,
/// applies the new status via Server-Side Apply so concurrent pollers and
/// webhook handlers merge rather than clobber each other (spec §5).
pub async fn poll_once(
    client: &Client,
    git_client: &dyn GitClient,
    repo: &GitRepo,
    creds: &GitCredentials,
) -> AppResult<PollDecision> {
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

    let git_ref = repo
        .effective_ref()
        .ok_or_else(|| AppError::Validation(format!("{ns}/{name} has neither branch nor revision set")))?;

    let started_at = chrono::Utc::now();
    let commit = git_client
        .resolve_commit(&repo.spec.fields.repo, git_ref, creds)
        .await?;

    let status = repo.status.clone().unwrap_or_default();
    let generation = repo.metadata.generation.unwrap_or(0);
    let decision = decide(
        &status,
        generation,
        repo.spec.fields.force_sync_generation,
        &commit,
        started_at,
    );

    if let PollDecision::Update { commit } = &decision {
        write_commit_status(client, ns, name, commit, started_at).await?;
    }

    Ok(decision)
}

async fn write_commit_status(
    client: &Client,
    ns: &str,
    name: &str,
    commit: &str,
    observed_at: chrono::DateTime<chrono::Utc>,
) -> AppResult<()> {
    let api: Api<GitRepo> = Api::namespaced(client.clone(), ns);
    let patch = serde_json::json!({
        "status": {
            "commit": commit,
            "observedAt": observed_at.to_rfc3339(),
        }
    });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(AppError::Kubernetes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(commit: Option<&str>, observed_at: Option<&str>) -> GitRepoStatus {
        GitRepoStatus {
            commit: commit.map(str::to_string),
            observed_generation: 0,
            conditions: vec![],
            observed_at: observed_at.map(str::to_string),
        }
    }

    #[test]
    fn unchanged_commit_with_no_force_does_nothing() {
        let status = status(Some("abc"), None);
        let decision = decide(&status, 1, 1, "abc", chrono::Utc::now());
        assert_eq!(decision, PollDecision::Unchanged);
    }

    #[test]
    fn new_commit_updates() {
        let status = status(Some("abc"), None);
        let decision = decide(&status, 1, 1, "def", chrono::Utc::now());
        assert_eq!(decision, PollDecision::Update { commit: "def".to_string() });
    }

    #[test]
    fn force_sync_generation_bump_reapplies_same_commit() {
        let status = status(Some("abc"), None);
        // current_generation (1) != force_sync_generation (2): a bump is pending.
        let decision = decide(&status, 1, 2, "abc", chrono::Utc::now());
        assert_eq!(decision, PollDecision::Update { commit: "abc".to_string() });
    }

    #[test]
    fn poll_started_before_a_newer_webhook_observation_loses() {
        let poll_started = chrono::Utc::now() - chrono::Duration::seconds(30);
        let webhook_observed_at = chrono::Utc::now().to_rfc3339();
        let status = status(Some("abc"), Some(&webhook_observed_at));
        let decision = decide(&status, 1, 1, "def", poll_started);
        assert_eq!(decision, PollDecision::Unchanged);
    }
}
