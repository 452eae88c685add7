//! Source Poller (C1), HelmOp side: resolves `spec.version` (a semver
//! constraint, `"latest"`, or empty) against the chart repo/OCI registry and
//! writes the concrete version to status, mirroring the GitRepo poll at a
//! coarser granularity - a HelmOp has no branch/commit distinction, just one
//! resolved version string (spec §4.1, §4.3 steps 6-7 reused here for the
//! version-resolution step rather than a full Bundle build).

use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use crate::bundle::chart;
use crate::error::{AppError, AppResult};
use crate::types::HelmOp;

#[derive(Debug, PartialEq)]
pub enum PollDecision {
    Unchanged,
    Update { version: String },
}

pub fn decide(current_version: Option<&str>, resolved: &str) -> PollDecision {
    if current_version == Some(resolved) {
        PollDecision::Unchanged
    } else {
        PollDecision::Update {
            version: resolved.to_string(),
        }
    }
}

pub async fn poll_once(http: &reqwest::Client, client: &Client, op: &HelmOp) -> AppResult<PollDecision> {
    let ns = op
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| AppError::Internal("HelmOp missing namespace".to_string()))?;
    let name = op
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| AppError::Internal("HelmOp missing name".to_string()))?;

    let wanted = op.spec.fields.version.as_deref().unwrap_or("");
    let resolved = if op.spec.fields.repo.starts_with("oci://") {
        chart::resolve_from_oci(http, &op.spec.fields.repo, wanted).await?
    } else {
        chart::resolve_from_index(http, &op.spec.fields.repo, &op.spec.fields.chart, wanted).await?
    };

    // A strict version constraint that matched no tag/entry resolves to an
    // empty `ResolvedChart` rather than an error (spec §8 boundary behavior);
    // that's "nothing to deploy yet", not a version to write to status.
    if resolved.version.is_empty() {
        return Ok(PollDecision::Unchanged);
    }

    let current = op.status.as_ref().and_then(|s| s.version.as_deref());
    let decision = decide(current, &resolved.version);

    if let PollDecision::Update { version } = &decision {
        write_version_status(client, ns, name, version).await?;
    }

    Ok(decision)
}

async fn write_version_status(client: &Client, ns: &str, name: &str, version: &str) -> AppResult<()> {
    let api: Api<HelmOp> = Api::namespaced(client.clone(), ns);
    let patch = serde_json::json!({ "status": { "version": version } });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(AppError::Kubernetes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_version_is_unchanged() {
        assert_eq!(decide(Some("1.2.3"), "1.2.3"), PollDecision::Unchanged);
    }

    #[test]
    fn new_version_updates() {
        assert_eq!(
            decide(Some("1.2.3"), "1.3.0"),
            PollDecision::Update { version: "1.3.0".to_string() }
        );
    }

    #[test]
    fn first_resolution_with_no_prior_status_updates() {
        assert_eq!(decide(None, "1.0.0"), PollDecision::Update { version: "1.0.0".to_string() });
    }
}
