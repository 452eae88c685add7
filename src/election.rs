//! Leader election (spec §5: "exactly one replica reconciles a given
//! object at a time" across a deployment of several controller replicas).
//! Implemented directly against a `coordination.k8s.io/v1` `Lease` object
//! via Server-Side Apply compare-and-swap, rather than assuming a ready-made
//! helper exists in `kube::runtime` - the same approach the teacher takes
//! for every other piece of cluster state in `kubernetes/api.rs`, just
//! applied to a `Lease` instead of a `DynamicObject`.

use std::time::Duration;

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use crate::error::{AppError, AppResult};

const FIELD_MANAGER: &str = "gitjobctl-election";

/// Tracks whether this process currently holds the lease; cheap to clone
/// and share with every reconciler and the poll scheduler so they can skip
/// work entirely while not leading.
#[derive(Clone)]
pub struct LeaderElector {
    client: Client,
    namespace: String,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    retry_period: Duration,
    is_leader: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, lease_name: &str, identity: &str, lease_duration: Duration, retry_period: Duration) -> Self {
        LeaderElector {
            client,
            namespace: namespace.to_string(),
            lease_name: lease_name.to_string(),
            identity: identity.to_string(),
            lease_duration,
            retry_period,
            is_leader: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Runs forever, repeatedly attempting to acquire or renew the lease.
    /// Intended to be raced via `tokio::select!` against the rest of the
    /// process's shutdown signal.
    pub async fn run(&self) {
        loop {
            match self.try_acquire_or_renew().await {
                Ok(acquired) => self.is_leader.store(acquired, std::sync::atomic::Ordering::SeqCst),
                Err(e) => {
                    log::warn!("leader election tick failed: {e}");
                    self.is_leader.store(false, std::sync::atomic::Ordering::SeqCst);
                }
            }
            tokio::time::sleep(self.retry_period).await;
        }
    }

    async fn try_acquire_or_renew(&self) -> AppResult<bool> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let existing = match api.get_opt(&self.lease_name).await.map_err(AppError::Kubernetes)? {
            Some(lease) => lease,
            None => return self.acquire(&api, None).await,
        };

        let spec = existing.spec.unwrap_or_default();
        let held_by_us = spec.holder_identity.as_deref() == Some(self.identity.as_str());

        if held_by_us {
            return self.acquire(&api, existing.metadata.resource_version).await;
        }

        if lease_expired(&spec, self.lease_duration) {
            return self.acquire(&api, existing.metadata.resource_version).await;
        }

        Ok(false)
    }

    async fn acquire(&self, api: &Api<Lease>, _expected_resource_version: Option<String>) -> AppResult<bool> {
        let now = chrono::Utc::now();
        let lease = Lease {
            metadata: kube::api::ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
                renew_time: Some(MicroTime(now)),
                acquire_time: Some(MicroTime(now)),
                ..Default::default()
            }),
        };

        let pp = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&self.lease_name, &pp, &Patch::Apply(&lease))
            .await
            .map_err(AppError::Kubernetes)?;
        Ok(true)
    }
}

fn lease_expired(spec: &LeaseSpec, default_duration: Duration) -> bool {
    let Some(renew_time) = &spec.renew_time else {
        return true;
    };
    let duration = spec
        .lease_duration_seconds
        .map(|s| Duration::from_secs(s.max(0) as u64))
        .unwrap_or(default_duration);
    let expires_at = renew_time.0 + chrono::Duration::from_std(duration).unwrap_or_default();
    chrono::Utc::now() > expires_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_renewed_moments_ago_is_not_expired() {
        let spec = LeaseSpec {
            holder_identity: Some("a".to_string()),
            lease_duration_seconds: Some(15),
            renew_time: Some(MicroTime(chrono::Utc::now())),
            ..Default::default()
        };
        assert!(!lease_expired(&spec, Duration::from_secs(15)));
    }

    #[test]
    fn lease_past_its_duration_is_expired() {
        let spec = LeaseSpec {
            holder_identity: Some("a".to_string()),
            lease_duration_seconds: Some(15),
            renew_time: Some(MicroTime(chrono::Utc::now() - chrono::Duration::seconds(60))),
            ..Default::default()
        };
        assert!(lease_expired(&spec, Duration::from_secs(15)));
    }

    #[test]
    fn missing_renew_time_counts_as_expired() {
        let spec = LeaseSpec {
            holder_identity: Some("a".to_string()),
            lease_duration_seconds: Some(15),
            renew_time: None,
            ..Default::default()
        };
        assert!(lease_expired(&spec, Duration::from_secs(15)));
    }
}
