use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Process-wide configuration, assembled once at startup from the environment.
///
/// There is deliberately no configmap-driven global settings layer here
/// (that's an external collaborator per the scope notes) - these are the
/// env vars the core engine itself reads.
#[derive(Clone, Debug)]
pub struct Config {
    /// Default GitRepo polling interval, used when `spec.pollingInterval` is unset.
    pub default_polling_interval: Duration,
    /// Interval the webhook short-circuit extends an unset polling interval to.
    pub webhook_relaxed_polling_interval: Duration,
    /// Leader-election lease tuning (`CATTLE_ELECTION_*`).
    pub election_lease_duration: Duration,
    pub election_renew_deadline: Duration,
    pub election_retry_period: Duration,
    /// `EXPERIMENTAL_HELM_OPS=true` gates HelmOp reconciliation.
    pub enable_helm_ops: bool,
    /// `FLEET_AGENT_REPLICA_COUNT` override, consumed by the deployer when
    /// rendering agent-facing charts.
    pub agent_replica_count: Option<u32>,
    /// Address the webhook intake HTTP server binds to.
    pub webhook_bind_addr: String,
    /// Rollout defaults (spec §4.6).
    pub rollout_max_new: usize,
    pub rollout_auto_partition_size_percent: u8,
    pub rollout_max_unavailable_percent: u8,
    pub rollout_max_unavailable_partitions: usize,
}

fn env_duration_secs(key: &str, default_secs: u64) -> AppResult<Duration> {
    match std::env::var(key) {
        Ok(v) => {
            let secs: u64 = v
                .parse()
                .map_err(|_| AppError::Config(format!("{key} must be an integer number of seconds, got {v:?}")))?;
            Ok(Duration::from_secs(secs))
        }
        Err(std::env::VarError::NotPresent) => Ok(Duration::from_secs(default_secs)),
        Err(e) => Err(AppError::EnvVar(e)),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Ok(Config {
            default_polling_interval: env_duration_secs("GITREPO_POLLING_INTERVAL", 15)?,
            webhook_relaxed_polling_interval: Duration::from_secs(3600),
            election_lease_duration: env_duration_secs("CATTLE_ELECTION_LEASE_DURATION", 15)?,
            election_renew_deadline: env_duration_secs("CATTLE_ELECTION_RENEW_DEADLINE", 10)?,
            election_retry_period: env_duration_secs("CATTLE_ELECTION_RETRY_PERIOD", 2)?,
            enable_helm_ops: env_bool("EXPERIMENTAL_HELM_OPS", false),
            agent_replica_count: std::env::var("FLEET_AGENT_REPLICA_COUNT")
                .ok()
                .and_then(|v| v.parse().ok()),
            webhook_bind_addr: std::env::var("WEBHOOK_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            rollout_max_new: 50,
            rollout_auto_partition_size_percent: 25,
            rollout_max_unavailable_percent: 10,
            rollout_max_unavailable_partitions: 0,
        })
    }
}
