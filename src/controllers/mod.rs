//! Reconciler wiring: one `kube::runtime::Controller` per top-level kind,
//! following the teacher's `Controller::new(api, watcher::Config::default())
//! .run(reconcile, error_policy, ctx)` shape from `kubernetes/controller.rs`,
//! generalized from a single DeployConfig controller to the five kinds this
//! engine reconciles (spec §5: GitRepo, HelmOp, Bundle, BundleDeployment,
//! plus a Cluster monitor that isn't itself a reconciler but a periodic
//! sweep over the same `Context`).

pub mod bundle;
pub mod bundle_deployment;
pub mod cluster_monitor;
pub mod git_repo;
pub mod helm_op;

use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use crate::deploy::helm::HelmRenderer;
use crate::election::LeaderElector;
use crate::git::GitClient;

/// Shared, read-mostly state every reconciler closes over.
pub struct Context {
    pub client: Client,
    pub http: reqwest::Client,
    pub git_client: Arc<dyn GitClient>,
    pub helm: Arc<dyn HelmRenderer>,
    pub elector: LeaderElector,
    pub config: crate::config::Config,
}

/// Default backoff for a reconcile failure or a deliberate "check back
/// later" result (spec §4.6's stall backoff, §7's generic requeue delay).
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(10);

/// A reconciler skips doing anything while this replica isn't the leader
/// (spec §5), but still gets re-invoked on the normal watch/resync cadence
/// so it notices promotion without needing a separate wakeup mechanism.
pub fn skip_unless_leader(ctx: &Context) -> bool {
    !ctx.elector.is_leader()
}

/// Runs every controller concurrently until one exits (which, barring a
/// panic, is never - each `Controller::run` future is itself an infinite
/// stream drain). Intended to be one arm of the top-level `tokio::select!`
/// in `main`.
pub async fn run_all(ctx: Arc<Context>) {
    tokio::join!(
        git_repo::run(ctx.clone()),
        helm_op::run(ctx.clone()),
        bundle::run(ctx.clone()),
        bundle_deployment::run(ctx.clone()),
        cluster_monitor::run(ctx.clone()),
    );
}
