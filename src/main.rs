pub mod prelude {
    pub use chrono::prelude::*;

    pub use actix_web::{
        web::{self, Data},
        App, HttpResponse, HttpServer, Responder,
    };
    pub use actix_web_opentelemetry::{PrometheusMetricsHandler, RequestMetrics, RequestTracing};
    pub use opentelemetry::global;
    pub use opentelemetry_sdk::metrics::MeterProvider;
    pub use serde::{Deserialize, Serialize};

    pub use crate::error::{AppError, AppResult};
}

mod bundle;
mod config;
mod content_hash;
mod controllers;
mod deploy;
mod election;
mod error;
mod git;
mod labels;
mod metrics;
mod poller;
mod rollout;
mod scheduler;
mod store;
mod targeting;
mod types;
mod webhooks;

use std::collections::HashSet;
use std::sync::Arc;

use kube::api::{Api, ListParams};
use kube::ResourceExt;

use crate::config::Config;
use crate::deploy::helm::ShellHelm;
use crate::election::LeaderElector;
use crate::git::GixClient;
use crate::git::auth::GitCredentials;
use crate::prelude::*;
use crate::scheduler::{Component, JobKey, Scheduler};
use crate::types::{GitRepo, HelmOp};
use crate::webhooks::intake::{ResyncNotifier, SchedulerNotifier, WebhookState};

/// How often the scheduler's job set is reconciled against the live
/// GitRepo/HelmOp list (spec §4.9: new sources start polling, deleted ones
/// stop, and changed intervals take effect without a process restart).
const SCHEDULER_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[actix_web::main]
#[allow(clippy::expect_used)]
async fn main() -> std::io::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .filter_module("actix_web::middleware::logger", log::LevelFilter::Warn)
        .filter_module("kube_runtime::controller", log::LevelFilter::Warn)
        .filter_module("gitjobctl::controllers", log::LevelFilter::Info)
        .filter_module("gitjobctl::poller", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = Config::from_env().expect("Failed to load configuration from environment");

    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .expect("Failed to build OpenTelemetry Prometheus exporter");
    let provider = MeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(provider);
    metrics::init(&registry).expect("Failed to initialize metrics");

    let client = kube::Client::try_default()
        .await
        .expect("Failed to connect to Kubernetes - is KUBECONFIG set or running in-cluster?");

    let identity = std::env::var("POD_NAME").unwrap_or_else(|_| format!("gitjobctl-{}", std::process::id()));
    let election_namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "cattle-fleet-system".to_string());
    let elector = LeaderElector::new(
        client.clone(),
        &election_namespace,
        "gitjobctl-leader",
        &identity,
        config.election_lease_duration,
        config.election_retry_period,
    );

    let ctx = Arc::new(controllers::Context {
        client: client.clone(),
        http: reqwest::Client::new(),
        git_client: Arc::new(GixClient::default()),
        helm: Arc::new(ShellHelm::default()),
        elector: elector.clone(),
        config: config.clone(),
    });

    let scheduler = Arc::new(Scheduler::new());
    let (resync_tx, resync_rx) = tokio::sync::mpsc::channel::<(String, String, Option<String>)>(64);
    let webhook_state = Data::new(WebhookState {
        client: client.clone(),
        notifier: Arc::new(SchedulerNotifier { sender: resync_tx }) as Arc<dyn ResyncNotifier>,
        relaxed_polling_interval: config.webhook_relaxed_polling_interval,
    });

    let bind_addr = config.webhook_bind_addr.clone();
    let http_registry = registry.clone();
    let http_server = HttpServer::new(move || {
        App::new()
            .wrap(RequestTracing::new())
            .wrap(RequestMetrics::default())
            .wrap(actix_web::middleware::Logger::default())
            .app_data(webhook_state.clone())
            .route("/metrics", web::get().to(PrometheusMetricsHandler::new(http_registry.clone())))
            .service(crate::webhooks::webhook_scope())
    })
    .bind(&bind_addr)
    .unwrap_or_else(|e| panic!("Failed to bind webhook server to {bind_addr}: {e}"))
    .run();

    tokio::select! {
        _ = elector.run() => {},
        _ = controllers::run_all(ctx.clone()) => {},
        _ = run_scheduler(ctx.clone(), scheduler.clone()) => {},
        _ = relay_resyncs(ctx.clone(), resync_rx) => {},
        result = http_server => {
            if let Err(e) = result {
                log::error!("webhook HTTP server exited: {e}");
            }
        }
    }

    Ok(())
}

/// Keeps the poll scheduler's job set in sync with the live GitRepo/HelmOp
/// objects, re-scanning every `SCHEDULER_REFRESH_INTERVAL` rather than
/// watching, since a missed scan just means a slightly stale interval
/// rather than a correctness problem (spec §4.9).
async fn run_scheduler(ctx: Arc<controllers::Context>, scheduler: Arc<Scheduler>) {
    let mut ticker = tokio::time::interval(SCHEDULER_REFRESH_INTERVAL);
    loop {
        ticker.tick().await;
        if !ctx.elector.is_leader() {
            continue;
        }
        if let Err(e) = refresh_scheduler(&ctx, &scheduler).await {
            log::warn!("scheduler refresh failed: {e}");
        }
    }
}

async fn refresh_scheduler(ctx: &controllers::Context, scheduler: &Arc<Scheduler>) -> crate::error::AppResult<()> {
    let mut live_keys = HashSet::new();

    let repos: Api<GitRepo> = Api::all(ctx.client.clone());
    for repo in repos.list(&ListParams::default()).await.map_err(crate::error::AppError::Kubernetes)?.items {
        let ns = repo.namespace().unwrap_or_default();
        let name = repo.name_any();
        let key = JobKey { component: Component::GitRepo, namespace: ns.clone(), name: name.clone() };
        live_keys.insert(key.clone());

        let interval = scheduler::resolve_interval(repo.spec.fields.polling_interval_seconds);
        let ctx = Arc::new(controllers::Context {
            client: ctx.client.clone(),
            http: ctx.http.clone(),
            git_client: ctx.git_client.clone(),
            helm: ctx.helm.clone(),
            elector: ctx.elector.clone(),
            config: ctx.config.clone(),
        });
        scheduler
            .add_or_modify(key, interval, move || {
                let ctx = ctx.clone();
                let ns = ns.clone();
                let name = name.clone();
                async move {
                    if let Err(e) = poll_git_repo_once(&ctx, &ns, &name).await {
                        log::warn!("scheduled poll of GitRepo {ns}/{name} failed: {e}");
                    }
                }
            })
            .await;
    }

    let ops: Api<HelmOp> = Api::all(ctx.client.clone());
    for op in ops.list(&ListParams::default()).await.map_err(crate::error::AppError::Kubernetes)?.items {
        let ns = op.namespace().unwrap_or_default();
        let name = op.name_any();
        let key = JobKey { component: Component::HelmOp, namespace: ns.clone(), name: name.clone() };
        live_keys.insert(key.clone());

        let interval = scheduler::resolve_interval(op.spec.fields.polling_interval_seconds);
        let ctx = Arc::new(controllers::Context {
            client: ctx.client.clone(),
            http: ctx.http.clone(),
            git_client: ctx.git_client.clone(),
            helm: ctx.helm.clone(),
            elector: ctx.elector.clone(),
            config: ctx.config.clone(),
        });
        scheduler
            .add_or_modify(key, interval, move || {
                let ctx = ctx.clone();
                let ns = ns.clone();
                let name = name.clone();
                async move {
                    if let Err(e) = poll_helm_op_once(&ctx, &ns, &name).await {
                        log::warn!("scheduled poll of HelmOp {ns}/{name} failed: {e}");
                    }
                }
            })
            .await;
    }

    scheduler.cleanup_stale(&live_keys).await;
    Ok(())
}

async fn poll_git_repo_once(ctx: &controllers::Context, ns: &str, name: &str) -> crate::error::AppResult<()> {
    let api: Api<GitRepo> = Api::namespaced(ctx.client.clone(), ns);
    let repo = api.get(name).await.map_err(crate::error::AppError::Kubernetes)?;
    let creds = resolve_git_credentials(ctx, &repo).await.unwrap_or_default();
    poller::poll_once(&ctx.client, ctx.git_client.as_ref(), &repo, &creds).await?;
    Ok(())
}

async fn poll_helm_op_once(ctx: &controllers::Context, ns: &str, name: &str) -> crate::error::AppResult<()> {
    let api: Api<HelmOp> = Api::namespaced(ctx.client.clone(), ns);
    let op = api.get(name).await.map_err(crate::error::AppError::Kubernetes)?;
    poller::helm_op::poll_once(&ctx.http, &ctx.client, &op).await?;
    Ok(())
}

async fn resolve_git_credentials(ctx: &controllers::Context, repo: &GitRepo) -> Option<GitCredentials> {
    let secret_name = repo.spec.fields.client_secret_name.as_ref()?;
    let ns = repo.namespace()?;
    let api: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(ctx.client.clone(), &ns);
    let secret = api.get(secret_name).await.ok()?;
    let data = secret.data.as_ref()?;
    let get = |k: &str| data.get(k).map(|b| String::from_utf8_lossy(&b.0).to_string());
    Some(GitCredentials {
        username: get("username"),
        password: get("password").or_else(|| get("token")),
        ssh_private_key: get("ssh-privatekey"),
        ssh_known_hosts: get("known_hosts"),
        ca_bundle: get("cacerts"),
        insecure_skip_tls_verify: false,
    })
}

/// Drains webhook-triggered resync requests and polls that one GitRepo
/// immediately, short-circuiting the scheduler's normal cadence (spec
/// §4.2's webhook fast path). The scheduler's own tick for that source
/// still runs later at its relaxed interval as a safety net.
async fn relay_resyncs(ctx: Arc<controllers::Context>, mut rx: tokio::sync::mpsc::Receiver<(String, String, Option<String>)>) {
    while let Some((ns, name, _commit_hint)) = rx.recv().await {
        if !ctx.elector.is_leader() {
            continue;
        }
        if let Err(e) = poll_git_repo_once(&ctx, &ns, &name).await {
            log::warn!("webhook-triggered poll of GitRepo {ns}/{name} failed: {e}");
        }
    }
}
