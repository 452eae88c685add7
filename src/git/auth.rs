//! Credential plumbing for git transport: basic-auth/token secrets for
//! HTTPS, SSH key material, and the `known_hosts`/CA env var handling spec
//! §9's Design Note calls out as process-global state needing careful
//! scoping.

use std::sync::Arc;
use tokio::sync::Mutex;

/// Credentials resolved from a GitRepo's referenced Kubernetes Secret.
#[derive(Clone, Debug, Default)]
pub struct GitCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssh_private_key: Option<String>,
    pub ssh_known_hosts: Option<String>,
    pub ca_bundle: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

/// `GIT_SSL_CAINFO`/`GIT_SSL_NO_VERIFY` are process-global env vars that the
/// underlying transport reads. Since multiple GitRepo reconciles run
/// concurrently (spec §5), mutating them around a single fetch is only safe
/// behind a process-wide lock; this guard holds that lock for its lifetime
/// and restores the prior value on drop.
pub static GIT_SSL_ENV_LOCK: Mutex<()> = Mutex::const_new(());

pub struct SslEnvGuard {
    _permit: tokio::sync::MutexGuard<'static, ()>,
    prior_cainfo: Option<String>,
    prior_no_verify: Option<String>,
}

impl SslEnvGuard {
    pub async fn apply(creds: &GitCredentials) -> SslEnvGuard {
        let permit = GIT_SSL_ENV_LOCK.lock().await;
        let prior_cainfo = std::env::var("GIT_SSL_CAINFO").ok();
        let prior_no_verify = std::env::var("GIT_SSL_NO_VERIFY").ok();

        if let Some(ca) = &creds.ca_bundle {
            std::env::set_var("GIT_SSL_CAINFO", ca);
        }
        if creds.insecure_skip_tls_verify {
            std::env::set_var("GIT_SSL_NO_VERIFY", "true");
        }

        SslEnvGuard {
            _permit: permit,
            prior_cainfo,
            prior_no_verify,
        }
    }
}

impl Drop for SslEnvGuard {
    fn drop(&mut self) {
        match self.prior_cainfo.take() {
            Some(v) => std::env::set_var("GIT_SSL_CAINFO", v),
            None => std::env::remove_var("GIT_SSL_CAINFO"),
        }
        match self.prior_no_verify.take() {
            Some(v) => std::env::set_var("GIT_SSL_NO_VERIFY", v),
            None => std::env::remove_var("GIT_SSL_NO_VERIFY"),
        }
    }
}

pub type SharedCredentials = Arc<GitCredentials>;
