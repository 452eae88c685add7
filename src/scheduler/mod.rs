//! Poll Scheduler (C9): paces how often each GitRepo/HelmOp gets re-polled,
//! independent of the watch-driven reconcile loop (spec §4.9). One job per
//! `(namespace, name)`; each job's poll runs under a single-permit
//! `tokio::sync::Semaphore` so a slow poll never overlaps with its own next
//! tick, and a `CancellationToken` lets a deleted source's job stop
//! cleanly instead of firing into a missing object.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Floor enforced on every job regardless of what the source requests
/// (spec §4.9: "pollingIntervalSeconds below this floor is clamped up").
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Ceiling a GitRepo/HelmOp with no `pollingIntervalSeconds` set at all
/// falls back to (spec §4.9, also referenced from the webhook intake path
/// which extends a bare interval out to this value once a push notification
/// means polling is now just a safety net).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    GitRepo,
    HelmOp,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub component: Component,
    pub namespace: String,
    pub name: String,
}

struct JobHandle {
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
}

/// Clamps a requested interval to `[MIN_POLL_INTERVAL, +inf)`, substituting
/// `DEFAULT_POLL_INTERVAL` when none was requested at all.
pub fn resolve_interval(requested_seconds: Option<u64>) -> Duration {
    match requested_seconds {
        Some(secs) => Duration::from_secs(secs).max(MIN_POLL_INTERVAL),
        None => DEFAULT_POLL_INTERVAL,
    }
}

/// Registry of running poll jobs, keyed by source identity. Generic over
/// the poll closure so unit tests can drive it without touching the git/kube
/// stack; `controllers` wires this up with the real `poller::source` poll.
pub struct Scheduler {
    jobs: Mutex<HashMap<JobKey, JobHandle>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts, replacing any existing job for this key) a
    /// recurring poll. `run_once` is invoked on every tick; if a tick is
    /// still running when the next one comes due, the next tick waits for
    /// the semaphore rather than running concurrently (spec §4.9 mutual
    /// exclusion requirement).
    pub async fn add_or_modify<F, Fut>(&self, key: JobKey, interval: Duration, run_once: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.remove(&key).await;

        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(1));

        let task_cancel = cancel.clone();
        let task_semaphore = semaphore.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Ok(permit) = task_semaphore.clone().try_acquire_owned() else {
                            // previous tick is still running; skip this one rather than queue up.
                            continue;
                        };
                        let fut = run_once();
                        tokio::select! {
                            _ = task_cancel.cancelled() => break,
                            _ = fut => {}
                        }
                        drop(permit);
                    }
                }
            }
        });

        self.jobs.lock().await.insert(key, JobHandle { cancel, semaphore });
    }

    /// Cancels and forgets a job, e.g. on GitRepo/HelmOp deletion (spec §4.9
    /// `CleanupStale`/`Remove`).
    pub async fn remove(&self, key: &JobKey) {
        if let Some(handle) = self.jobs.lock().await.remove(key) {
            handle.cancel.cancel();
        }
    }

    /// Drops any tracked job whose key isn't in `live_keys`, run
    /// periodically to catch deletes the watcher missed during a restart
    /// (spec §4.9 `CleanupStale`).
    pub async fn cleanup_stale(&self, live_keys: &std::collections::HashSet<JobKey>) {
        let mut jobs = self.jobs.lock().await;
        let stale: Vec<JobKey> = jobs.keys().filter(|k| !live_keys.contains(k)).cloned().collect();
        for key in stale {
            if let Some(handle) = jobs.remove(&key) {
                handle.cancel.cancel();
            }
        }
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolve_interval_clamps_to_floor() {
        assert_eq!(resolve_interval(Some(1)), MIN_POLL_INTERVAL);
    }

    #[test]
    fn resolve_interval_defaults_when_unset() {
        assert_eq!(resolve_interval(None), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn resolve_interval_passes_through_above_floor() {
        assert_eq!(resolve_interval(Some(120)), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn add_or_modify_ticks_and_remove_cancels() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let key = JobKey {
            component: Component::GitRepo,
            namespace: "ns".to_string(),
            name: "repo".to_string(),
        };

        let counter_clone = counter.clone();
        scheduler
            .add_or_modify(key.clone(), Duration::from_millis(20), move || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(90)).await;
        scheduler.remove(&key).await;
        let seen = counter.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected multiple ticks, saw {seen}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_cancel = counter.load(Ordering::SeqCst);
        assert_eq!(after_cancel, seen, "ticks continued after cancellation");
    }

    #[tokio::test]
    async fn cleanup_stale_drops_unlisted_jobs() {
        let scheduler = Scheduler::new();
        let key = JobKey {
            component: Component::HelmOp,
            namespace: "ns".to_string(),
            name: "app".to_string(),
        };
        scheduler
            .add_or_modify(key.clone(), Duration::from_secs(60), || async {})
            .await;
        assert_eq!(scheduler.job_count().await, 1);

        scheduler.cleanup_stale(&std::collections::HashSet::new()).await;
        assert_eq!(scheduler.job_count().await, 0);
    }
}
