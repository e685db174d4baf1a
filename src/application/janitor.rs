use super::registry::JobTable;
use crate::config::CleanupPolicy;
use crate::ports::storage::ArtifactStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long finished jobs stay in the table and on disk.
pub fn retention(policy: CleanupPolicy) -> Duration {
    match policy {
        CleanupPolicy::Immediate => Duration::ZERO,
        CleanupPolicy::Retain(window) => window,
    }
}

/// Forget finished jobs older than `retention` and delete what is left of them.
pub async fn sweep<S>(jobs: &JobTable, store: &S, retention: Duration) -> usize
where
    S: ArtifactStore + ?Sized,
{
    let expired = jobs.expired(Utc::now(), retention);
    for job_id in &expired {
        if let Err(e) = store.purge(*job_id).await {
            warn!(%job_id, "Failed to purge expired job: {}", e);
            continue;
        }
        jobs.remove(*job_id);
        debug!(%job_id, "Expired job removed");
    }
    expired.len()
}

/// Run [`sweep`] every `interval` until the task is aborted.
pub fn start<S>(
    jobs: JobTable,
    store: Arc<S>,
    policy: CleanupPolicy,
    interval: Duration,
) -> JoinHandle<()>
where
    S: ArtifactStore + 'static,
{
    let retention = retention(policy);
    info!(?retention, ?interval, "Starting artifact janitor");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let swept = sweep(&jobs, &*store, retention).await;
            if swept > 0 {
                info!(swept, "Janitor removed expired jobs");
            }
        }
    })
}
