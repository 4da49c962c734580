use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::relay::RelayStats;

/// Start a scheduler that logs relay counters on `schedule` (six-field cron).
/// The returned scheduler must be kept alive for the job to keep firing.
pub async fn start(stats: Arc<RelayStats>, schedule: &str) -> Result<JobScheduler> {
    let job = Job::new_async(schedule, move |_uuid, _lock| {
        let stats = Arc::clone(&stats);
        Box::pin(async move {
            info!("Heartbeat: relay is alive ({})", stats.snapshot());
        })
    })
    .with_context(|| format!("Invalid heartbeat schedule: {}", schedule))?;

    let scheduler = JobScheduler::new()
        .await
        .context("Failed to create job scheduler")?;
    scheduler
        .add(job)
        .await
        .context("Failed to add heartbeat job")?;
    scheduler
        .start()
        .await
        .context("Failed to start scheduler")?;

    info!("Heartbeat scheduled with cron: {}", schedule);
    Ok(scheduler)
}
