use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::{default_window, DailyJob, SyncService};

/// In-process cron trigger for the daily job, or `None` when scheduling is
/// disabled. The caller starts the returned scheduler.
pub async fn build_scheduler(service: Arc<SyncService>) -> Result<Option<JobScheduler>> {
    if !service.config().scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = service.config().daily_cron.clone();
    let daily = DailyJob::new(service);
    let job = Job::new_async(&cron, move |_uuid, _l| {
        let daily = daily.clone();
        Box::pin(async move {
            let window = default_window(Utc::now().date_naive());
            match daily.run(window).await {
                Ok(report) => info!(
                    run_id = %report.run.id,
                    status = %report.run.status,
                    failed_pairs = report.failed_pairs.len(),
                    "scheduled daily job finished"
                ),
                Err(err) => warn!(error = %err, "scheduled daily job failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
