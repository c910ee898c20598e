use std::collections::BTreeSet;
use std::sync::Arc;

use barops_core::{BarId, DateWindow, JobStep, RunStatus, StepStatus, SyncError, SyncRun};
use barops_storage::OutboundRequest;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{DrainReport, RecomputeReport, SyncService};

pub const DAILY_JOB: &str = "daily";

/// Upper bound on dirty periods recomputed by a single job run.
const DIRTY_PERIOD_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairFailure {
    pub bar_id: BarId,
    pub source_system: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub run: SyncRun,
    pub failed_pairs: Vec<PairFailure>,
    pub process: Option<DrainReport>,
    pub aggregate: Option<RecomputeReport>,
    pub notified: bool,
    /// Set when the invocation did no work.
    pub skipped: Option<String>,
}

impl JobReport {
    fn skipped(run: SyncRun, reason: impl Into<String>) -> Self {
        Self {
            run,
            failed_pairs: Vec::new(),
            process: None,
            aggregate: None,
            notified: false,
            skipped: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.run.status, RunStatus::Succeeded | RunStatus::Skipped)
    }
}

#[derive(Default)]
struct JobState {
    failed_pairs: Vec<PairFailure>,
    process: Option<DrainReport>,
    aggregate: Option<RecomputeReport>,
    notified: bool,
    /// Pair run opened by the ingest step and not yet closed.
    in_flight: Option<SyncRun>,
}

#[derive(Serialize, Deserialize)]
struct IngestDetail {
    pairs: usize,
    failed_pairs: Vec<PairFailure>,
}

/// The scheduled pipeline: ingest every configured source, drain the raw
/// backlog, recompute dirty periods, then notify about failures.
#[derive(Clone)]
pub struct DailyJob {
    service: Arc<SyncService>,
}

impl DailyJob {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self { service }
    }

    pub async fn run(&self, window: DateWindow) -> Result<JobReport, SyncError> {
        let store = self.service.store();
        let mut run = SyncRun::start_job(DAILY_JOB, window);
        let lease_ttl = self.service.config().lease_ttl();

        if !store.acquire_lease(DAILY_JOB, run.id, lease_ttl).await? {
            info!(run_id = %run.id, "daily job lease is held elsewhere; skipping");
            run.finish(RunStatus::Skipped, Some("lease held by another invocation".into()));
            store.save_run(&run).await?;
            return Ok(JobReport::skipped(run, "lease held by another invocation"));
        }
        match store
            .try_begin_run(&run, self.service.config().stale_after())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.release(run.id).await;
                run.finish(RunStatus::Skipped, Some("a daily run for this window is still running".into()));
                store.save_run(&run).await?;
                return Ok(JobReport::skipped(run, "a daily run for this window is still running"));
            }
            Err(err) => {
                self.release(run.id).await;
                return Err(err.into());
            }
        }

        Ok(self.execute_leased(run, JobStep::Ingest).await)
    }

    /// Continue a stored job run from its first step that has not succeeded.
    pub async fn resume(&self, run_id: Uuid) -> Result<JobReport, SyncError> {
        let store = self.service.store();
        let mut run = store
            .get_run(run_id)
            .await?
            .ok_or_else(|| SyncError::InvalidInput(format!("run {run_id} not found")))?;
        if run.target != format!("job:{DAILY_JOB}") {
            return Err(SyncError::InvalidInput(format!(
                "run {run_id} is a {} run, not a daily job",
                run.target
            )));
        }
        let Some(from) = run.resume_point() else {
            return Ok(JobReport::skipped(run, "every step already succeeded"));
        };

        if !store
            .acquire_lease(DAILY_JOB, run.id, self.service.config().lease_ttl())
            .await?
        {
            return Ok(JobReport::skipped(run, "lease held by another invocation"));
        }
        info!(run_id = %run.id, step = from.as_str(), "resuming daily job");
        run.status = RunStatus::Running;
        run.finished_at = None;
        run.error = None;
        if let Err(err) = store.save_run(&run).await {
            self.release(run.id).await;
            return Err(err.into());
        }

        Ok(self.execute_leased(run, from).await)
    }

    /// Runs the steps under the job timeout, persists the closed run and
    /// releases the lease whatever the outcome.
    async fn execute_leased(&self, mut run: SyncRun, from: JobStep) -> JobReport {
        let timeout = self.service.config().job_timeout();
        let mut state = JobState::default();
        let span = info_span!("daily_job", run_id = %run.id, window = %run.window);

        let finished = tokio::time::timeout(timeout, self.execute(&mut run, &mut state, from))
            .instrument(span)
            .await;
        if finished.is_err() {
            warn!(run_id = %run.id, "daily job timed out");
            let interrupted: Vec<JobStep> = run
                .steps
                .iter()
                .filter(|r| r.status == StepStatus::Running)
                .map(|r| r.step)
                .collect();
            for step in interrupted {
                run.set_step(step, StepStatus::Failed, Some("timed out".into()));
            }
            run.finish(
                RunStatus::TimedOut,
                Some(format!("job exceeded {}s", timeout.as_secs())),
            );
            if let Some(mut pair) = state.in_flight.take() {
                pair.counts.errors = 1;
                pair.finish(RunStatus::TimedOut, Some("daily job timed out during ingestion".into()));
                if let Err(err) = self.service.store().save_run(&pair).await {
                    warn!(run_id = %pair.id, error = %err, "failed to close interrupted source run");
                }
            }
        }

        if let Err(err) = self.service.store().save_run(&run).await {
            warn!(run_id = %run.id, error = %err, "failed to persist daily job run");
        }
        self.release(run.id).await;

        info!(run_id = %run.id, status = %run.status, "daily job finished");
        JobReport {
            run,
            failed_pairs: state.failed_pairs,
            process: state.process,
            aggregate: state.aggregate,
            notified: state.notified,
            skipped: None,
        }
    }

    async fn execute(&self, run: &mut SyncRun, state: &mut JobState, from: JobStep) {
        let start = JobStep::ORDER
            .iter()
            .position(|step| *step == from)
            .unwrap_or(0);
        if start > 0 {
            state.failed_pairs = previous_failures(run);
        }

        let mut broken: Option<String> = None;
        for step in JobStep::ORDER[start..].iter().copied() {
            if broken.is_some() && step != JobStep::Notify {
                run.set_step(step, StepStatus::Skipped, Some("an earlier step failed".into()));
                continue;
            }
            run.set_step(step, StepStatus::Running, None);
            self.checkpoint(run).await;

            let result = match step {
                JobStep::Ingest => self.step_ingest(run, state).await,
                JobStep::Process => self.step_process(state).await,
                JobStep::Aggregate => self.step_aggregate(state).await,
                JobStep::Notify => self.step_notify(run, state, broken.as_deref()).await,
            };
            match result {
                Ok(detail) => run.set_step(step, StepStatus::Succeeded, detail),
                Err(detail) => {
                    warn!(step = step.as_str(), error = %detail, "daily job step failed");
                    run.set_step(step, StepStatus::Failed, Some(detail.clone()));
                    broken = Some(format!("{} step failed: {detail}", step.as_str()));
                }
            }
            self.checkpoint(run).await;
        }

        let status = if broken.is_some() {
            RunStatus::Failed
        } else if !state.failed_pairs.is_empty() {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        };
        run.finish(status, broken);
    }

    async fn checkpoint(&self, run: &SyncRun) {
        if let Err(err) = self.service.store().save_run(run).await {
            warn!(run_id = %run.id, error = %err, "failed to checkpoint daily job run");
        }
    }

    async fn release(&self, holder: Uuid) {
        if let Err(err) = self.service.store().release_lease(DAILY_JOB, holder).await {
            warn!(error = %err, "failed to release daily job lease");
        }
    }

    async fn step_ingest(
        &self,
        run: &mut SyncRun,
        state: &mut JobState,
    ) -> Result<Option<String>, String> {
        let mut pairs = 0usize;
        for bar in self.service.registry().enabled_bars() {
            for source in bar.enabled_sources() {
                pairs += 1;
                let failure = match self
                    .service
                    .sync_source_tracked(
                        bar.bar_id,
                        &source.source_system,
                        run.window,
                        &mut state.in_flight,
                    )
                    .await
                {
                    Ok(outcome) => {
                        if let Some(report) = &outcome.report {
                            run.counts.collected += report.collected;
                            run.counts.inserted += report.inserted;
                            run.counts.updated += report.updated;
                        }
                        outcome.failure()
                    }
                    Err(err) => Some(err.to_string()),
                };
                if let Some(error) = failure {
                    warn!(bar_id = bar.bar_id, source_system = %source.source_system, error = %error, "source sync failed");
                    run.counts.errors += 1;
                    state.failed_pairs.push(PairFailure {
                        bar_id: bar.bar_id,
                        source_system: source.source_system.clone(),
                        error,
                    });
                }
            }
        }

        let detail = IngestDetail {
            pairs,
            failed_pairs: state.failed_pairs.clone(),
        };
        serde_json::to_string(&detail)
            .map(Some)
            .map_err(|err| err.to_string())
    }

    async fn step_process(&self, state: &mut JobState) -> Result<Option<String>, String> {
        let drain = self.service.drain().await;
        let outcome = match &drain.totals.persistence_error {
            Some(err) => Err(err.clone()),
            None => Ok(Some(format!(
                "processed {} raw records ({} poisoned) in {} rounds",
                drain.totals.processed, drain.totals.poisoned, drain.rounds
            ))),
        };
        state.process = Some(drain);
        outcome
    }

    async fn step_aggregate(&self, state: &mut JobState) -> Result<Option<String>, String> {
        let aggregator = self.service.aggregator();
        let failed: BTreeSet<BarId> = state.failed_pairs.iter().map(|p| p.bar_id).collect();
        let included = if failed.is_empty() {
            None
        } else {
            let bars = aggregator.known_bars().await.map_err(|err| err.to_string())?;
            Some(
                bars.into_iter()
                    .filter(|bar| !failed.contains(bar))
                    .collect::<Vec<_>>(),
            )
        };

        let report = aggregator
            .recompute_dirty(included.as_deref(), DIRTY_PERIOD_LIMIT)
            .await
            .map_err(|err| err.to_string())?;
        let outcome = if report.errors.is_empty() {
            Ok(Some(format!("recomputed {} periods", report.recalculated)))
        } else {
            Err(report.errors.join("; "))
        };
        state.aggregate = Some(report);
        outcome
    }

    /// Never fails: notification errors are logged and recorded in the step
    /// detail only.
    async fn step_notify(
        &self,
        run: &SyncRun,
        state: &mut JobState,
        broken: Option<&str>,
    ) -> Result<Option<String>, String> {
        if state.failed_pairs.is_empty() && broken.is_none() {
            return Ok(Some("nothing to report".into()));
        }
        let Some(webhook) = self.service.config().notify_webhook.as_deref() else {
            return Ok(Some("no webhook configured".into()));
        };

        let message = json!({
            "job": DAILY_JOB,
            "run_id": run.id,
            "window": run.window,
            "failed_pairs": state.failed_pairs,
            "error": broken,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let request = OutboundRequest::post_json(webhook, &message);
        match self.service.http().fetch(run.id, "notify", request).await {
            Ok(_) => {
                state.notified = true;
                Ok(Some("notification sent".into()))
            }
            Err(err) => {
                warn!(run_id = %run.id, error = %err, "failed to send job notification");
                Ok(Some(format!("notification failed: {err}")))
            }
        }
    }
}

fn previous_failures(run: &SyncRun) -> Vec<PairFailure> {
    run.steps
        .iter()
        .find(|r| r.step == JobStep::Ingest)
        .and_then(|r| r.detail.as_deref())
        .and_then(|detail| serde_json::from_str::<IngestDetail>(detail).ok())
        .map(|detail| detail.failed_pairs)
        .unwrap_or_default()
}
