//! Ingestion, processing, aggregation and job orchestration for BarOps.

use std::sync::Arc;

use anyhow::Result;
use barops_adapters::{
    adapter_for_source, ingest, AdapterContext, IngestOptions, IngestReport, SourceAdapter,
    SOURCE_SYSTEMS,
};
use barops_core::{BarId, DateWindow, RunStatus, SyncError, SyncRun};
use barops_storage::{HttpFetcher, Store};
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};

mod aggregate;
mod config;
mod dispatch;
mod export;
mod job;
mod processor;
mod registry;
mod scheduler;

pub use aggregate::{compute_summary, Aggregator, RecomputeReport, MAX_TRAILING_PERIODS};
pub use config::SyncConfig;
pub use dispatch::{route_for, DispatchOutcome, DispatchRequest, Dispatcher, DISPATCH_ROUTES};
pub use export::{export_snapshot, ExportManifest, ExportManifestFile};
pub use job::{DailyJob, JobReport, PairFailure, DAILY_JOB};
pub use processor::{DrainReport, ProcessReport, Processor};
pub use registry::{BarConfig, BarRegistry, BarSourceConfig};
pub use scheduler::build_scheduler;

pub const CRATE_NAME: &str = "barops-sync";

/// Yesterday through today: the default ingestion window.
pub fn default_window(today: NaiveDate) -> DateWindow {
    DateWindow {
        start: today - ChronoDuration::days(1),
        end: today,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSyncOutcome {
    pub run: SyncRun,
    /// Absent when the run was skipped or timed out.
    pub report: Option<IngestReport>,
}

impl SourceSyncOutcome {
    pub fn skipped(&self) -> bool {
        self.run.status == RunStatus::Skipped
    }

    pub fn failure(&self) -> Option<String> {
        match self.run.status {
            RunStatus::Failed | RunStatus::TimedOut => self
                .run
                .error
                .clone()
                .or_else(|| Some(self.run.status.to_string())),
            RunStatus::Partial => self.report.as_ref()?.error.as_ref().map(|e| e.message().to_string()),
            _ => None,
        }
    }
}

/// Shared handles every entry point works through.
pub struct SyncService {
    config: SyncConfig,
    registry: Arc<BarRegistry>,
    store: Arc<dyn Store>,
    http: Arc<HttpFetcher>,
}

impl SyncService {
    pub fn new(config: SyncConfig, registry: BarRegistry, store: Arc<dyn Store>) -> Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self {
            config,
            registry: Arc::new(registry),
            store,
            http: Arc::new(http),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &BarRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn http(&self) -> &HttpFetcher {
        &self.http
    }

    pub fn processor(&self) -> Processor {
        Processor::new(self.store.clone(), self.config.insert_chunk)
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(
            self.store.clone(),
            self.registry.clone(),
            self.config.trailing_periods,
        )
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.http.clone(),
            self.config.dispatch_base_url.clone(),
            self.config.service_token.clone(),
        )
    }

    pub async fn drain(&self) -> DrainReport {
        self.processor()
            .drain(self.config.process_batch, self.config.drain_max_rounds)
            .await
    }

    /// Ingest one configured source of one bar for `window`.
    pub async fn sync_source(
        &self,
        bar_id: BarId,
        source_system: &str,
        window: DateWindow,
    ) -> Result<SourceSyncOutcome, SyncError> {
        self.sync_source_tracked(bar_id, source_system, window, &mut None)
            .await
    }

    /// `sync_source` that keeps the pair's open run in `in_flight` while it
    /// is running, so a caller that abandons the future can still close it.
    pub(crate) async fn sync_source_tracked(
        &self,
        bar_id: BarId,
        source_system: &str,
        window: DateWindow,
        in_flight: &mut Option<SyncRun>,
    ) -> Result<SourceSyncOutcome, SyncError> {
        if !SOURCE_SYSTEMS.contains(&source_system) {
            return Err(SyncError::InvalidInput(format!("unknown source {source_system:?}")));
        }
        let source = self.registry.source(bar_id, source_system).ok_or_else(|| {
            SyncError::InvalidInput(format!(
                "source {source_system} is not enabled for bar {bar_id}"
            ))
        })?;
        let auth = source.resolve_token(|var| std::env::var(var).ok())?;
        let adapter = adapter_for_source(source_system, source.endpoint.clone())
            .ok_or_else(|| SyncError::InvalidInput(format!("unknown source {source_system:?}")))?;
        self.ingest_tracked(adapter.as_ref(), bar_id, window, auth, in_flight)
            .await
    }

    /// Ingest through `adapter` under a `SyncRun`. A second run for the same
    /// source, bar and window is skipped while the first is still running.
    pub async fn run_ingest(
        &self,
        adapter: &dyn SourceAdapter,
        bar_id: BarId,
        window: DateWindow,
        auth: Option<String>,
    ) -> Result<SourceSyncOutcome, SyncError> {
        self.ingest_tracked(adapter, bar_id, window, auth, &mut None)
            .await
    }

    async fn ingest_tracked(
        &self,
        adapter: &dyn SourceAdapter,
        bar_id: BarId,
        window: DateWindow,
        auth: Option<String>,
        in_flight: &mut Option<SyncRun>,
    ) -> Result<SourceSyncOutcome, SyncError> {
        let mut run = SyncRun::start(adapter.source_system(), Some(bar_id), window);
        if !self
            .store
            .try_begin_run(&run, self.config.stale_after())
            .await?
        {
            info!(bar_id, source_system = adapter.source_system(), %window, "ingestion already running; skipping");
            run.finish(
                RunStatus::Skipped,
                Some("another run for this source, bar and window is in progress".into()),
            );
            self.store.save_run(&run).await?;
            return Ok(SourceSyncOutcome { run, report: None });
        }

        *in_flight = Some(run.clone());

        let ctx = AdapterContext {
            run_id: run.id,
            bar_id,
            window,
            auth,
        };
        let options = IngestOptions {
            inter_page_delay: self.config.page_delay(),
            max_pages: self.config.max_pages,
        };
        let timeout = self.config.pair_timeout();
        let result = tokio::time::timeout(
            timeout,
            ingest(adapter, &self.http, self.store.as_ref(), &ctx, &options),
        )
        .await;

        let report = match result {
            Ok(report) => {
                run.counts.collected = report.collected;
                run.counts.inserted = report.inserted;
                run.counts.updated = report.updated;
                let status = match (&report.error, report.collected) {
                    (None, _) if report.hit_page_ceiling => RunStatus::Partial,
                    (None, _) => RunStatus::Succeeded,
                    (Some(_), 0) => RunStatus::Failed,
                    (Some(_), _) => RunStatus::Partial,
                };
                if report.error.is_some() {
                    run.counts.errors = 1;
                }
                run.finish(status, report.error.as_ref().map(|e| e.message().to_string()));
                Some(report)
            }
            Err(_) => {
                warn!(bar_id, source_system = adapter.source_system(), "ingestion timed out");
                run.counts.errors = 1;
                run.finish(
                    RunStatus::TimedOut,
                    Some(format!("ingestion exceeded {}s", timeout.as_secs())),
                );
                None
            }
        };
        let saved = self.store.save_run(&run).await;
        *in_flight = None;
        saved?;
        Ok(SourceSyncOutcome { run, report })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use barops_storage::MemoryStore;

    pub fn config() -> SyncConfig {
        SyncConfig {
            page_delay_ms: 0,
            ..SyncConfig::default()
        }
    }

    pub fn service(yaml: &str, store: Arc<MemoryStore>) -> SyncService {
        service_with(config(), yaml, store)
    }

    pub fn service_with(config: SyncConfig, yaml: &str, store: Arc<MemoryStore>) -> SyncService {
        let registry = BarRegistry::from_yaml_str(yaml).unwrap();
        SyncService::new(config, registry, store).unwrap()
    }

    pub fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        )
        .unwrap()
    }
}
