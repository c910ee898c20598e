use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, Int64Array, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use barops_core::{BarId, PeriodSummary, SyncRun};
use barops_storage::Store;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<ExportManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportManifestFile {
    pub name: String,
    pub path: String,
    pub rows: usize,
    pub sha256: String,
    pub bytes: u64,
}

/// Write stored period summaries for `bars` and the most recent sync runs to
/// Parquet under `out_dir`, plus a `manifest.json` with file checksums.
pub async fn export_snapshot(
    store: &dyn Store,
    bars: &[BarId],
    periods_per_bar: usize,
    run_limit: usize,
    out_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut summaries = Vec::new();
    for bar_id in bars {
        let mut rows = store
            .list_summaries(*bar_id, periods_per_bar)
            .await
            .with_context(|| format!("loading summaries for bar {bar_id}"))?;
        summaries.append(&mut rows);
    }
    let runs = store
        .recent_runs(run_limit)
        .await
        .context("loading recent sync runs")?;

    let summaries_path = out_dir.join("period_summaries.parquet");
    let runs_path = out_dir.join("sync_runs.parquet");
    write_summaries_parquet(&summaries_path, &summaries)?;
    write_runs_parquet(&runs_path, &runs)?;

    let manifest = ExportManifest {
        schema_version: 1,
        generated_at: Utc::now(),
        files: vec![
            manifest_entry("period_summaries", out_dir, &summaries_path, summaries.len())?,
            manifest_entry("sync_runs", out_dir, &runs_path, runs.len())?,
        ],
    };

    let manifest_path = out_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing export manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    info!(
        summaries = summaries.len(),
        runs = runs.len(),
        manifest = %manifest_path.display(),
        "export written"
    );
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_summaries_parquet(path: &Path, summaries: &[PeriodSummary]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("bar_id", DataType::Int64, false),
        ArrowField::new("period_key", DataType::Utf8, false),
        ArrowField::new("period_start", DataType::Utf8, false),
        ArrowField::new("period_end", DataType::Utf8, false),
        ArrowField::new("net_revenue", DataType::Float64, false),
        ArrowField::new("consumption", DataType::Float64, false),
        ArrowField::new("labor_cost", DataType::Float64, false),
        ArrowField::new("cmv_pct", DataType::Float64, true),
        ArrowField::new("cmo_pct", DataType::Float64, true),
        ArrowField::new("ticket_count", DataType::UInt32, false),
        ArrowField::new("review_count", DataType::UInt32, false),
        ArrowField::new("avg_rating", DataType::Float64, true),
        ArrowField::new("computed_at", DataType::Utf8, false),
    ]));

    let bar_ids = Int64Array::from(summaries.iter().map(|s| s.bar_id).collect::<Vec<_>>());
    let keys = StringArray::from(
        summaries
            .iter()
            .map(|s| Some(s.period_key.as_str()))
            .collect::<Vec<_>>(),
    );
    let starts = StringArray::from(
        summaries
            .iter()
            .map(|s| s.period_start.to_string())
            .collect::<Vec<_>>(),
    );
    let ends = StringArray::from(
        summaries
            .iter()
            .map(|s| s.period_end.to_string())
            .collect::<Vec<_>>(),
    );
    let revenue = Float64Array::from(summaries.iter().map(|s| s.net_revenue).collect::<Vec<_>>());
    let consumption = Float64Array::from(summaries.iter().map(|s| s.consumption).collect::<Vec<_>>());
    let labor = Float64Array::from(summaries.iter().map(|s| s.labor_cost).collect::<Vec<_>>());
    let cmv = Float64Array::from(summaries.iter().map(|s| s.cmv_pct).collect::<Vec<_>>());
    let cmo = Float64Array::from(summaries.iter().map(|s| s.cmo_pct).collect::<Vec<_>>());
    let tickets = UInt32Array::from(summaries.iter().map(|s| s.ticket_count).collect::<Vec<_>>());
    let reviews = UInt32Array::from(summaries.iter().map(|s| s.review_count).collect::<Vec<_>>());
    let ratings = Float64Array::from(summaries.iter().map(|s| s.avg_rating).collect::<Vec<_>>());
    let computed = StringArray::from(
        summaries
            .iter()
            .map(|s| s.computed_at.to_rfc3339())
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(bar_ids),
            Arc::new(keys),
            Arc::new(starts),
            Arc::new(ends),
            Arc::new(revenue),
            Arc::new(consumption),
            Arc::new(labor),
            Arc::new(cmv),
            Arc::new(cmo),
            Arc::new(tickets),
            Arc::new(reviews),
            Arc::new(ratings),
            Arc::new(computed),
        ],
    )
    .context("building period summaries record batch")?;
    write_parquet(path, batch)
}

fn write_runs_parquet(path: &Path, runs: &[SyncRun]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("run_id", DataType::Utf8, false),
        ArrowField::new("target", DataType::Utf8, false),
        ArrowField::new("bar_id", DataType::Int64, true),
        ArrowField::new("window", DataType::Utf8, false),
        ArrowField::new("status", DataType::Utf8, false),
        ArrowField::new("collected", DataType::UInt64, false),
        ArrowField::new("errors", DataType::UInt64, false),
        ArrowField::new("started_at", DataType::Utf8, false),
        ArrowField::new("finished_at", DataType::Utf8, true),
        ArrowField::new("error", DataType::Utf8, true),
    ]));

    let ids = StringArray::from(runs.iter().map(|r| r.id.to_string()).collect::<Vec<_>>());
    let targets = StringArray::from(
        runs.iter()
            .map(|r| Some(r.target.as_str()))
            .collect::<Vec<_>>(),
    );
    let bar_ids = Int64Array::from(runs.iter().map(|r| r.bar_id).collect::<Vec<_>>());
    let windows = StringArray::from(runs.iter().map(|r| r.window.to_string()).collect::<Vec<_>>());
    let statuses = StringArray::from(
        runs.iter()
            .map(|r| Some(r.status.as_str()))
            .collect::<Vec<_>>(),
    );
    let collected = UInt64Array::from(runs.iter().map(|r| r.counts.collected).collect::<Vec<_>>());
    let errors = UInt64Array::from(runs.iter().map(|r| r.counts.errors).collect::<Vec<_>>());
    let started = StringArray::from(
        runs.iter()
            .map(|r| r.started_at.to_rfc3339())
            .collect::<Vec<_>>(),
    );
    let finished = StringArray::from(
        runs.iter()
            .map(|r| r.finished_at.map(|t| t.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let messages = StringArray::from(
        runs.iter()
            .map(|r| r.error.as_deref())
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(targets),
            Arc::new(bar_ids),
            Arc::new(windows),
            Arc::new(statuses),
            Arc::new(collected),
            Arc::new(errors),
            Arc::new(started),
            Arc::new(finished),
            Arc::new(messages),
        ],
    )
    .context("building sync runs record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, root: &Path, path: &Path, rows: usize) -> Result<ExportManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ExportManifestFile {
        name: name.to_string(),
        path: rel,
        rows,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use barops_core::{DateWindow, RunStatus};
    use barops_storage::MemoryStore;
    use chrono::NaiveDate;

    fn summary(bar_id: BarId, key: &str) -> PeriodSummary {
        PeriodSummary {
            bar_id,
            period_key: key.into(),
            period_start: NaiveDate::from_ymd_opt(2026, 10, 12).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            net_revenue: 1000.0,
            sales_revenue: 800.0,
            ticket_revenue: 200.0,
            consumption: 320.0,
            labor_cost: 250.0,
            cmv_pct: Some(32.0),
            cmo_pct: Some(25.0),
            ticket_count: 10,
            checked_in_count: 8,
            review_count: 0,
            avg_rating: None,
            computed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_parquet_files_and_checksummed_manifest() {
        let store = MemoryStore::new();
        store.upsert_summary(&summary(1, "2026-W42")).await.unwrap();
        store.upsert_summary(&summary(2, "2026-W42")).await.unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let mut run = SyncRun::start("pos", Some(1), DateWindow::single_day(day));
        run.finish(RunStatus::Succeeded, None);
        store.save_run(&run).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("export");
        let manifest_path = export_snapshot(&store, &[1, 2], 10, 50, &out).await.unwrap();

        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        let files = manifest["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["path"], "period_summaries.parquet");
        assert_eq!(files[0]["rows"], 2);
        assert_eq!(files[1]["rows"], 1);

        let written = std::fs::read(out.join("period_summaries.parquet")).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&written);
        assert_eq!(files[0]["sha256"], hex::encode(hasher.finalize()));
        assert_eq!(files[0]["bytes"], written.len() as u64);
    }

    #[tokio::test]
    async fn empty_store_still_produces_a_manifest() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = export_snapshot(&store, &[], 10, 10, dir.path()).await.unwrap();
        assert!(manifest_path.exists());
        assert!(dir.path().join("sync_runs.parquet").exists());
    }
}
