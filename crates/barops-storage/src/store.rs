use async_trait::async_trait;
use barops_core::{
    BarId, DirtyPeriod, NewRawRecord, NormalizedRecord, PeriodSummary, RawRecord, SummaryOverride,
    SyncError, SyncRun,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Unavailable(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RawUpsertStats {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl RawUpsertStats {
    pub fn merge(&mut self, other: RawUpsertStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash of the compact JSON rendering. `serde_json` maps keep keys sorted,
/// so equal payloads hash equally regardless of source key order.
pub fn payload_hash(payload: &serde_json::Value) -> String {
    sha256_hex(payload.to_string().as_bytes())
}

/// The version of a raw record a processor read: its id plus the payload hash
/// at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVersion {
    pub id: Uuid,
    pub payload_hash: String,
}

impl From<&RawRecord> for RawVersion {
    fn from(raw: &RawRecord) -> Self {
        Self {
            id: raw.id,
            payload_hash: raw.payload_hash.clone(),
        }
    }
}

pub fn dedup_key(record: &NewRawRecord, hash: &str) -> String {
    record
        .external_id
        .clone()
        .unwrap_or_else(|| hash.to_string())
}

/// Persistence boundary for the whole pipeline.
///
/// Raw records upsert by `(source_system, bar_id, business_date, dedup_key)`:
/// a changed payload replaces the stored one and re-queues it for
/// normalization, an identical payload is a no-op. Normalized rows upsert by
/// `(source_system, bar_id, natural_key)` and mark their `(bar_id, period_key)`
/// dirty.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_raw(&self, records: &[NewRawRecord]) -> Result<RawUpsertStats, StoreError>;

    /// Oldest unprocessed raw records first.
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError>;

    async fn list_raw(&self, bar_id: BarId) -> Result<Vec<RawRecord>, StoreError>;

    /// Flags the given versions processed. A record whose payload was replaced
    /// since it was read no longer matches its hash and stays queued. Returns
    /// how many records were flagged.
    async fn mark_processed(
        &self,
        versions: &[RawVersion],
        error: Option<&str>,
    ) -> Result<u64, StoreError>;

    async fn upsert_normalized(&self, rows: &[NormalizedRecord]) -> Result<u64, StoreError>;

    async fn count_normalized(&self, bar_id: BarId) -> Result<u64, StoreError>;

    /// Rows with `business_date` in `[start, end]`, in a stable order.
    async fn normalized_in_range(
        &self,
        bar_id: BarId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NormalizedRecord>, StoreError>;

    async fn known_bars(&self) -> Result<Vec<BarId>, StoreError>;

    async fn upsert_summary(&self, summary: &PeriodSummary) -> Result<(), StoreError>;

    async fn get_summary(
        &self,
        bar_id: BarId,
        period_key: &str,
    ) -> Result<Option<PeriodSummary>, StoreError>;

    /// Newest period first.
    async fn list_summaries(
        &self,
        bar_id: BarId,
        limit: usize,
    ) -> Result<Vec<PeriodSummary>, StoreError>;

    /// Write the overridden summary and its audit row together.
    async fn apply_override(
        &self,
        summary: &PeriodSummary,
        audit: &SummaryOverride,
    ) -> Result<(), StoreError>;

    async fn list_overrides(
        &self,
        bar_id: BarId,
        period_key: &str,
    ) -> Result<Vec<SummaryOverride>, StoreError>;

    async fn dirty_periods(
        &self,
        bar_ids: Option<&[BarId]>,
        limit: usize,
    ) -> Result<Vec<DirtyPeriod>, StoreError>;

    /// Clears the mark unless it was refreshed after `marked_before`.
    async fn clear_dirty(
        &self,
        bar_id: BarId,
        period_key: &str,
        marked_before: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Registers `run` unless another run for the same target, bar and window
    /// is still running and younger than `stale_after`.
    async fn try_begin_run(&self, run: &SyncRun, stale_after: Duration) -> Result<bool, StoreError>;

    async fn save_run(&self, run: &SyncRun) -> Result<(), StoreError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<SyncRun>, StoreError>;

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError>;

    /// Time-boxed lease; re-acquiring a lease you already hold extends it.
    async fn acquire_lease(&self, name: &str, holder: Uuid, ttl: Duration)
        -> Result<bool, StoreError>;

    async fn release_lease(&self, name: &str, holder: Uuid) -> Result<(), StoreError>;
}
