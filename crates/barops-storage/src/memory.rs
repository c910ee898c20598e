//! In-process store used by tests and by the CLI when no database is configured.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use barops_core::{
    BarId, DirtyPeriod, NewRawRecord, NormalizedRecord, PeriodSummary, RawRecord, RunStatus,
    SummaryOverride, SyncRun,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{dedup_key, payload_hash, RawUpsertStats, RawVersion, Store, StoreError};

type RawKey = (String, BarId, NaiveDate, String);
type NormalizedKey = (String, BarId, String);

#[derive(Debug, Default)]
struct MemoryState {
    raw: Vec<RawRecord>,
    raw_index: HashMap<RawKey, usize>,
    normalized: BTreeMap<NormalizedKey, NormalizedRecord>,
    summaries: BTreeMap<(BarId, String), PeriodSummary>,
    overrides: Vec<SummaryOverride>,
    dirty: BTreeMap<(BarId, String), DateTime<Utc>>,
    runs: Vec<SyncRun>,
    leases: HashMap<String, (Uuid, DateTime<Utc>)>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    write_failure: StdMutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent raw, normalized or summary write fail with
    /// `message` until cleared with `None`.
    pub fn set_write_failure(&self, message: Option<&str>) {
        if let Ok(mut slot) = self.write_failure.lock() {
            *slot = message.map(ToString::to_string);
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        match self.write_failure.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(message) => Err(StoreError::Unavailable(message.clone())),
                None => Ok(()),
            },
            Err(_) => Err(StoreError::Unavailable("store lock poisoned".into())),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_raw(&self, records: &[NewRawRecord]) -> Result<RawUpsertStats, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let mut stats = RawUpsertStats::default();
        let now = Utc::now();

        for record in records {
            let hash = payload_hash(&record.payload);
            let key = (
                record.source_system.clone(),
                record.bar_id,
                record.business_date,
                dedup_key(record, &hash),
            );

            let existing_idx = state.raw_index.get(&key).copied();
            if let Some(idx) = existing_idx {
                let existing = &mut state.raw[idx];
                if existing.payload_hash == hash {
                    stats.unchanged += 1;
                } else {
                    existing.payload = record.payload.clone();
                    existing.payload_hash = hash;
                    existing.received_at = now;
                    existing.processed = false;
                    existing.processed_at = None;
                    existing.error = None;
                    stats.updated += 1;
                }
                continue;
            }

            let idx = state.raw.len();
            state.raw.push(RawRecord {
                id: Uuid::new_v4(),
                source_system: record.source_system.clone(),
                bar_id: record.bar_id,
                business_date: record.business_date,
                external_id: record.external_id.clone(),
                payload_hash: hash,
                payload: record.payload.clone(),
                received_at: now,
                processed: false,
                processed_at: None,
                error: None,
            });
            state.raw_index.insert(key, idx);
            stats.inserted += 1;
        }

        Ok(stats)
    }

    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<(usize, &RawRecord)> = state
            .raw
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.processed)
            .collect();
        pending.sort_by(|(ia, a), (ib, b)| a.received_at.cmp(&b.received_at).then(ia.cmp(ib)));
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn list_raw(&self, bar_id: BarId) -> Result<Vec<RawRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .raw
            .iter()
            .filter(|r| r.bar_id == bar_id)
            .cloned()
            .collect())
    }

    async fn mark_processed(
        &self,
        versions: &[RawVersion],
        error: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut marked = 0;
        for record in state.raw.iter_mut().filter(|r| {
            versions
                .iter()
                .any(|v| v.id == r.id && v.payload_hash == r.payload_hash)
        }) {
            record.processed = true;
            record.processed_at = Some(now);
            record.error = error.map(ToString::to_string);
            marked += 1;
        }
        Ok(marked)
    }

    async fn upsert_normalized(&self, rows: &[NormalizedRecord]) -> Result<u64, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();
        for row in rows {
            let key = (row.source_system.clone(), row.bar_id, row.natural_key.clone());
            if let Some(previous) = state.normalized.insert(key, row.clone()) {
                if previous.period_key != row.period_key {
                    state.dirty.insert((previous.bar_id, previous.period_key), now);
                }
            }
            state.dirty.insert((row.bar_id, row.period_key.clone()), now);
        }
        Ok(rows.len() as u64)
    }

    async fn count_normalized(&self, bar_id: BarId) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.normalized.values().filter(|r| r.bar_id == bar_id).count() as u64)
    }

    async fn normalized_in_range(
        &self,
        bar_id: BarId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NormalizedRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<NormalizedRecord> = state
            .normalized
            .values()
            .filter(|r| r.bar_id == bar_id && r.business_date >= start && r.business_date <= end)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.business_date
                .cmp(&b.business_date)
                .then_with(|| a.source_system.cmp(&b.source_system))
                .then_with(|| a.natural_key.cmp(&b.natural_key))
        });
        Ok(rows)
    }

    async fn known_bars(&self) -> Result<Vec<BarId>, StoreError> {
        let state = self.state.lock().await;
        let mut bars: Vec<BarId> = state.raw.iter().map(|r| r.bar_id).collect();
        bars.extend(state.summaries.keys().map(|(bar_id, _)| *bar_id));
        bars.sort_unstable();
        bars.dedup();
        Ok(bars)
    }

    async fn upsert_summary(&self, summary: &PeriodSummary) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        state.summaries.insert(
            (summary.bar_id, summary.period_key.clone()),
            summary.clone(),
        );
        Ok(())
    }

    async fn get_summary(
        &self,
        bar_id: BarId,
        period_key: &str,
    ) -> Result<Option<PeriodSummary>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.summaries.get(&(bar_id, period_key.to_string())).cloned())
    }

    async fn list_summaries(
        &self,
        bar_id: BarId,
        limit: usize,
    ) -> Result<Vec<PeriodSummary>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<PeriodSummary> = state
            .summaries
            .values()
            .filter(|s| s.bar_id == bar_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn apply_override(
        &self,
        summary: &PeriodSummary,
        audit: &SummaryOverride,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        state.summaries.insert(
            (summary.bar_id, summary.period_key.clone()),
            summary.clone(),
        );
        state.overrides.push(audit.clone());
        Ok(())
    }

    async fn list_overrides(
        &self,
        bar_id: BarId,
        period_key: &str,
    ) -> Result<Vec<SummaryOverride>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .overrides
            .iter()
            .filter(|o| o.bar_id == bar_id && o.period_key == period_key)
            .cloned()
            .collect())
    }

    async fn dirty_periods(
        &self,
        bar_ids: Option<&[BarId]>,
        limit: usize,
    ) -> Result<Vec<DirtyPeriod>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<DirtyPeriod> = state
            .dirty
            .iter()
            .filter(|((bar_id, _), _)| bar_ids.map_or(true, |ids| ids.contains(bar_id)))
            .map(|((bar_id, period_key), marked_at)| DirtyPeriod {
                bar_id: *bar_id,
                period_key: period_key.clone(),
                marked_at: *marked_at,
            })
            .collect();
        rows.sort_by(|a, b| a.marked_at.cmp(&b.marked_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn clear_dirty(
        &self,
        bar_id: BarId,
        period_key: &str,
        marked_before: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let key = (bar_id, period_key.to_string());
        if state.dirty.get(&key).is_some_and(|marked_at| *marked_at <= marked_before) {
            state.dirty.remove(&key);
        }
        Ok(())
    }

    async fn try_begin_run(&self, run: &SyncRun, stale_after: Duration) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut blocked = false;
        for existing in state.runs.iter_mut().filter(|r| {
            r.status == RunStatus::Running
                && r.target == run.target
                && r.bar_id == run.bar_id
                && r.window == run.window
        }) {
            if now - existing.started_at > stale_after {
                existing.finish(RunStatus::TimedOut, Some("stale running run superseded".into()));
            } else {
                blocked = true;
            }
        }
        if blocked {
            return Ok(false);
        }
        state.runs.push(run.clone());
        Ok(true)
    }

    async fn save_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => state.runs.push(run.clone()),
        }
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<SyncRun>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().rev().take(limit).cloned().collect())
    }

    async fn acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if let Some((current, expires_at)) = state.leases.get(name) {
            if *current != holder && *expires_at > now {
                return Ok(false);
            }
        }
        state.leases.insert(name.to_string(), (holder, now + ttl));
        Ok(true)
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.leases.get(name).is_some_and(|(current, _)| *current == holder) {
            state.leases.remove(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barops_core::{DateWindow, NormalizedBody};
    use serde_json::json;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
    }

    fn raw(external_id: Option<&str>, payload: serde_json::Value) -> NewRawRecord {
        NewRawRecord {
            source_system: "pos".into(),
            bar_id: 3,
            business_date: date(12),
            external_id: external_id.map(ToString::to_string),
            payload,
        }
    }

    #[tokio::test]
    async fn later_payload_replaces_same_external_id() {
        let store = MemoryStore::new();
        let first = store.upsert_raw(&[raw(Some("E1"), json!({"total": 10}))]).await.unwrap();
        let second = store.upsert_raw(&[raw(Some("E1"), json!({"total": 12}))]).await.unwrap();

        assert_eq!(first.inserted, 1);
        assert_eq!(second.updated, 1);
        let rows = store.list_raw(3).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload, json!({"total": 12}));
        assert!(!rows[0].processed);
    }

    #[tokio::test]
    async fn identical_payload_is_a_no_op_and_keeps_processed_flag() {
        let store = MemoryStore::new();
        store.upsert_raw(&[raw(Some("E1"), json!({"total": 10}))]).await.unwrap();
        let version = RawVersion::from(&store.list_raw(3).await.unwrap()[0]);
        store.mark_processed(&[version], None).await.unwrap();

        let stats = store.upsert_raw(&[raw(Some("E1"), json!({"total": 10}))]).await.unwrap();
        assert_eq!(stats.unchanged, 1);
        assert!(store.list_raw(3).await.unwrap()[0].processed);
        assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn payload_replaced_after_read_stays_queued() {
        let store = MemoryStore::new();
        store.upsert_raw(&[raw(Some("E1"), json!({"total": 10}))]).await.unwrap();
        let read = store.fetch_unprocessed(10).await.unwrap();
        store.upsert_raw(&[raw(Some("E1"), json!({"total": 99}))]).await.unwrap();

        let versions: Vec<RawVersion> = read.iter().map(RawVersion::from).collect();
        assert_eq!(store.mark_processed(&versions, None).await.unwrap(), 0);

        let pending = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, json!({"total": 99}));
    }

    #[tokio::test]
    async fn records_without_external_id_key_on_payload_hash() {
        let store = MemoryStore::new();
        let stats = store
            .upsert_raw(&[
                raw(None, json!({"row": ["2026-10-12", "cmv", "ice", 40]})),
                raw(None, json!({"row": ["2026-10-12", "cmv", "lime", 15]})),
                raw(None, json!({"row": ["2026-10-12", "cmv", "ice", 40]})),
            ])
            .await
            .unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.unchanged, 1);
    }

    #[tokio::test]
    async fn unprocessed_are_returned_oldest_first_and_limited() {
        let store = MemoryStore::new();
        for n in 0..5 {
            store
                .upsert_raw(&[raw(Some(&format!("E{n}")), json!({"n": n}))])
                .await
                .unwrap();
        }
        let batch = store.fetch_unprocessed(3).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|r| r.external_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["E0", "E1", "E2"]);
    }

    #[tokio::test]
    async fn normalized_upsert_marks_period_dirty_and_clear_respects_remarks() {
        let store = MemoryStore::new();
        store.upsert_raw(&[raw(Some("E1"), json!({}))]).await.unwrap();
        let raw = store.list_raw(3).await.unwrap().remove(0);
        let row = NormalizedRecord {
            raw_id: raw.id,
            source_system: "pos".into(),
            bar_id: 3,
            natural_key: "E1:0".into(),
            business_date: date(12),
            period_key: "2026-W42".into(),
            body: NormalizedBody::SaleLine {
                product: "IPA".into(),
                quantity: 1.0,
                gross: 20.0,
                discount: 0.0,
                net: 20.0,
            },
        };
        store.upsert_normalized(&[row.clone()]).await.unwrap();
        store.upsert_normalized(&[row]).await.unwrap();
        assert_eq!(store.count_normalized(3).await.unwrap(), 1);

        let dirty = store.dirty_periods(None, 10).await.unwrap();
        assert_eq!(dirty.len(), 1);
        let before_mark = dirty[0].marked_at - Duration::seconds(1);
        store.clear_dirty(3, "2026-W42", before_mark).await.unwrap();
        assert_eq!(store.dirty_periods(Some(&[3]), 10).await.unwrap().len(), 1);
        store.clear_dirty(3, "2026-W42", Utc::now()).await.unwrap();
        assert!(store.dirty_periods(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn row_moving_to_another_week_dirties_both_weeks() {
        let store = MemoryStore::new();
        let mut row = NormalizedRecord {
            raw_id: Uuid::new_v4(),
            source_system: "pos".into(),
            bar_id: 3,
            natural_key: "E1".into(),
            business_date: date(9),
            period_key: "2026-W41".into(),
            body: NormalizedBody::SaleLine {
                product: "IPA".into(),
                quantity: 1.0,
                gross: 20.0,
                discount: 0.0,
                net: 20.0,
            },
        };
        store.upsert_normalized(&[row.clone()]).await.unwrap();
        store.clear_dirty(3, "2026-W41", Utc::now()).await.unwrap();

        row.business_date = date(13);
        row.period_key = "2026-W42".into();
        store.upsert_normalized(&[row]).await.unwrap();

        let mut keys: Vec<String> = store
            .dirty_periods(None, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.period_key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["2026-W41", "2026-W42"]);
    }

    #[tokio::test]
    async fn concurrent_run_for_same_key_is_rejected_until_stale() {
        let store = MemoryStore::new();
        let window = DateWindow::single_day(date(12));
        let first = SyncRun::start("pos", Some(3), window);
        let second = SyncRun::start("pos", Some(3), window);
        let other_bar = SyncRun::start("pos", Some(4), window);

        assert!(store.try_begin_run(&first, Duration::hours(2)).await.unwrap());
        assert!(!store.try_begin_run(&second, Duration::hours(2)).await.unwrap());
        assert!(store.try_begin_run(&other_bar, Duration::hours(2)).await.unwrap());
        assert!(store.try_begin_run(&second, Duration::seconds(-1)).await.unwrap());
        let superseded = store.get_run(first.id).await.unwrap().unwrap();
        assert_eq!(superseded.status, RunStatus::TimedOut);
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released_or_expired() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(store.acquire_lease("daily", a, Duration::hours(1)).await.unwrap());
        assert!(!store.acquire_lease("daily", b, Duration::hours(1)).await.unwrap());
        store.release_lease("daily", b).await.unwrap();
        assert!(!store.acquire_lease("daily", b, Duration::hours(1)).await.unwrap());
        store.release_lease("daily", a).await.unwrap();
        assert!(store.acquire_lease("daily", b, Duration::seconds(-1)).await.unwrap());
        assert!(store.acquire_lease("daily", a, Duration::hours(1)).await.unwrap());
    }

    #[tokio::test]
    async fn write_failure_hook_blocks_normalized_writes() {
        let store = MemoryStore::new();
        store.set_write_failure(Some("disk full"));
        let err = store.upsert_normalized(&[]).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        store.set_write_failure(None);
        assert_eq!(store.upsert_normalized(&[]).await.unwrap(), 0);
    }
}
