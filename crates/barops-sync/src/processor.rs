use std::sync::Arc;

use barops_adapters::normalize_raw;
use barops_core::NormalizedRecord;
use barops_storage::{RawVersion, Store};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub selected: u64,
    pub normalized_rows: u64,
    pub processed: u64,
    pub poisoned: u64,
    pub errors: Vec<String>,
    /// Set when a store write failed and the batch stopped early.
    pub persistence_error: Option<String>,
}

impl ProcessReport {
    fn merge(&mut self, other: ProcessReport) {
        self.selected += other.selected;
        self.normalized_rows += other.normalized_rows;
        self.processed += other.processed;
        self.poisoned += other.poisoned;
        self.errors.extend(other.errors);
        if other.persistence_error.is_some() {
            self.persistence_error = other.persistence_error;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub rounds: usize,
    pub backlog_cleared: bool,
    pub totals: ProcessReport,
}

/// Moves landed raw records into normalized rows.
#[derive(Clone)]
pub struct Processor {
    store: Arc<dyn Store>,
    insert_chunk: usize,
}

impl Processor {
    pub fn new(store: Arc<dyn Store>, insert_chunk: usize) -> Self {
        Self {
            store,
            insert_chunk: insert_chunk.max(1),
        }
    }

    /// Normalize up to `max_records` of the oldest unprocessed raw records.
    ///
    /// A raw record is flagged processed only once every row derived from it
    /// has been written, and only if its payload is still the one that was
    /// read; a payload replaced mid-batch stays queued for the next batch.
    /// Payloads that cannot be normalized are flagged with their error so they
    /// are not picked up again.
    pub async fn process_batch(&self, max_records: usize) -> ProcessReport {
        let mut report = ProcessReport::default();
        let raws = match self.store.fetch_unprocessed(max_records).await {
            Ok(raws) => raws,
            Err(err) => {
                report.persistence_error = Some(err.to_string());
                return report;
            }
        };
        report.selected = raws.len() as u64;

        let mut rows: Vec<NormalizedRecord> = Vec::new();
        let mut owners: Vec<(RawVersion, usize)> = Vec::with_capacity(raws.len());

        for raw in &raws {
            match normalize_raw(raw) {
                Ok(drafts) => {
                    rows.extend(
                        drafts
                            .into_iter()
                            .map(|draft| NormalizedRecord::from_draft(raw, draft)),
                    );
                    owners.push((RawVersion::from(raw), rows.len()));
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(raw_id = %raw.id, source_system = %raw.source_system, error = %message, "poison raw record");
                    match self
                        .store
                        .mark_processed(&[RawVersion::from(raw)], Some(&message))
                        .await
                    {
                        Ok(0) => {}
                        Ok(_) => {
                            report.poisoned += 1;
                            report.errors.push(format!("raw {}: {message}", raw.id));
                        }
                        Err(store_err) => {
                            report.persistence_error = Some(store_err.to_string());
                            return report;
                        }
                    }
                }
            }
        }

        let mut flushed = 0usize;
        let mut next_owner = 0usize;
        let mut chunks = rows.chunks(self.insert_chunk).peekable();

        loop {
            if let Some(chunk) = chunks.next() {
                match self.store.upsert_normalized(chunk).await {
                    Ok(_) => {
                        flushed += chunk.len();
                        report.normalized_rows += chunk.len() as u64;
                    }
                    Err(err) => {
                        warn!(error = %err, flushed, "normalized upsert failed; stopping batch");
                        report.persistence_error = Some(err.to_string());
                        return report;
                    }
                }
            }

            let ready: Vec<RawVersion> = owners[next_owner..]
                .iter()
                .take_while(|(_, end)| *end <= flushed)
                .map(|(version, _)| version.clone())
                .collect();
            if !ready.is_empty() {
                match self.store.mark_processed(&ready, None).await {
                    Ok(marked) => {
                        if marked < ready.len() as u64 {
                            info!(
                                superseded = ready.len() as u64 - marked,
                                "raw payloads replaced mid-batch; left queued"
                            );
                        }
                        report.processed += marked;
                    }
                    Err(err) => {
                        report.persistence_error = Some(err.to_string());
                        return report;
                    }
                }
                next_owner += ready.len();
            }

            if chunks.peek().is_none() {
                break;
            }
        }

        info!(
            selected = report.selected,
            normalized_rows = report.normalized_rows,
            processed = report.processed,
            poisoned = report.poisoned,
            "process batch finished"
        );
        report
    }

    /// Repeat `process_batch` until the backlog is empty, a batch fails to
    /// persist, or `max_rounds` is reached.
    pub async fn drain(&self, max_records: usize, max_rounds: usize) -> DrainReport {
        let mut drain = DrainReport::default();
        while drain.rounds < max_rounds.max(1) {
            let batch = self.process_batch(max_records).await;
            drain.rounds += 1;
            let empty = batch.selected == 0;
            let failed = batch.persistence_error.is_some();
            drain.totals.merge(batch);
            if empty {
                drain.backlog_cleared = true;
                break;
            }
            if failed {
                break;
            }
        }
        drain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barops_core::NewRawRecord;
    use barops_storage::MemoryStore;
    use chrono::NaiveDate;
    use serde_json::json;

    fn sale(id: &str, qty: u32) -> NewRawRecord {
        NewRawRecord {
            source_system: "pos".into(),
            bar_id: 1,
            business_date: NaiveDate::from_ymd_opt(2026, 10, 14).unwrap(),
            external_id: Some(id.into()),
            payload: json!({"id": id, "date": "2026-10-14", "product": "Chopp", "quantity": qty, "unit_price": 10}),
        }
    }

    fn poison(id: &str) -> NewRawRecord {
        NewRawRecord {
            payload: json!({"id": id, "date": "2026-10-14", "product": "Chopp", "quantity": 1}),
            ..sale(id, 1)
        }
    }

    async fn seeded(records: &[NewRawRecord]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.upsert_raw(records).await.unwrap();
        store
    }

    #[tokio::test]
    async fn rerun_produces_no_additional_rows() {
        let store = seeded(&[sale("a", 1), sale("b", 2), sale("c", 3)]).await;
        let processor = Processor::new(store.clone(), 2);

        let first = processor.process_batch(100).await;
        assert_eq!(first.selected, 3);
        assert_eq!(first.normalized_rows, 3);
        assert_eq!(first.processed, 3);
        assert_eq!(store.count_normalized(1).await.unwrap(), 3);

        let second = processor.process_batch(100).await;
        assert_eq!(second.selected, 0);
        assert_eq!(second.normalized_rows, 0);
        assert_eq!(store.count_normalized(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn malformed_payload_is_flagged_not_retried() {
        let store = seeded(&[sale("a", 1), poison("bad")]).await;
        let processor = Processor::new(store.clone(), 500);

        let report = processor.process_batch(100).await;
        assert_eq!(report.poisoned, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.errors.len(), 1);

        let raws = store.list_raw(1).await.unwrap();
        let bad = raws.iter().find(|r| r.external_id.as_deref() == Some("bad")).unwrap();
        assert!(bad.processed);
        assert!(bad.error.as_deref().unwrap_or_default().contains("unit_price"));
        assert_eq!(processor.process_batch(100).await.selected, 0);
    }

    #[tokio::test]
    async fn persistence_failure_leaves_raws_unprocessed() {
        let store = seeded(&[sale("a", 1), sale("b", 2)]).await;
        store.set_write_failure(Some("db down"));
        let processor = Processor::new(store.clone(), 500);

        let report = processor.process_batch(100).await;
        assert!(report.persistence_error.unwrap().contains("db down"));
        assert_eq!(report.processed, 0);
        assert!(store.list_raw(1).await.unwrap().iter().all(|r| !r.processed));

        store.set_write_failure(None);
        let retry = processor.process_batch(100).await;
        assert_eq!(retry.processed, 2);
    }

    #[tokio::test]
    async fn updated_payload_is_renormalized_in_place() {
        let store = seeded(&[sale("E1", 1)]).await;
        let processor = Processor::new(store.clone(), 500);
        processor.process_batch(10).await;

        store.upsert_raw(&[sale("E1", 4)]).await.unwrap();
        let report = processor.process_batch(10).await;
        assert_eq!(report.selected, 1);
        assert_eq!(store.count_normalized(1).await.unwrap(), 1);

        let date = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
        let rows = store.normalized_in_range(1, date, date).await.unwrap();
        assert!(matches!(
            rows[0].body,
            barops_core::NormalizedBody::SaleLine { quantity, .. } if quantity == 4.0
        ));
    }

    #[tokio::test]
    async fn payload_replaced_mid_batch_is_normalized_next_batch() {
        let store = seeded(&[sale("E1", 1)]).await;
        let read = store.fetch_unprocessed(10).await.unwrap();
        store.upsert_raw(&[sale("E1", 9)]).await.unwrap();
        let versions: Vec<RawVersion> = read.iter().map(RawVersion::from).collect();
        assert_eq!(store.mark_processed(&versions, None).await.unwrap(), 0);

        let processor = Processor::new(store.clone(), 500);
        let report = processor.process_batch(10).await;
        assert_eq!(report.selected, 1);
        assert_eq!(report.processed, 1);

        let date = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
        let rows = store.normalized_in_range(1, date, date).await.unwrap();
        assert!(matches!(
            rows[0].body,
            barops_core::NormalizedBody::SaleLine { quantity, .. } if quantity == 9.0
        ));
    }

    #[tokio::test]
    async fn drain_clears_backlog_in_rounds() {
        let records: Vec<_> = (0..7).map(|i| sale(&format!("s{i}"), 1)).collect();
        let store = seeded(&records).await;
        let processor = Processor::new(store.clone(), 2);

        let drain = processor.drain(3, 10).await;
        assert!(drain.backlog_cleared);
        assert_eq!(drain.rounds, 4);
        assert_eq!(drain.totals.processed, 7);
    }
}
