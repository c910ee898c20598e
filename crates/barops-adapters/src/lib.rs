//! Source adapter contracts, the paginated ingestion driver and the concrete
//! HTTP adapters.

use std::time::Duration;

use async_trait::async_trait;
use barops_core::{BarId, DateWindow, NewRawRecord, SyncError};
use barops_storage::{FetchError, HttpFetcher, RawUpsertStats, Store, StoreError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

mod sources;

pub use sources::{
    adapter_for_source, normalize_raw, parse_amount, parse_business_date, AccountingAdapter,
    PosAdapter, ReviewsAdapter, SheetsAdapter, SourceEndpoint, TicketingAdapter,
    ACCOUNTING_SOURCE, POS_SOURCE, REVIEWS_SOURCE, SHEETS_SOURCE, SOURCE_SYSTEMS,
    TICKETING_SOURCE,
};

pub const CRATE_NAME: &str = "barops-adapters";

/// Position in a source's pagination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cursor {
    Start,
    Page(u32),
    Token(String),
}

impl Cursor {
    /// One-based page number for page-number sources.
    pub fn page_number(&self) -> u32 {
        match self {
            Cursor::Page(n) => *n,
            _ => 1,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Cursor::Token(token) => Some(token),
            _ => None,
        }
    }
}

/// One record as returned by a source, before landing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub external_id: Option<String>,
    pub business_date: NaiveDate,
    pub payload: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<SourceRecord>,
    pub next: Option<Cursor>,
    /// Items on the page that could not be turned into a record.
    #[serde(default)]
    pub skipped: u64,
}

impl Page {
    pub fn new(records: Vec<SourceRecord>, next: Option<Cursor>) -> Self {
        Self {
            records,
            next,
            skipped: 0,
        }
    }

    pub fn last(records: Vec<SourceRecord>) -> Self {
        Self::new(records, None)
    }

    pub fn with_skipped(mut self, skipped: u64) -> Self {
        self.skipped = skipped;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub bar_id: BarId,
    pub window: DateWindow,
    /// Bearer token for the source API.
    pub auth: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("no adapter registered for source {0:?}")]
    UnknownSource(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn malformed(message: impl Into<String>) -> Self {
        AdapterError::Malformed(message.into())
    }
}

impl From<AdapterError> for SyncError {
    fn from(err: AdapterError) -> Self {
        SyncError::Upstream(err.to_string())
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_system(&self) -> &'static str;

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        cursor: &Cursor,
    ) -> Result<Page, AdapterError>;
}

/// Next cursor for page-number pagination: a short page ends the sequence.
pub fn next_page_number(current: u32, returned: usize, page_size: u32) -> Option<Cursor> {
    if page_size == 0 || returned < page_size as usize {
        None
    } else {
        Some(Cursor::Page(current + 1))
    }
}

/// Next cursor for token pagination: an absent or empty token ends it.
pub fn next_token(token: Option<String>) -> Option<Cursor> {
    token
        .filter(|t| !t.trim().is_empty())
        .map(Cursor::Token)
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub inter_page_delay: Duration,
    pub max_pages: u32,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            inter_page_delay: Duration::from_millis(250),
            max_pages: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum IngestFailure {
    Upstream(String),
    Persistence(String),
}

impl IngestFailure {
    pub fn message(&self) -> &str {
        match self {
            IngestFailure::Upstream(message) | IngestFailure::Persistence(message) => message,
        }
    }
}

impl From<IngestFailure> for SyncError {
    fn from(failure: IngestFailure) -> Self {
        match failure {
            IngestFailure::Upstream(message) => SyncError::Upstream(message),
            IngestFailure::Persistence(message) => SyncError::Persistence(message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub source_system: String,
    pub bar_id: BarId,
    pub pages: u32,
    pub collected: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Malformed items dropped before landing; their siblings still land.
    pub skipped: u64,
    pub hit_page_ceiling: bool,
    pub error: Option<IngestFailure>,
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn absorb(&mut self, stats: RawUpsertStats) {
        self.inserted += stats.inserted;
        self.updated += stats.updated;
        self.unchanged += stats.unchanged;
    }
}

fn to_raw(source_system: &str, bar_id: BarId, record: SourceRecord) -> NewRawRecord {
    NewRawRecord {
        source_system: source_system.to_string(),
        bar_id,
        business_date: record.business_date,
        external_id: record.external_id,
        payload: record.payload,
    }
}

/// Walk a source's pagination for `ctx.window`, landing every page in the
/// raw store as soon as it arrives.
///
/// Stops at the end of pagination or after `options.max_pages` pages. A
/// fetch or parse failure aborts the remaining pages; records already landed
/// stay and the report carries the failure.
pub async fn ingest(
    adapter: &dyn SourceAdapter,
    http: &HttpFetcher,
    store: &dyn Store,
    ctx: &AdapterContext,
    options: &IngestOptions,
) -> IngestReport {
    let source_system = adapter.source_system();
    let span = info_span!(
        "ingest",
        run_id = %ctx.run_id,
        source_system,
        bar_id = ctx.bar_id,
        window = %ctx.window
    );
    ingest_inner(adapter, http, store, ctx, options)
        .instrument(span)
        .await
}

async fn ingest_inner(
    adapter: &dyn SourceAdapter,
    http: &HttpFetcher,
    store: &dyn Store,
    ctx: &AdapterContext,
    options: &IngestOptions,
) -> IngestReport {
    let source_system = adapter.source_system();
    let mut report = IngestReport {
        source_system: source_system.to_string(),
        bar_id: ctx.bar_id,
        ..IngestReport::default()
    };
    let mut cursor = Cursor::Start;

    loop {
        if report.pages >= options.max_pages {
            report.hit_page_ceiling = true;
            warn!(max_pages = options.max_pages, "page ceiling reached before end of pagination");
            break;
        }
        if report.pages > 0 && !options.inter_page_delay.is_zero() {
            tokio::time::sleep(options.inter_page_delay).await;
        }

        let page = match adapter.fetch_page(http, ctx, &cursor).await {
            Ok(page) => page,
            Err(err) => {
                warn!(pages = report.pages, error = %err, "page fetch failed; keeping partial results");
                report.error = Some(IngestFailure::Upstream(err.to_string()));
                break;
            }
        };
        report.pages += 1;
        report.collected += page.records.len() as u64;
        report.skipped += page.skipped;

        let raws: Vec<NewRawRecord> = page
            .records
            .into_iter()
            .map(|record| to_raw(source_system, ctx.bar_id, record))
            .collect();

        if !raws.is_empty() {
            match store.upsert_raw(&raws).await {
                Ok(stats) => report.absorb(stats),
                Err(err) => {
                    warn!(error = %err, "raw upsert failed; stopping ingestion");
                    report.error = Some(IngestFailure::Persistence(persistence_message(&err)));
                    break;
                }
            }
        }

        info!(
            page = report.pages,
            records = raws.len(),
            skipped = page.skipped,
            collected = report.collected,
            "page landed"
        );

        match page.next {
            Some(next) => cursor = next,
            None => break,
        }
    }

    report
}

fn persistence_message(err: &StoreError) -> String {
    format!("raw store write failed: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use barops_storage::{HttpClientConfig, MemoryStore};
    use serde_json::json;
    use std::sync::Mutex;

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2026, 10, 12).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
        )
        .unwrap()
    }

    fn ctx() -> AdapterContext {
        AdapterContext {
            run_id: Uuid::new_v4(),
            bar_id: 7,
            window: window(),
            auth: None,
        }
    }

    fn fast() -> IngestOptions {
        IngestOptions {
            inter_page_delay: Duration::ZERO,
            max_pages: 10,
        }
    }

    fn records(page: u32, n: usize) -> Vec<SourceRecord> {
        (0..n)
            .map(|i| SourceRecord {
                external_id: Some(format!("p{page}-{i}")),
                business_date: NaiveDate::from_ymd_opt(2026, 10, 14).unwrap(),
                payload: json!({"page": page, "i": i}),
            })
            .collect()
    }

    /// Page-number adapter serving fixed page sizes, optionally failing on one page.
    struct ScriptedAdapter {
        page_size: u32,
        sizes: Vec<usize>,
        fail_on: Option<u32>,
        seen: Mutex<Vec<Cursor>>,
    }

    impl ScriptedAdapter {
        fn new(page_size: u32, sizes: Vec<usize>) -> Self {
            Self {
                page_size,
                sizes,
                fail_on: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn source_system(&self) -> &'static str {
            "pos"
        }

        async fn fetch_page(
            &self,
            _http: &HttpFetcher,
            _ctx: &AdapterContext,
            cursor: &Cursor,
        ) -> Result<Page, AdapterError> {
            self.seen.lock().unwrap().push(cursor.clone());
            let page = cursor.page_number();
            if self.fail_on == Some(page) {
                return Err(AdapterError::malformed("truncated body"));
            }
            let size = self.sizes.get(page as usize - 1).copied().unwrap_or(self.page_size as usize);
            Ok(Page::new(
                records(page, size),
                next_page_number(page, size, self.page_size),
            ))
        }
    }

    fn http() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn short_page_ends_pagination() {
        let adapter = ScriptedAdapter::new(200, vec![200, 45]);
        let store = MemoryStore::new();
        let report = ingest(&adapter, &http(), &store, &ctx(), &fast()).await;

        assert_eq!(report.pages, 2);
        assert_eq!(report.collected, 245);
        assert_eq!(report.inserted, 245);
        assert!(!report.hit_page_ceiling);
        assert!(report.is_success());
        assert_eq!(store.list_raw(7).await.unwrap().len(), 245);
        assert_eq!(
            *adapter.seen.lock().unwrap(),
            vec![Cursor::Start, Cursor::Page(2)]
        );
    }

    #[tokio::test]
    async fn full_pages_stop_at_the_ceiling() {
        let adapter = ScriptedAdapter::new(5, Vec::new());
        let store = MemoryStore::new();
        let options = IngestOptions {
            inter_page_delay: Duration::ZERO,
            max_pages: 3,
        };
        let report = ingest(&adapter, &http(), &store, &ctx(), &options).await;

        assert_eq!(report.pages, 3);
        assert_eq!(report.collected, 15);
        assert!(report.hit_page_ceiling);
    }

    #[tokio::test]
    async fn mid_pagination_error_keeps_landed_pages() {
        let mut adapter = ScriptedAdapter::new(10, vec![10, 10, 10]);
        adapter.fail_on = Some(2);
        let store = MemoryStore::new();
        let report = ingest(&adapter, &http(), &store, &ctx(), &fast()).await;

        assert_eq!(report.pages, 1);
        assert_eq!(report.collected, 10);
        assert!(matches!(report.error, Some(IngestFailure::Upstream(_))));
        assert_eq!(store.list_raw(7).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn store_failure_is_reported_as_persistence() {
        let adapter = ScriptedAdapter::new(10, vec![10, 10]);
        let store = MemoryStore::new();
        store.set_write_failure(Some("disk full"));
        let report = ingest(&adapter, &http(), &store, &ctx(), &fast()).await;

        assert_eq!(report.pages, 1);
        assert!(matches!(report.error, Some(IngestFailure::Persistence(_))));
        assert_eq!(adapter.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn token_pagination_ends_on_empty_token() {
        assert_eq!(next_token(None), None);
        assert_eq!(next_token(Some("  ".into())), None);
        assert_eq!(next_token(Some("abc".into())), Some(Cursor::Token("abc".into())));
    }

    #[test]
    fn page_numbers_advance_only_on_full_pages() {
        assert_eq!(next_page_number(1, 200, 200), Some(Cursor::Page(2)));
        assert_eq!(next_page_number(2, 45, 200), None);
        assert_eq!(next_page_number(1, 0, 200), None);
    }
}
