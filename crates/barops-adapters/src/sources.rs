use async_trait::async_trait;
use barops_core::{round_to, CostCategory, NormalizedBody, NormalizedDraft, RawRecord};
use barops_storage::{HttpFetcher, OutboundRequest};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::{
    next_page_number, next_token, AdapterContext, AdapterError, Cursor, Page, SourceAdapter,
    SourceRecord,
};

pub const POS_SOURCE: &str = "pos";
pub const TICKETING_SOURCE: &str = "ticketing";
pub const ACCOUNTING_SOURCE: &str = "accounting";
pub const REVIEWS_SOURCE: &str = "reviews";
pub const SHEETS_SOURCE: &str = "sheets";

pub const SOURCE_SYSTEMS: [&str; 5] = [
    POS_SOURCE,
    TICKETING_SOURCE,
    ACCOUNTING_SOURCE,
    REVIEWS_SOURCE,
    SHEETS_SOURCE,
];

const DEFAULT_SHEET_RANGE: &str = "Custos!A:D";

/// Where and how to reach one source for one bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEndpoint {
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Spreadsheet range, sheets only.
    #[serde(default)]
    pub range: Option<String>,
}

fn default_page_size() -> u32 {
    200
}

impl SourceEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            page_size: default_page_size(),
            range: None,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

pub fn adapter_for_source(
    source_system: &str,
    endpoint: SourceEndpoint,
) -> Option<Box<dyn SourceAdapter>> {
    match source_system {
        POS_SOURCE => Some(Box::new(PosAdapter { endpoint })),
        TICKETING_SOURCE => Some(Box::new(TicketingAdapter { endpoint })),
        ACCOUNTING_SOURCE => Some(Box::new(AccountingAdapter { endpoint })),
        REVIEWS_SOURCE => Some(Box::new(ReviewsAdapter { endpoint })),
        SHEETS_SOURCE => Some(Box::new(SheetsAdapter { endpoint })),
        _ => None,
    }
}

/// Normalize a landed record with the rules of its source system.
pub fn normalize_raw(raw: &RawRecord) -> Result<Vec<NormalizedDraft>, AdapterError> {
    match raw.source_system.as_str() {
        POS_SOURCE => normalize_sale(raw),
        TICKETING_SOURCE => normalize_ticket(raw),
        ACCOUNTING_SOURCE | SHEETS_SOURCE => normalize_cost(raw),
        REVIEWS_SOURCE => normalize_review(raw),
        other => Err(AdapterError::UnknownSource(other.to_string())),
    }
}

fn json_str<'a>(value: &'a JsonValue, key: &str) -> Option<&'a str> {
    value
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn json_text(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_bool(value: &JsonValue, key: &str) -> bool {
    match value.get(key) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_i64() == Some(1),
        Some(JsonValue::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "sim"),
        _ => false,
    }
}

/// Reads a money or quantity value given either as a JSON number or as text
/// such as `"1,234.50"`, `"R$ 1.234,56"` or `"12,5"`.
pub fn parse_amount(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => parse_amount_text(s),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn parse_amount_text(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_start_matches("R$")
        .trim_start_matches('$')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    normalized.parse().ok()
}

/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps (UTC date) and `DD/MM/YYYY`.
pub fn parse_business_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(ts.date());
    }
    NaiveDate::parse_from_str(text, "%d/%m/%Y").ok()
}

fn required_date(item: &JsonValue, key: &str) -> Result<NaiveDate, AdapterError> {
    json_str(item, key)
        .and_then(parse_business_date)
        .ok_or_else(|| AdapterError::malformed(format!("missing or invalid `{key}`")))
}

fn required_amount(item: &JsonValue, key: &str) -> Result<f64, AdapterError> {
    item.get(key)
        .and_then(parse_amount)
        .ok_or_else(|| AdapterError::malformed(format!("missing or invalid `{key}`")))
}

fn to_record(item: JsonValue, id_key: &str, date_key: &str) -> Result<SourceRecord, AdapterError> {
    Ok(SourceRecord {
        external_id: json_text(&item, id_key),
        business_date: required_date(&item, date_key)?,
        payload: item,
    })
}

/// Records for every usable item. Items missing their date are dropped with
/// a warning so one bad item does not cost the rest of the page.
fn collect_records(
    source_system: &str,
    items: Vec<JsonValue>,
    id_key: &str,
    date_key: &str,
) -> (Vec<SourceRecord>, u64) {
    let mut records = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        let external_id = json_text(&item, id_key);
        match to_record(item, id_key, date_key) {
            Ok(record) => records.push(record),
            Err(err) => {
                skipped += 1;
                warn!(source_system, external_id = ?external_id, error = %err, "skipping malformed item");
            }
        }
    }
    (records, skipped)
}

fn draft(raw: &RawRecord, body: NormalizedBody) -> Vec<NormalizedDraft> {
    vec![NormalizedDraft {
        natural_key: raw.dedup_key().to_string(),
        business_date: raw.business_date,
        body,
    }]
}

fn window_query<'a>(request: OutboundRequest<'a>, ctx: &AdapterContext) -> OutboundRequest<'a> {
    request
        .query("bar_id", ctx.bar_id)
        .query("start", ctx.window.start)
        .query("end", ctx.window.end)
}

#[derive(Debug, Deserialize)]
struct PosResponse {
    #[serde(default)]
    items: Vec<JsonValue>,
}

/// Point-of-sale export, page-number pagination.
#[derive(Debug, Clone)]
pub struct PosAdapter {
    pub endpoint: SourceEndpoint,
}

#[async_trait]
impl SourceAdapter for PosAdapter {
    fn source_system(&self) -> &'static str {
        POS_SOURCE
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        cursor: &Cursor,
    ) -> Result<Page, AdapterError> {
        let page = cursor.page_number();
        let url = self.endpoint.url("sales");
        let request = window_query(OutboundRequest::get(&url), ctx)
            .query("page", page)
            .query("page_size", self.endpoint.page_size)
            .bearer(ctx.auth.as_deref());
        let body: PosResponse = http.fetch(ctx.run_id, POS_SOURCE, request).await?.json()?;
        let returned = body.items.len();
        let (records, skipped) = collect_records(POS_SOURCE, body.items, "id", "date");
        Ok(Page::new(records, next_page_number(page, returned, self.endpoint.page_size))
            .with_skipped(skipped))
    }
}

fn normalize_sale(raw: &RawRecord) -> Result<Vec<NormalizedDraft>, AdapterError> {
    let item = &raw.payload;
    let product = json_text(item, "product")
        .ok_or_else(|| AdapterError::malformed("sale without `product`"))?;
    let quantity = required_amount(item, "quantity")?;
    let unit_price = required_amount(item, "unit_price")?;
    let discount = item.get("discount").and_then(parse_amount).unwrap_or(0.0);
    let gross = round_to(quantity * unit_price, 2);
    Ok(draft(
        raw,
        NormalizedBody::SaleLine {
            product,
            quantity,
            gross,
            discount: round_to(discount, 2),
            net: round_to(gross - discount, 2),
        },
    ))
}

#[derive(Debug, Deserialize)]
struct TicketingResponse {
    #[serde(default)]
    data: Vec<JsonValue>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Ticketing platform orders, cursor pagination.
#[derive(Debug, Clone)]
pub struct TicketingAdapter {
    pub endpoint: SourceEndpoint,
}

#[async_trait]
impl SourceAdapter for TicketingAdapter {
    fn source_system(&self) -> &'static str {
        TICKETING_SOURCE
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        cursor: &Cursor,
    ) -> Result<Page, AdapterError> {
        let url = self.endpoint.url("orders");
        let mut request = window_query(OutboundRequest::get(&url), ctx).bearer(ctx.auth.as_deref());
        if let Some(token) = cursor.token() {
            request = request.query("cursor", token);
        }
        let body: TicketingResponse = http
            .fetch(ctx.run_id, TICKETING_SOURCE, request)
            .await?
            .json()?;
        let (records, skipped) =
            collect_records(TICKETING_SOURCE, body.data, "order_id", "event_date");
        Ok(Page::new(records, next_token(body.next_cursor)).with_skipped(skipped))
    }
}

fn normalize_ticket(raw: &RawRecord) -> Result<Vec<NormalizedDraft>, AdapterError> {
    let item = &raw.payload;
    let event_name = json_text(item, "event_name")
        .ok_or_else(|| AdapterError::malformed("ticket without `event_name`"))?;
    Ok(draft(
        raw,
        NormalizedBody::Ticket {
            event_name,
            attendee: json_text(item, "attendee"),
            ticket_type: json_text(item, "ticket_type"),
            amount: round_to(required_amount(item, "amount")?, 2),
            checked_in: json_bool(item, "checked_in"),
        },
    ))
}

#[derive(Debug, Deserialize)]
struct AccountingResponse {
    #[serde(default)]
    entries: Vec<JsonValue>,
    #[serde(default)]
    has_more: Option<bool>,
}

/// Accounting ledger entries, page-number pagination with an explicit
/// `has_more` marker.
#[derive(Debug, Clone)]
pub struct AccountingAdapter {
    pub endpoint: SourceEndpoint,
}

#[async_trait]
impl SourceAdapter for AccountingAdapter {
    fn source_system(&self) -> &'static str {
        ACCOUNTING_SOURCE
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        cursor: &Cursor,
    ) -> Result<Page, AdapterError> {
        let page = cursor.page_number();
        let url = self.endpoint.url("entries");
        let request = window_query(OutboundRequest::get(&url), ctx)
            .query("page", page)
            .query("per_page", self.endpoint.page_size)
            .bearer(ctx.auth.as_deref());
        let body: AccountingResponse = http
            .fetch(ctx.run_id, ACCOUNTING_SOURCE, request)
            .await?
            .json()?;
        let returned = body.entries.len();
        let next = match body.has_more {
            Some(true) if returned > 0 => Some(Cursor::Page(page + 1)),
            Some(_) => None,
            None => next_page_number(page, returned, self.endpoint.page_size),
        };
        let (records, skipped) =
            collect_records(ACCOUNTING_SOURCE, body.entries, "id", "competence_date");
        Ok(Page::new(records, next).with_skipped(skipped))
    }
}

fn normalize_cost(raw: &RawRecord) -> Result<Vec<NormalizedDraft>, AdapterError> {
    let item = &raw.payload;
    let label = json_text(item, "category").unwrap_or_default();
    Ok(draft(
        raw,
        NormalizedBody::Cost {
            category: CostCategory::from_label(&label),
            description: json_text(item, "description").unwrap_or(label),
            amount: round_to(required_amount(item, "amount")?, 2),
        },
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewsResponse {
    #[serde(default)]
    reviews: Vec<JsonValue>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Review aggregator, cursor pagination. Reviews created outside the
/// window are dropped before landing.
#[derive(Debug, Clone)]
pub struct ReviewsAdapter {
    pub endpoint: SourceEndpoint,
}

#[async_trait]
impl SourceAdapter for ReviewsAdapter {
    fn source_system(&self) -> &'static str {
        REVIEWS_SOURCE
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        cursor: &Cursor,
    ) -> Result<Page, AdapterError> {
        let url = self.endpoint.url("reviews");
        let mut request = OutboundRequest::get(&url)
            .query("bar_id", ctx.bar_id)
            .query("since", ctx.window.start)
            .bearer(ctx.auth.as_deref());
        if let Some(token) = cursor.token() {
            request = request.query("pageToken", token);
        }
        let body: ReviewsResponse = http
            .fetch(ctx.run_id, REVIEWS_SOURCE, request)
            .await?
            .json()?;
        let (mut records, skipped) =
            collect_records(REVIEWS_SOURCE, body.reviews, "reviewId", "createTime");
        records.retain(|record| ctx.window.contains(record.business_date));
        Ok(Page::new(records, next_token(body.next_page_token)).with_skipped(skipped))
    }
}

fn star_rating(value: &JsonValue) -> Option<f64> {
    let rating = match value {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => match s.trim().to_uppercase().as_str() {
            "ONE" => 1.0,
            "TWO" => 2.0,
            "THREE" => 3.0,
            "FOUR" => 4.0,
            "FIVE" => 5.0,
            other => other.parse().ok()?,
        },
        _ => return None,
    };
    (1.0..=5.0).contains(&rating).then_some(rating)
}

fn normalize_review(raw: &RawRecord) -> Result<Vec<NormalizedDraft>, AdapterError> {
    let item = &raw.payload;
    let rating = item
        .get("rating")
        .and_then(star_rating)
        .ok_or_else(|| AdapterError::malformed("review without a 1-5 `rating`"))?;
    let author = match item.get("author") {
        Some(profile @ JsonValue::Object(_)) => json_text(profile, "displayName"),
        _ => json_text(item, "author"),
    };
    Ok(draft(
        raw,
        NormalizedBody::Review {
            author,
            rating,
            comment: json_text(item, "comment"),
        },
    ))
}

#[derive(Debug, Deserialize)]
struct SheetValues {
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

/// Cost spreadsheet read as a single range. The first row is a header.
/// Rows carry no id, so each lands keyed by its range and sheet row number:
/// an edited row replaces itself and identical rows stay distinct.
#[derive(Debug, Clone)]
pub struct SheetsAdapter {
    pub endpoint: SourceEndpoint,
}

fn cell_text(row: &[JsonValue], idx: usize) -> String {
    match row.get(idx) {
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(JsonValue::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl SourceAdapter for SheetsAdapter {
    fn source_system(&self) -> &'static str {
        SHEETS_SOURCE
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        _cursor: &Cursor,
    ) -> Result<Page, AdapterError> {
        let range = self.endpoint.range.as_deref().unwrap_or(DEFAULT_SHEET_RANGE);
        let url = self.endpoint.url(&format!("values/{range}"));
        let request = OutboundRequest::get(&url).bearer(ctx.auth.as_deref());
        let body: SheetValues = http
            .fetch(ctx.run_id, SHEETS_SOURCE, request)
            .await?
            .json()?;

        let mut records = Vec::new();
        let mut skipped = 0;
        for (idx, row) in body.values.iter().enumerate().skip(1) {
            if (0..4).all(|col| cell_text(row, col).is_empty()) {
                continue;
            }
            let date_text = cell_text(row, 0);
            let Some(business_date) = parse_business_date(&date_text) else {
                skipped += 1;
                warn!(row = idx + 1, date = %date_text, "skipping sheet row without a valid date");
                continue;
            };
            if !ctx.window.contains(business_date) {
                continue;
            }
            records.push(SourceRecord {
                external_id: Some(format!("{range}#{}", idx + 1)),
                business_date,
                payload: json!({
                    "date": date_text,
                    "category": cell_text(row, 1),
                    "description": cell_text(row, 2),
                    "amount": cell_text(row, 3),
                }),
            });
        }
        Ok(Page::last(records).with_skipped(skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn raw(source_system: &str, external_id: Option<&str>, payload: JsonValue) -> RawRecord {
        RawRecord {
            id: Uuid::new_v4(),
            source_system: source_system.to_string(),
            bar_id: 1,
            business_date: NaiveDate::from_ymd_opt(2026, 10, 14).unwrap(),
            external_id: external_id.map(str::to_string),
            payload_hash: "h-1".into(),
            payload,
            received_at: Utc::now(),
            processed: false,
            processed_at: None,
            error: None,
        }
    }

    #[test]
    fn amounts_parse_across_locales() {
        assert_eq!(parse_amount(&json!(12.5)), Some(12.5));
        assert_eq!(parse_amount(&json!("R$ 1.234,56")), Some(1234.56));
        assert_eq!(parse_amount(&json!("1,234.50")), Some(1234.5));
        assert_eq!(parse_amount(&json!("12,5")), Some(12.5));
        assert_eq!(parse_amount(&json!("")), None);
        assert_eq!(parse_amount(&json!("abc")), None);
        assert_eq!(parse_amount(&JsonValue::Null), None);
    }

    #[test]
    fn business_dates_accept_common_shapes() {
        let expected = NaiveDate::from_ymd_opt(2026, 10, 14);
        assert_eq!(parse_business_date("2026-10-14"), expected);
        assert_eq!(parse_business_date("2026-10-14T23:10:00Z"), expected);
        assert_eq!(parse_business_date("14/10/2026"), expected);
        assert_eq!(parse_business_date("yesterday"), None);
    }

    #[test]
    fn sale_line_nets_out_discount() {
        let record = raw(
            POS_SOURCE,
            Some("S-1"),
            json!({"id": "S-1", "date": "2026-10-14", "product": "IPA", "quantity": 3, "unit_price": "12,50", "discount": 2.5}),
        );
        let drafts = normalize_raw(&record).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].natural_key, "S-1");
        assert_eq!(
            drafts[0].body,
            NormalizedBody::SaleLine {
                product: "IPA".into(),
                quantity: 3.0,
                gross: 37.5,
                discount: 2.5,
                net: 35.0,
            }
        );
    }

    #[test]
    fn sale_without_price_is_malformed() {
        let record = raw(POS_SOURCE, Some("S-2"), json!({"product": "IPA", "quantity": 1}));
        assert!(matches!(normalize_raw(&record), Err(AdapterError::Malformed(_))));
    }

    #[test]
    fn sheet_rows_key_by_row_position() {
        let record = raw(
            SHEETS_SOURCE,
            Some("Custos!A:D#4"),
            json!({"date": "14/10/2026", "category": "Freelas", "description": "Bar staff", "amount": "R$ 450,00"}),
        );
        let drafts = normalize_raw(&record).unwrap();
        assert_eq!(drafts[0].natural_key, "Custos!A:D#4");
        assert_eq!(
            drafts[0].body,
            NormalizedBody::Cost {
                category: CostCategory::Labor,
                description: "Bar staff".into(),
                amount: 450.0,
            }
        );
    }

    #[test]
    fn review_ratings_accept_words_and_numbers() {
        let word = raw(REVIEWS_SOURCE, Some("r1"), json!({"rating": "FIVE", "author": {"displayName": "Ana"}}));
        let number = raw(REVIEWS_SOURCE, Some("r2"), json!({"rating": 3, "author": "Bia", "comment": "ok"}));
        let out_of_range = raw(REVIEWS_SOURCE, Some("r3"), json!({"rating": 9}));

        match &normalize_raw(&word).unwrap()[0].body {
            NormalizedBody::Review { rating, author, .. } => {
                assert_eq!(*rating, 5.0);
                assert_eq!(author.as_deref(), Some("Ana"));
            }
            other => panic!("unexpected body {other:?}"),
        }
        match &normalize_raw(&number).unwrap()[0].body {
            NormalizedBody::Review { rating, comment, .. } => {
                assert_eq!(*rating, 3.0);
                assert_eq!(comment.as_deref(), Some("ok"));
            }
            other => panic!("unexpected body {other:?}"),
        }
        assert!(normalize_raw(&out_of_range).is_err());
    }

    #[test]
    fn ticket_check_in_flag_is_lenient() {
        let record = raw(
            TICKETING_SOURCE,
            Some("o-1"),
            json!({"event_name": "Samba Night", "amount": "40", "checked_in": "true", "ticket_type": "VIP"}),
        );
        match &normalize_raw(&record).unwrap()[0].body {
            NormalizedBody::Ticket { checked_in, amount, ticket_type, attendee, .. } => {
                assert!(*checked_in);
                assert_eq!(*amount, 40.0);
                assert_eq!(ticket_type.as_deref(), Some("VIP"));
                assert_eq!(*attendee, None);
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn unknown_source_is_rejected() {
        let record = raw("fax", None, json!({}));
        assert!(matches!(normalize_raw(&record), Err(AdapterError::UnknownSource(_))));
        assert!(adapter_for_source("fax", SourceEndpoint::new("http://x")).is_none());
        for source in SOURCE_SYSTEMS {
            let adapter = adapter_for_source(source, SourceEndpoint::new("http://x")).unwrap();
            assert_eq!(adapter.source_system(), source);
        }
    }
}
