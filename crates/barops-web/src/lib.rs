//! Axum HTTP surface for BarOps: dispatcher, cron triggers, ingestion,
//! processing, recompute and summary endpoints.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use barops_core::{BarId, DateWindow, RunStatus, SummaryField, SyncError};
use barops_storage::Store;
use barops_sync::{default_window, DailyJob, DispatchRequest, DrainReport, SyncService};
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "barops-web";

const DEFAULT_SUMMARY_LIMIT: usize = 12;
const DEFAULT_RUN_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
}

impl AppState {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self { service }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/dispatch", post(dispatch_handler))
        .route("/cron/{job}", get(cron_handler).post(cron_handler))
        .route("/sync/{source}", post(sync_handler))
        .route("/process", post(process_handler))
        .route("/recompute", post(recompute_handler))
        .route("/summaries/{bar_id}", get(summaries_handler))
        .route(
            "/summaries/{bar_id}/{period_key}/override",
            post(override_handler),
        )
        .route("/runs", get(runs_handler))
        .route("/runs/{id}", get(run_handler))
        .route("/runs/{id}/resume", post(resume_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(service: Arc<SyncService>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "barops web listening");
    axum::serve(listener, app(AppState::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}

/// Every failure leaves as `{success: false, error, timestamp}`.
struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        failure(status, self.0.to_string())
    }
}

type ApiResult = Result<Response, ApiError>;

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": error.into(),
            "timestamp": timestamp(),
        })),
    )
        .into_response()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// An empty body reads as `{}`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let parsed = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_slice(b"{}")
    } else {
        serde_json::from_slice(body)
    };
    parsed.map_err(|err| SyncError::InvalidInput(format!("invalid request body: {err}")).into())
}

fn parse_run_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| SyncError::InvalidInput(format!("{raw:?} is not a run id")).into())
}

async fn health_handler() -> Response {
    Json(json!({
        "status": "ok",
        "service": CRATE_NAME,
        "timestamp": timestamp(),
    }))
    .into_response()
}

async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let request: DispatchRequest = parse_body(&body)?;
    let outcome = state
        .service
        .dispatcher()
        .dispatch(request, bearer(&headers))
        .await?;
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, Json(outcome.body)).into_response())
}

async fn cron_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(job): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult {
    let secret = state
        .service
        .config()
        .cron_secret
        .as_deref()
        .ok_or_else(|| SyncError::Configuration("CRON_SECRET is not configured".into()))?;
    if bearer(&headers) != Some(secret) {
        return Ok(failure(StatusCode::UNAUTHORIZED, "unauthorized"));
    }

    let today = Utc::now().date_naive();
    info!(job = %job, "cron trigger");
    match job.as_str() {
        "daily" => {
            let report = DailyJob::new(state.service.clone())
                .run(default_window(today))
                .await?;
            let status = match report.run.status {
                RunStatus::Failed | RunStatus::TimedOut => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::OK,
            };
            Ok((
                status,
                Json(json!({
                    "success": report.is_success(),
                    "job": job,
                    "run_id": report.run.id,
                    "status": report.run.status,
                    "steps": report.run.steps,
                    "failed_pairs": report.failed_pairs,
                    "skipped": report.skipped,
                    "timestamp": timestamp(),
                })),
            )
                .into_response())
        }
        "process" => Ok(drain_response(state.service.drain().await)),
        "recompute" => {
            let report = state
                .service
                .aggregator()
                .recompute_all(None, None, today)
                .await?;
            Ok(Json(json!({
                "success": report.is_success(),
                "job": job,
                "result": report,
                "timestamp": timestamp(),
            }))
            .into_response())
        }
        other => Ok(failure(StatusCode::NOT_FOUND, format!("unknown job {other:?}"))),
    }
}

fn drain_response(drain: DrainReport) -> Response {
    let status = if drain.totals.persistence_error.is_some() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(json!({
            "success": drain.totals.persistence_error.is_none(),
            "result": drain,
            "timestamp": timestamp(),
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SyncBody {
    bar_id: Option<BarId>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

async fn sync_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(source): AxumPath<String>,
    body: Bytes,
) -> ApiResult {
    let body: SyncBody = parse_body(&body)?;
    let bar_id = body
        .bar_id
        .ok_or_else(|| SyncError::InvalidInput("bar_id is required".into()))?;
    let fallback = default_window(Utc::now().date_naive());
    let window = DateWindow::new(
        body.start.unwrap_or(fallback.start),
        body.end.unwrap_or(fallback.end),
    )?;

    let outcome = state.service.sync_source(bar_id, &source, window).await?;
    let status = match outcome.run.status {
        RunStatus::Failed | RunStatus::TimedOut => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    Ok((
        status,
        Json(json!({
            "success": matches!(outcome.run.status, RunStatus::Succeeded | RunStatus::Skipped),
            "run_id": outcome.run.id,
            "status": outcome.run.status,
            "skipped": outcome.skipped(),
            "report": outcome.report,
            "error": outcome.failure(),
            "timestamp": timestamp(),
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ProcessBody {
    max_records: Option<usize>,
}

/// A single batch when `max_records` is given, otherwise a full drain.
async fn process_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let body: ProcessBody = parse_body(&body)?;
    match body.max_records {
        Some(0) => Err(SyncError::InvalidInput("max_records must be positive".into()).into()),
        Some(max) => {
            let report = state.service.processor().process_batch(max).await;
            let status = if report.persistence_error.is_some() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            Ok((
                status,
                Json(json!({
                    "success": report.persistence_error.is_none(),
                    "result": report,
                    "timestamp": timestamp(),
                })),
            )
                .into_response())
        }
        None => Ok(drain_response(state.service.drain().await)),
    }
}

#[derive(Debug, Deserialize)]
struct RecomputeBody {
    bar_id: Option<BarId>,
    period_key: Option<String>,
    #[serde(default)]
    recalcular_todas: bool,
    limit_periods: Option<usize>,
}

async fn recompute_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let body: RecomputeBody = parse_body(&body)?;
    let aggregator = state.service.aggregator();

    if body.recalcular_todas {
        let report = aggregator
            .recompute_all(body.bar_id, body.limit_periods, Utc::now().date_naive())
            .await?;
        return Ok(Json(json!({
            "success": report.is_success(),
            "recalculadas": report.recalculated,
            "erros": report.errors.len(),
            "errors": report.errors,
            "periods": report.periods,
            "timestamp": timestamp(),
        }))
        .into_response());
    }

    let bar_id = body
        .bar_id
        .ok_or_else(|| SyncError::InvalidInput("bar_id is required".into()))?;
    let period_key = body.period_key.as_deref().ok_or_else(|| {
        SyncError::InvalidInput("period_key or recalcular_todas is required".into())
    })?;
    let summary = aggregator.recompute(bar_id, period_key).await?;
    Ok(Json(json!({
        "success": true,
        "recalculadas": 1,
        "erros": 0,
        "summary": summary,
        "timestamp": timestamp(),
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn summaries_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(bar_id): AxumPath<BarId>,
    Query(query): Query<LimitQuery>,
) -> ApiResult {
    let limit = query.limit.unwrap_or(DEFAULT_SUMMARY_LIMIT).clamp(1, 520);
    let summaries = state
        .service
        .store()
        .list_summaries(bar_id, limit)
        .await
        .map_err(SyncError::from)?;
    Ok(Json(json!({
        "success": true,
        "bar_id": bar_id,
        "summaries": summaries,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
struct OverrideBody {
    field: SummaryField,
    value: Option<f64>,
    reason: String,
    actor: String,
}

async fn override_handler(
    State(state): State<Arc<AppState>>,
    AxumPath((bar_id, period_key)): AxumPath<(BarId, String)>,
    body: Bytes,
) -> ApiResult {
    let body: OverrideBody = parse_body(&body)?;
    let summary = state
        .service
        .aggregator()
        .override_field(
            bar_id,
            &period_key,
            body.field,
            body.value,
            &body.reason,
            &body.actor,
        )
        .await?;
    Ok(Json(json!({
        "success": true,
        "summary": summary,
        "timestamp": timestamp(),
    }))
    .into_response())
}

async fn runs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult {
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, 500);
    let runs = state
        .service
        .store()
        .recent_runs(limit)
        .await
        .map_err(SyncError::from)?;
    Ok(Json(json!({ "success": true, "runs": runs })).into_response())
}

async fn run_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult {
    let id = parse_run_id(&id)?;
    match state
        .service
        .store()
        .get_run(id)
        .await
        .map_err(SyncError::from)?
    {
        Some(run) => Ok(Json(json!({ "success": true, "run": run })).into_response()),
        None => Ok(failure(StatusCode::NOT_FOUND, format!("run {id} not found"))),
    }
}

async fn resume_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult {
    let id = parse_run_id(&id)?;
    let report = DailyJob::new(state.service.clone()).resume(id).await?;
    Ok(Json(json!({
        "success": report.is_success(),
        "run_id": report.run.id,
        "status": report.run.status,
        "steps": report.run.steps,
        "skipped": report.skipped,
        "timestamp": timestamp(),
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use barops_core::PeriodSummary;
    use barops_storage::MemoryStore;
    use barops_sync::{BarRegistry, SyncConfig};
    use http_body_util::BodyExt;
    use serde_json::Value as JsonValue;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "cron-s3cret";

    fn app_with(yaml: &str, config: SyncConfig) -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = BarRegistry::from_yaml_str(yaml).unwrap();
        let service = SyncService::new(config, registry, store.clone()).unwrap();
        (app(AppState::new(Arc::new(service))), store)
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            cron_secret: Some(SECRET.into()),
            page_delay_ms: 0,
            ..SyncConfig::default()
        }
    }

    fn empty_app() -> (Router, Arc<MemoryStore>) {
        app_with("bars: []", test_config())
    }

    async fn call(
        app: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => Body::from(serde_json::to_vec(&value).unwrap()),
            None => Body::empty(),
        };
        let resp = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn summary(bar_id: BarId, key: &str) -> PeriodSummary {
        PeriodSummary {
            bar_id,
            period_key: key.into(),
            period_start: NaiveDate::from_ymd_opt(2026, 10, 12).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            net_revenue: 1000.0,
            sales_revenue: 1000.0,
            ticket_revenue: 0.0,
            consumption: 300.0,
            labor_cost: 200.0,
            cmv_pct: Some(30.0),
            cmo_pct: Some(20.0),
            ticket_count: 0,
            checked_in_count: 0,
            review_count: 0,
            avg_rating: None,
            computed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = empty_app();
        let (status, body) = call(app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_action() {
        let (app, _) = empty_app();
        let (status, body) = call(
            app,
            "POST",
            "/dispatch",
            Some("caller"),
            Some(json!({"action": "drop_everything"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("drop_everything"));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn dispatch_rejects_malformed_json() {
        let (app, _) = empty_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/dispatch")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cron_requires_the_secret() {
        let (app, _) = empty_app();
        let (missing, _) = call(app.clone(), "GET", "/cron/process", None, None).await;
        assert_eq!(missing, StatusCode::UNAUTHORIZED);
        let (wrong, _) = call(app.clone(), "POST", "/cron/process", Some("nope"), None).await;
        assert_eq!(wrong, StatusCode::UNAUTHORIZED);
        let (unknown, _) = call(app.clone(), "GET", "/cron/weekly", Some(SECRET), None).await;
        assert_eq!(unknown, StatusCode::NOT_FOUND);

        let (ok, body) = call(app, "GET", "/cron/process", Some(SECRET), None).await;
        assert_eq!(ok, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["backlog_cleared"], true);
    }

    #[tokio::test]
    async fn cron_daily_runs_the_job() {
        let (app, _) = empty_app();
        let (status, body) = call(app, "POST", "/cron/daily", Some(SECRET), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["steps"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn recompute_validates_its_body() {
        let (app, _) = empty_app();
        let (no_bar, body) = call(
            app.clone(),
            "POST",
            "/recompute",
            None,
            Some(json!({"period_key": "2026-W42"})),
        )
        .await;
        assert_eq!(no_bar, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("bar_id"));

        let (neither, _) =
            call(app.clone(), "POST", "/recompute", None, Some(json!({"bar_id": 1}))).await;
        assert_eq!(neither, StatusCode::BAD_REQUEST);

        for key in ["week 42", "2026-W1", "+2026-10"] {
            let (bad_key, _) = call(
                app.clone(),
                "POST",
                "/recompute",
                None,
                Some(json!({"bar_id": 1, "period_key": key})),
            )
            .await;
            assert_eq!(bad_key, StatusCode::BAD_REQUEST, "{key}");
        }

        let (huge, body) = call(
            app,
            "POST",
            "/recompute",
            None,
            Some(json!({"bar_id": 1, "recalcular_todas": true, "limit_periods": 10_000_000_000u64})),
        )
        .await;
        assert_eq!(huge, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("limit_periods"));
    }

    #[tokio::test]
    async fn recompute_single_period_and_all() {
        let (app, _) = empty_app();
        let (status, body) = call(
            app.clone(),
            "POST",
            "/recompute",
            None,
            Some(json!({"bar_id": 4, "period_key": "2026-W42"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recalculadas"], 1);
        assert_eq!(body["summary"]["cmv_pct"], JsonValue::Null);

        let (status, body) = call(
            app,
            "POST",
            "/recompute",
            None,
            Some(json!({"bar_id": 4, "recalcular_todas": true, "limit_periods": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["recalculadas"], 3);
        assert_eq!(body["erros"], 0);
        assert_eq!(body["periods"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn sync_then_process_then_read_summaries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sales"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": "S1", "date": "2026-10-15", "product": "IPA", "quantity": 4, "unit_price": 25}]
            })))
            .mount(&server)
            .await;
        let yaml = format!(
            "bars:\n  - bar_id: 1\n    name: Bar\n    sources:\n      - source_system: pos\n        base_url: {}\n",
            server.uri()
        );
        let (app, _) = app_with(&yaml, test_config());

        let (status, body) = call(
            app.clone(),
            "POST",
            "/sync/pos",
            None,
            Some(json!({"bar_id": 1, "start": "2026-10-15", "end": "2026-10-16"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["report"]["collected"], 1);

        let (status, body) = call(app.clone(), "POST", "/process", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["totals"]["processed"], 1);

        let (status, _) = call(
            app.clone(),
            "POST",
            "/recompute",
            None,
            Some(json!({"bar_id": 1, "period_key": "2026-W42"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(app, "GET", "/summaries/1", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summaries"][0]["net_revenue"], 100.0);
    }

    #[tokio::test]
    async fn sync_validates_source_and_bar() {
        let (app, _) = empty_app();
        let (status, _) =
            call(app.clone(), "POST", "/sync/fax", None, Some(json!({"bar_id": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = call(app, "POST", "/sync/pos", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("bar_id"));
    }

    #[tokio::test]
    async fn process_rejects_zero_batch() {
        let (app, _) = empty_app();
        let (status, _) =
            call(app, "POST", "/process", None, Some(json!({"max_records": 0}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn override_updates_summary_and_validates_field() {
        let (app, store) = empty_app();
        store.upsert_summary(&summary(1, "2026-W42")).await.unwrap();

        let (status, body) = call(
            app.clone(),
            "POST",
            "/summaries/1/2026-W42/override",
            None,
            Some(json!({"field": "cmv_pct", "value": 28.5, "reason": "inventory recount", "actor": "ops"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["cmv_pct"], 28.5);
        assert_eq!(store.list_overrides(1, "2026-W42").await.unwrap().len(), 1);

        let (status, _) = call(
            app,
            "POST",
            "/summaries/1/2026-W42/override",
            None,
            Some(json!({"field": "profit", "value": 1.0, "reason": "x", "actor": "ops"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn runs_can_be_listed_and_fetched() {
        let (app, _) = empty_app();
        let (_, daily) = call(app.clone(), "POST", "/cron/daily", Some(SECRET), None).await;
        let run_id = daily["run_id"].as_str().unwrap().to_string();

        let (status, body) = call(app.clone(), "GET", "/runs", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["runs"].as_array().unwrap().len(), 1);

        let (status, body) = call(app.clone(), "GET", &format!("/runs/{run_id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["run"]["target"], "job:daily");

        let (status, _) = call(app.clone(), "GET", "/runs/not-a-uuid", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            call(app, "POST", &format!("/runs/{run_id}/resume"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["skipped"].is_string());
    }
}
