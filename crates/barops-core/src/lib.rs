//! Core domain model for the bar operations sync pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

mod period;

pub use period::{DateWindow, Granularity, Period, PeriodParseError};

pub const CRATE_NAME: &str = "barops-core";

/// Tenant identifier.
pub type BarId = i64;

/// Error taxonomy shared by every entry point.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl SyncError {
    /// HTTP status an entry point reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::Configuration(_) | SyncError::Persistence(_) => 500,
            SyncError::InvalidInput(_) | SyncError::InvalidAction(_) => 400,
            SyncError::Upstream(_) => 502,
        }
    }
}

impl From<PeriodParseError> for SyncError {
    fn from(err: PeriodParseError) -> Self {
        SyncError::InvalidInput(err.to_string())
    }
}

/// Record handed from an adapter to the raw store, before hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRawRecord {
    pub source_system: String,
    pub bar_id: BarId,
    pub business_date: NaiveDate,
    pub external_id: Option<String>,
    pub payload: JsonValue,
}

/// Unprocessed payload as landed from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: Uuid,
    pub source_system: String,
    pub bar_id: BarId,
    pub business_date: NaiveDate,
    pub external_id: Option<String>,
    pub payload_hash: String,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RawRecord {
    /// External id when the source provides one, else the payload hash.
    pub fn dedup_key(&self) -> &str {
        self.external_id.as_deref().unwrap_or(&self.payload_hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    /// Goods consumed (food, beverage, supplies): the CMV numerator.
    Consumption,
    /// Payroll and freelancers: the CMO numerator.
    Labor,
    Other,
}

impl CostCategory {
    /// Maps the free-form category labels used by accounting systems and
    /// cost sheets.
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        const CONSUMPTION: &[&str] = &[
            "cmv", "food", "beverage", "bebida", "comida", "insumo", "drink", "supplies",
        ];
        const LABOR: &[&str] = &[
            "cmo", "payroll", "salary", "salario", "freela", "labor", "staff", "folha",
        ];
        if CONSUMPTION.iter().any(|needle| lower.contains(needle)) {
            CostCategory::Consumption
        } else if LABOR.iter().any(|needle| lower.contains(needle)) {
            CostCategory::Labor
        } else {
            CostCategory::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedBody {
    SaleLine {
        product: String,
        quantity: f64,
        gross: f64,
        discount: f64,
        net: f64,
    },
    Cost {
        category: CostCategory,
        description: String,
        amount: f64,
    },
    Ticket {
        event_name: String,
        attendee: Option<String>,
        ticket_type: Option<String>,
        amount: f64,
        checked_in: bool,
    },
    Review {
        author: Option<String>,
        rating: f64,
        comment: Option<String>,
    },
}

impl NormalizedBody {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedBody::SaleLine { .. } => "sale_line",
            NormalizedBody::Cost { .. } => "cost",
            NormalizedBody::Ticket { .. } => "ticket",
            NormalizedBody::Review { .. } => "review",
        }
    }
}

/// A normalized body plus the key it upserts under, as produced by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDraft {
    pub natural_key: String,
    pub business_date: NaiveDate,
    pub body: NormalizedBody,
}

/// Typed domain row derived from a raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub raw_id: Uuid,
    pub source_system: String,
    pub bar_id: BarId,
    pub natural_key: String,
    pub business_date: NaiveDate,
    pub period_key: String,
    pub body: NormalizedBody,
}

impl NormalizedRecord {
    pub fn from_draft(raw: &RawRecord, draft: NormalizedDraft) -> Self {
        Self {
            raw_id: raw.id,
            source_system: raw.source_system.clone(),
            bar_id: raw.bar_id,
            period_key: Period::containing(draft.business_date, Granularity::Week).key(),
            natural_key: draft.natural_key,
            business_date: draft.business_date,
            body: draft.body,
        }
    }
}

/// Materialized per-period metrics for one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub bar_id: BarId,
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub net_revenue: f64,
    pub sales_revenue: f64,
    pub ticket_revenue: f64,
    pub consumption: f64,
    pub labor_cost: f64,
    pub cmv_pct: Option<f64>,
    pub cmo_pct: Option<f64>,
    pub ticket_count: u32,
    pub checked_in_count: u32,
    pub review_count: u32,
    pub avg_rating: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

/// Metric fields an operator may override on a stored summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryField {
    NetRevenue,
    Consumption,
    LaborCost,
    CmvPct,
    CmoPct,
    AvgRating,
}

impl SummaryField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryField::NetRevenue => "net_revenue",
            SummaryField::Consumption => "consumption",
            SummaryField::LaborCost => "labor_cost",
            SummaryField::CmvPct => "cmv_pct",
            SummaryField::CmoPct => "cmo_pct",
            SummaryField::AvgRating => "avg_rating",
        }
    }

    pub fn get(&self, summary: &PeriodSummary) -> Option<f64> {
        match self {
            SummaryField::NetRevenue => Some(summary.net_revenue),
            SummaryField::Consumption => Some(summary.consumption),
            SummaryField::LaborCost => Some(summary.labor_cost),
            SummaryField::CmvPct => summary.cmv_pct,
            SummaryField::CmoPct => summary.cmo_pct,
            SummaryField::AvgRating => summary.avg_rating,
        }
    }

    pub fn set(&self, summary: &mut PeriodSummary, value: Option<f64>) {
        match self {
            SummaryField::NetRevenue => summary.net_revenue = value.unwrap_or_default(),
            SummaryField::Consumption => summary.consumption = value.unwrap_or_default(),
            SummaryField::LaborCost => summary.labor_cost = value.unwrap_or_default(),
            SummaryField::CmvPct => summary.cmv_pct = value,
            SummaryField::CmoPct => summary.cmo_pct = value,
            SummaryField::AvgRating => summary.avg_rating = value,
        }
    }
}

impl FromStr for SummaryField {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(JsonValue::String(s.to_string()))
            .map_err(|_| SyncError::InvalidInput(format!("unknown summary field {s:?}")))
    }
}

/// Audit row written whenever a summary value is overridden by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOverride {
    pub bar_id: BarId,
    pub period_key: String,
    pub field: SummaryField,
    pub previous_value: Option<f64>,
    pub new_value: Option<f64>,
    pub reason: String,
    pub actor: String,
    pub overridden_at: DateTime<Utc>,
}

/// A period whose inputs changed since its summary was last computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyPeriod {
    pub bar_id: BarId,
    pub period_key: String,
    pub marked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
    Skipped,
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
            RunStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    Ingest,
    Process,
    Aggregate,
    Notify,
}

impl JobStep {
    pub const ORDER: [JobStep; 4] = [
        JobStep::Ingest,
        JobStep::Process,
        JobStep::Aggregate,
        JobStep::Notify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStep::Ingest => "ingest",
            JobStep::Process => "process",
            JobStep::Aggregate => "aggregate",
            JobStep::Notify => "notify",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: JobStep,
    pub status: StepStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub collected: u64,
    pub inserted: u64,
    pub updated: u64,
    pub errors: u64,
}

/// Observability record for one ingestion or job invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub target: String,
    pub bar_id: Option<BarId>,
    pub window: DateWindow,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    pub counts: RunCounts,
    pub error: Option<String>,
}

impl SyncRun {
    pub fn start(target: impl Into<String>, bar_id: Option<BarId>, window: DateWindow) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            bar_id,
            window,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            steps: Vec::new(),
            counts: RunCounts::default(),
            error: None,
        }
    }

    /// A job run with every step pending.
    pub fn start_job(job_name: &str, window: DateWindow) -> Self {
        let mut run = Self::start(format!("job:{job_name}"), None, window);
        run.steps = JobStep::ORDER
            .iter()
            .map(|step| StepRecord {
                step: *step,
                status: StepStatus::Pending,
                detail: None,
            })
            .collect();
        run
    }

    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    pub fn set_step(&mut self, step: JobStep, status: StepStatus, detail: Option<String>) {
        if let Some(record) = self.steps.iter_mut().find(|r| r.step == step) {
            record.status = status;
            record.detail = detail;
        } else {
            self.steps.push(StepRecord {
                step,
                status,
                detail,
            });
        }
    }

    pub fn step_status(&self, step: JobStep) -> Option<StepStatus> {
        self.steps.iter().find(|r| r.step == step).map(|r| r.status)
    }

    /// First step not yet succeeded, in pipeline order.
    pub fn resume_point(&self) -> Option<JobStep> {
        JobStep::ORDER
            .into_iter()
            .find(|step| self.step_status(*step) != Some(StepStatus::Succeeded))
    }
}

/// `numerator / denominator * 100`, or `None` when the denominator is zero.
pub fn ratio_pct(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        return None;
    }
    Some(round_to(numerator / denominator * 100.0, 4))
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_denominator_yields_none() {
        assert_eq!(ratio_pct(100.0, 0.0), None);
        assert_eq!(ratio_pct(0.0, 0.0), None);
        assert_eq!(ratio_pct(25.0, 200.0), Some(12.5));
    }

    #[test]
    fn ratios_are_not_clamped() {
        assert_eq!(ratio_pct(300.0, 100.0), Some(300.0));
        assert_eq!(ratio_pct(-10.0, 100.0), Some(-10.0));
    }

    #[test]
    fn cost_labels_map_to_categories() {
        assert_eq!(CostCategory::from_label("CMV - Bebidas"), CostCategory::Consumption);
        assert_eq!(CostCategory::from_label("Food cost"), CostCategory::Consumption);
        assert_eq!(CostCategory::from_label("Freelancers"), CostCategory::Labor);
        assert_eq!(CostCategory::from_label("Payroll"), CostCategory::Labor);
        assert_eq!(CostCategory::from_label("Rent"), CostCategory::Other);
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(SyncError::InvalidAction("x".into()).status_code(), 400);
        assert_eq!(SyncError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(SyncError::Configuration("x".into()).status_code(), 500);
        assert_eq!(SyncError::Persistence("x".into()).status_code(), 500);
        assert_eq!(SyncError::Upstream("x".into()).status_code(), 502);
    }

    #[test]
    fn job_run_resumes_from_first_unfinished_step() {
        let window = DateWindow::single_day(NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        let mut run = SyncRun::start_job("daily", window);
        assert_eq!(run.target, "job:daily");
        assert_eq!(run.resume_point(), Some(JobStep::Ingest));
        run.set_step(JobStep::Ingest, StepStatus::Succeeded, None);
        run.set_step(JobStep::Process, StepStatus::Failed, Some("db down".into()));
        assert_eq!(run.resume_point(), Some(JobStep::Process));
        for step in JobStep::ORDER {
            run.set_step(step, StepStatus::Succeeded, None);
        }
        assert_eq!(run.resume_point(), None);
    }

    #[test]
    fn summary_fields_parse_from_snake_case() {
        assert_eq!("cmv_pct".parse::<SummaryField>().unwrap(), SummaryField::CmvPct);
        assert!("bogus".parse::<SummaryField>().is_err());
    }
}
