use std::collections::BTreeSet;
use std::sync::Arc;

use barops_core::{
    ratio_pct, round_to, BarId, CostCategory, Granularity, NormalizedBody, NormalizedRecord,
    Period, PeriodSummary, SummaryField, SummaryOverride, SyncError,
};
use barops_storage::Store;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::registry::BarRegistry;

/// Summary for `period` from its normalized rows. Pure: identical rows give
/// an identical summary apart from `computed_at`.
pub fn compute_summary(
    bar_id: BarId,
    period: &Period,
    rows: &[NormalizedRecord],
    computed_at: DateTime<Utc>,
) -> PeriodSummary {
    let mut sales_revenue = 0.0;
    let mut ticket_revenue = 0.0;
    let mut consumption = 0.0;
    let mut labor_cost = 0.0;
    let mut ticket_count = 0u32;
    let mut checked_in_count = 0u32;
    let mut rating_sum = 0.0;
    let mut review_count = 0u32;

    for row in rows
        .iter()
        .filter(|r| r.bar_id == bar_id && period.contains(r.business_date))
    {
        match &row.body {
            NormalizedBody::SaleLine { net, .. } => sales_revenue += net,
            NormalizedBody::Ticket {
                amount, checked_in, ..
            } => {
                ticket_revenue += amount;
                ticket_count += 1;
                if *checked_in {
                    checked_in_count += 1;
                }
            }
            NormalizedBody::Cost {
                category, amount, ..
            } => match category {
                CostCategory::Consumption => consumption += amount,
                CostCategory::Labor => labor_cost += amount,
                CostCategory::Other => {}
            },
            NormalizedBody::Review { rating, .. } => {
                rating_sum += rating;
                review_count += 1;
            }
        }
    }

    let sales_revenue = round_to(sales_revenue, 2);
    let ticket_revenue = round_to(ticket_revenue, 2);
    let net_revenue = round_to(sales_revenue + ticket_revenue, 2);
    let consumption = round_to(consumption, 2);
    let labor_cost = round_to(labor_cost, 2);

    PeriodSummary {
        bar_id,
        period_key: period.key(),
        period_start: period.start(),
        period_end: period.end(),
        net_revenue,
        sales_revenue,
        ticket_revenue,
        consumption,
        labor_cost,
        cmv_pct: ratio_pct(consumption, net_revenue),
        cmo_pct: ratio_pct(labor_cost, net_revenue),
        ticket_count,
        checked_in_count,
        review_count,
        avg_rating: (review_count > 0).then(|| round_to(rating_sum / f64::from(review_count), 2)),
        computed_at,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeReport {
    pub recalculated: usize,
    pub periods: Vec<String>,
    pub errors: Vec<String>,
}

impl RecomputeReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Upper bound on `limit_periods`: two years of weeks.
pub const MAX_TRAILING_PERIODS: usize = 104;

/// Materializes `PeriodSummary` rows from normalized data.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn Store>,
    registry: Arc<BarRegistry>,
    trailing_periods: usize,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>, registry: Arc<BarRegistry>, trailing_periods: usize) -> Self {
        Self {
            store,
            registry,
            trailing_periods: trailing_periods.clamp(1, MAX_TRAILING_PERIODS),
        }
    }

    pub async fn recompute(&self, bar_id: BarId, period_key: &str) -> Result<PeriodSummary, SyncError> {
        let period: Period = period_key.parse()?;
        let started = Utc::now();
        let rows = self
            .store
            .normalized_in_range(bar_id, period.start(), period.end())
            .await?;
        let summary = compute_summary(bar_id, &period, &rows, Utc::now());
        self.store.upsert_summary(&summary).await?;
        self.store.clear_dirty(bar_id, &summary.period_key, started).await?;
        info!(
            bar_id,
            period_key = %summary.period_key,
            rows = rows.len(),
            net_revenue = summary.net_revenue,
            "summary recomputed"
        );
        Ok(summary)
    }

    /// Bars named in the registry plus any the store already holds data for.
    pub async fn known_bars(&self) -> Result<Vec<BarId>, SyncError> {
        let mut bars: BTreeSet<BarId> = self.store.known_bars().await?.into_iter().collect();
        bars.extend(self.registry.enabled_bars().map(|b| b.bar_id));
        Ok(bars.into_iter().collect())
    }

    /// Recompute the trailing weekly periods ending with the one containing
    /// `today`, for one bar or every known bar, dirty or not.
    pub async fn recompute_all(
        &self,
        bar_id: Option<BarId>,
        limit_periods: Option<usize>,
        today: NaiveDate,
    ) -> Result<RecomputeReport, SyncError> {
        let count = match limit_periods {
            None => self.trailing_periods,
            Some(n) if (1..=MAX_TRAILING_PERIODS).contains(&n) => n,
            Some(n) => {
                return Err(SyncError::InvalidInput(format!(
                    "limit_periods must be between 1 and {MAX_TRAILING_PERIODS}, got {n}"
                )))
            }
        };
        let bars = match bar_id {
            Some(bar_id) => vec![bar_id],
            None => self.known_bars().await?,
        };
        let periods = Period::containing(today, Granularity::Week).trailing(count);

        let mut report = RecomputeReport::default();
        for bar_id in bars {
            for period in &periods {
                self.record(&mut report, bar_id, &period.key()).await;
            }
        }
        Ok(report)
    }

    /// Recompute only periods whose inputs changed since their last
    /// computation. `bar_ids` restricts the scan when given.
    pub async fn recompute_dirty(
        &self,
        bar_ids: Option<&[BarId]>,
        limit: usize,
    ) -> Result<RecomputeReport, SyncError> {
        let dirty = self.store.dirty_periods(bar_ids, limit).await?;
        let mut report = RecomputeReport::default();
        for period in dirty {
            self.record(&mut report, period.bar_id, &period.period_key).await;
        }
        Ok(report)
    }

    async fn record(&self, report: &mut RecomputeReport, bar_id: BarId, period_key: &str) {
        match self.recompute(bar_id, period_key).await {
            Ok(summary) => {
                report.recalculated += 1;
                report.periods.push(format!("{bar_id}:{}", summary.period_key));
            }
            Err(err) => {
                warn!(bar_id, period_key, error = %err, "recompute failed");
                report.errors.push(format!("bar {bar_id} {period_key}: {err}"));
            }
        }
    }

    /// Set one metric on a stored summary by hand and append the audit row.
    /// The next recompute replaces the value.
    pub async fn override_field(
        &self,
        bar_id: BarId,
        period_key: &str,
        field: SummaryField,
        value: Option<f64>,
        reason: &str,
        actor: &str,
    ) -> Result<PeriodSummary, SyncError> {
        let period: Period = period_key.parse()?;
        if reason.trim().is_empty() {
            return Err(SyncError::InvalidInput("override reason is required".into()));
        }
        if actor.trim().is_empty() {
            return Err(SyncError::InvalidInput("override actor is required".into()));
        }
        let monetary = matches!(
            field,
            SummaryField::NetRevenue | SummaryField::Consumption | SummaryField::LaborCost
        );
        if monetary && value.is_none() {
            return Err(SyncError::InvalidInput(format!("{} cannot be null", field.as_str())));
        }
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(SyncError::InvalidInput("override value must be finite".into()));
        }

        let key = period.key();
        let mut summary = self
            .store
            .get_summary(bar_id, &key)
            .await?
            .ok_or_else(|| SyncError::InvalidInput(format!("no summary for bar {bar_id} period {key}")))?;

        let previous_value = field.get(&summary);
        field.set(&mut summary, value);
        let audit = SummaryOverride {
            bar_id,
            period_key: key,
            field,
            previous_value,
            new_value: value,
            reason: reason.trim().to_string(),
            actor: actor.trim().to_string(),
            overridden_at: Utc::now(),
        };
        self.store.apply_override(&summary, &audit).await?;
        info!(bar_id, period_key = %audit.period_key, field = field.as_str(), actor = %audit.actor, "summary overridden");
        Ok(summary)
    }
}
