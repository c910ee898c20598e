//! Postgres-backed store. Queries are runtime-checked so the crate builds
//! without a live database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use barops_core::{
    BarId, DateWindow, DirtyPeriod, NewRawRecord, NormalizedRecord, PeriodSummary, RawRecord,
    RunCounts, RunStatus, StepRecord, SummaryField, SummaryOverride, SyncRun,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::store::{dedup_key, payload_hash, RawUpsertStats, RawVersion, Store, StoreError};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn raw_from_row(row: &PgRow) -> Result<RawRecord, StoreError> {
    Ok(RawRecord {
        id: row.try_get("id")?,
        source_system: row.try_get("source_system")?,
        bar_id: row.try_get("bar_id")?,
        business_date: row.try_get("business_date")?,
        external_id: row.try_get("external_id")?,
        payload_hash: row.try_get("payload_hash")?,
        payload: row.try_get("payload")?,
        received_at: row.try_get("received_at")?,
        processed: row.try_get("processed")?,
        processed_at: row.try_get("processed_at")?,
        error: row.try_get("error")?,
    })
}

fn normalized_from_row(row: &PgRow) -> Result<NormalizedRecord, StoreError> {
    let body: JsonValue = row.try_get("body")?;
    Ok(NormalizedRecord {
        raw_id: row.try_get("raw_id")?,
        source_system: row.try_get("source_system")?,
        bar_id: row.try_get("bar_id")?,
        natural_key: row.try_get("natural_key")?,
        business_date: row.try_get("business_date")?,
        period_key: row.try_get("period_key")?,
        body: serde_json::from_value(body)?,
    })
}

fn count_from_row(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let value: i32 = row.try_get(column)?;
    Ok(u32::try_from(value).unwrap_or_default())
}

fn summary_from_row(row: &PgRow) -> Result<PeriodSummary, StoreError> {
    Ok(PeriodSummary {
        bar_id: row.try_get("bar_id")?,
        period_key: row.try_get("period_key")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        net_revenue: row.try_get("net_revenue")?,
        sales_revenue: row.try_get("sales_revenue")?,
        ticket_revenue: row.try_get("ticket_revenue")?,
        consumption: row.try_get("consumption")?,
        labor_cost: row.try_get("labor_cost")?,
        cmv_pct: row.try_get("cmv_pct")?,
        cmo_pct: row.try_get("cmo_pct")?,
        ticket_count: count_from_row(row, "ticket_count")?,
        checked_in_count: count_from_row(row, "checked_in_count")?,
        review_count: count_from_row(row, "review_count")?,
        avg_rating: row.try_get("avg_rating")?,
        computed_at: row.try_get("computed_at")?,
    })
}

fn override_from_row(row: &PgRow) -> Result<SummaryOverride, StoreError> {
    let field: String = row.try_get("field")?;
    Ok(SummaryOverride {
        bar_id: row.try_get("bar_id")?,
        period_key: row.try_get("period_key")?,
        field: serde_json::from_value::<SummaryField>(JsonValue::String(field))?,
        previous_value: row.try_get("previous_value")?,
        new_value: row.try_get("new_value")?,
        reason: row.try_get("reason")?,
        actor: row.try_get("actor")?,
        overridden_at: row.try_get("overridden_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<SyncRun, StoreError> {
    let status: String = row.try_get("status")?;
    let steps: JsonValue = row.try_get("steps")?;
    let counts: JsonValue = row.try_get("counts")?;
    Ok(SyncRun {
        id: row.try_get("id")?,
        target: row.try_get("target")?,
        bar_id: row.try_get("bar_id")?,
        window: DateWindow {
            start: row.try_get("window_start")?,
            end: row.try_get("window_end")?,
        },
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        status: serde_json::from_value::<RunStatus>(JsonValue::String(status))?,
        steps: serde_json::from_value::<Vec<StepRecord>>(steps)?,
        counts: serde_json::from_value::<RunCounts>(counts)?,
        error: row.try_get("error")?,
    })
}

const SUMMARY_COLUMNS: &str = "bar_id, period_key, period_start, period_end, net_revenue, \
    sales_revenue, ticket_revenue, consumption, labor_cost, cmv_pct, cmo_pct, ticket_count, \
    checked_in_count, review_count, avg_rating, computed_at";

async fn write_summary<'e, E>(executor: E, summary: &PeriodSummary) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO period_summaries (
            bar_id, period_key, period_start, period_end, net_revenue, sales_revenue,
            ticket_revenue, consumption, labor_cost, cmv_pct, cmo_pct, ticket_count,
            checked_in_count, review_count, avg_rating, computed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (bar_id, period_key) DO UPDATE
           SET period_start = EXCLUDED.period_start,
               period_end = EXCLUDED.period_end,
               net_revenue = EXCLUDED.net_revenue,
               sales_revenue = EXCLUDED.sales_revenue,
               ticket_revenue = EXCLUDED.ticket_revenue,
               consumption = EXCLUDED.consumption,
               labor_cost = EXCLUDED.labor_cost,
               cmv_pct = EXCLUDED.cmv_pct,
               cmo_pct = EXCLUDED.cmo_pct,
               ticket_count = EXCLUDED.ticket_count,
               checked_in_count = EXCLUDED.checked_in_count,
               review_count = EXCLUDED.review_count,
               avg_rating = EXCLUDED.avg_rating,
               computed_at = EXCLUDED.computed_at
        "#,
    )
    .bind(summary.bar_id)
    .bind(&summary.period_key)
    .bind(summary.period_start)
    .bind(summary.period_end)
    .bind(summary.net_revenue)
    .bind(summary.sales_revenue)
    .bind(summary.ticket_revenue)
    .bind(summary.consumption)
    .bind(summary.labor_cost)
    .bind(summary.cmv_pct)
    .bind(summary.cmo_pct)
    .bind(i32::try_from(summary.ticket_count).unwrap_or(i32::MAX))
    .bind(i32::try_from(summary.checked_in_count).unwrap_or(i32::MAX))
    .bind(i32::try_from(summary.review_count).unwrap_or(i32::MAX))
    .bind(summary.avg_rating)
    .bind(summary.computed_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_raw(&self, records: &[NewRawRecord]) -> Result<RawUpsertStats, StoreError> {
        let mut stats = RawUpsertStats::default();
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for record in records {
            let hash = payload_hash(&record.payload);
            let key = dedup_key(record, &hash);
            let row = sqlx::query(
                r#"
                INSERT INTO raw_records (
                    id, source_system, bar_id, business_date, external_id, dedup_key,
                    payload_hash, payload, received_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (source_system, bar_id, business_date, dedup_key) DO UPDATE
                   SET payload = EXCLUDED.payload,
                       payload_hash = EXCLUDED.payload_hash,
                       received_at = EXCLUDED.received_at,
                       processed = FALSE,
                       processed_at = NULL,
                       error = NULL
                 WHERE raw_records.payload_hash <> EXCLUDED.payload_hash
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&record.source_system)
            .bind(record.bar_id)
            .bind(record.business_date)
            .bind(&record.external_id)
            .bind(&key)
            .bind(&hash)
            .bind(&record.payload)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            match row {
                Some(row) if row.try_get::<bool, _>("inserted")? => stats.inserted += 1,
                Some(_) => stats.updated += 1,
                None => stats.unchanged += 1,
            }
        }

        tx.commit().await?;
        debug!(?stats, "raw upsert committed");
        Ok(stats)
    }

    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_system, bar_id, business_date, external_id, payload_hash,
                   payload, received_at, processed, processed_at, error
              FROM raw_records
             WHERE NOT processed
             ORDER BY received_at, id
             LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(raw_from_row).collect()
    }

    async fn list_raw(&self, bar_id: BarId) -> Result<Vec<RawRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_system, bar_id, business_date, external_id, payload_hash,
                   payload, received_at, processed, processed_at, error
              FROM raw_records
             WHERE bar_id = $1
             ORDER BY received_at, id
            "#,
        )
        .bind(bar_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(raw_from_row).collect()
    }

    async fn mark_processed(
        &self,
        versions: &[RawVersion],
        error: Option<&str>,
    ) -> Result<u64, StoreError> {
        if versions.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = versions.iter().map(|v| v.id).collect();
        let hashes: Vec<String> = versions.iter().map(|v| v.payload_hash.clone()).collect();
        let result = sqlx::query(
            r#"
            UPDATE raw_records AS r
               SET processed = TRUE,
                   processed_at = NOW(),
                   error = $3
              FROM UNNEST($1::uuid[], $2::text[]) AS v(id, payload_hash)
             WHERE r.id = v.id
               AND r.payload_hash = v.payload_hash
            "#,
        )
        .bind(ids)
        .bind(hashes)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_normalized(&self, rows: &[NormalizedRecord]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        // One statement cannot touch the same conflict key twice; last row wins.
        let mut latest: BTreeMap<(&str, BarId, &str), &NormalizedRecord> = BTreeMap::new();
        for row in rows {
            latest.insert((&row.source_system, row.bar_id, &row.natural_key), row);
        }

        let mut source_systems = Vec::with_capacity(latest.len());
        let mut bar_ids = Vec::with_capacity(latest.len());
        let mut natural_keys = Vec::with_capacity(latest.len());
        let mut raw_ids = Vec::with_capacity(latest.len());
        let mut business_dates = Vec::with_capacity(latest.len());
        let mut period_keys = Vec::with_capacity(latest.len());
        let mut kinds = Vec::with_capacity(latest.len());
        let mut bodies = Vec::with_capacity(latest.len());
        let mut dirty: BTreeMap<(BarId, String), ()> = BTreeMap::new();

        for row in latest.values() {
            source_systems.push(row.source_system.clone());
            bar_ids.push(row.bar_id);
            natural_keys.push(row.natural_key.clone());
            raw_ids.push(row.raw_id);
            business_dates.push(row.business_date);
            period_keys.push(row.period_key.clone());
            kinds.push(row.body.kind().to_string());
            bodies.push(serde_json::to_value(&row.body)?);
            dirty.insert((row.bar_id, row.period_key.clone()), ());
        }

        let mut tx = self.pool.begin().await?;

        // A row re-keyed to another period leaves its old period stale too.
        let moved = sqlx::query(
            r#"
            SELECT n.bar_id, n.period_key
              FROM normalized_records n
              JOIN UNNEST($1::text[], $2::bigint[], $3::text[], $4::text[])
                   AS k(source_system, bar_id, natural_key, period_key)
                ON n.source_system = k.source_system
               AND n.bar_id = k.bar_id
               AND n.natural_key = k.natural_key
             WHERE n.period_key <> k.period_key
               FOR UPDATE OF n
            "#,
        )
        .bind(&source_systems)
        .bind(&bar_ids)
        .bind(&natural_keys)
        .bind(&period_keys)
        .fetch_all(&mut *tx)
        .await?;
        for row in &moved {
            dirty.insert((row.try_get("bar_id")?, row.try_get("period_key")?), ());
        }

        let result = sqlx::query(
            r#"
            INSERT INTO normalized_records (
                source_system, bar_id, natural_key, raw_id, business_date, period_key, kind, body
            )
            SELECT * FROM UNNEST(
                $1::text[], $2::bigint[], $3::text[], $4::uuid[], $5::date[], $6::text[],
                $7::text[], $8::jsonb[]
            )
            ON CONFLICT (source_system, bar_id, natural_key) DO UPDATE
               SET raw_id = EXCLUDED.raw_id,
                   business_date = EXCLUDED.business_date,
                   period_key = EXCLUDED.period_key,
                   kind = EXCLUDED.kind,
                   body = EXCLUDED.body,
                   updated_at = NOW()
            "#,
        )
        .bind(source_systems)
        .bind(bar_ids)
        .bind(natural_keys)
        .bind(raw_ids)
        .bind(business_dates)
        .bind(period_keys)
        .bind(kinds)
        .bind(bodies)
        .execute(&mut *tx)
        .await?;

        let now = Utc::now();
        for (bar_id, period_key) in dirty.keys() {
            sqlx::query(
                r#"
                INSERT INTO dirty_periods (bar_id, period_key, marked_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (bar_id, period_key) DO UPDATE SET marked_at = EXCLUDED.marked_at
                "#,
            )
            .bind(bar_id)
            .bind(period_key)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn count_normalized(&self, bar_id: BarId) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM normalized_records WHERE bar_id = $1")
            .bind(bar_id)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    async fn normalized_in_range(
        &self,
        bar_id: BarId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NormalizedRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT source_system, bar_id, natural_key, raw_id, business_date, period_key, body
              FROM normalized_records
             WHERE bar_id = $1
               AND business_date BETWEEN $2 AND $3
             ORDER BY business_date, source_system, natural_key
            "#,
        )
        .bind(bar_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(normalized_from_row).collect()
    }

    async fn known_bars(&self) -> Result<Vec<BarId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT bar_id FROM raw_records
            UNION
            SELECT bar_id FROM period_summaries
            ORDER BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("bar_id").map_err(StoreError::from))
            .collect()
    }

    async fn upsert_summary(&self, summary: &PeriodSummary) -> Result<(), StoreError> {
        write_summary(&self.pool, summary).await
    }

    async fn get_summary(
        &self,
        bar_id: BarId,
        period_key: &str,
    ) -> Result<Option<PeriodSummary>, StoreError> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM period_summaries WHERE bar_id = $1 AND period_key = $2"
        );
        let row = sqlx::query(&sql)
            .bind(bar_id)
            .bind(period_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    async fn list_summaries(
        &self,
        bar_id: BarId,
        limit: usize,
    ) -> Result<Vec<PeriodSummary>, StoreError> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM period_summaries WHERE bar_id = $1 \
             ORDER BY period_start DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(bar_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn apply_override(
        &self,
        summary: &PeriodSummary,
        audit: &SummaryOverride,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_summary(&mut *tx, summary).await?;
        sqlx::query(
            r#"
            INSERT INTO summary_overrides (
                bar_id, period_key, field, previous_value, new_value, reason, actor, overridden_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(audit.bar_id)
        .bind(&audit.period_key)
        .bind(audit.field.as_str())
        .bind(audit.previous_value)
        .bind(audit.new_value)
        .bind(&audit.reason)
        .bind(&audit.actor)
        .bind(audit.overridden_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_overrides(
        &self,
        bar_id: BarId,
        period_key: &str,
    ) -> Result<Vec<SummaryOverride>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT bar_id, period_key, field, previous_value, new_value, reason, actor,
                   overridden_at
              FROM summary_overrides
             WHERE bar_id = $1 AND period_key = $2
             ORDER BY id
            "#,
        )
        .bind(bar_id)
        .bind(period_key)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(override_from_row).collect()
    }

    async fn dirty_periods(
        &self,
        bar_ids: Option<&[BarId]>,
        limit: usize,
    ) -> Result<Vec<DirtyPeriod>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT bar_id, period_key, marked_at
              FROM dirty_periods
             WHERE ($1::bigint[] IS NULL OR bar_id = ANY($1))
             ORDER BY marked_at
             LIMIT $2
            "#,
        )
        .bind(bar_ids.map(<[BarId]>::to_vec))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(DirtyPeriod {
                    bar_id: row.try_get("bar_id")?,
                    period_key: row.try_get("period_key")?,
                    marked_at: row.try_get("marked_at")?,
                })
            })
            .collect()
    }

    async fn clear_dirty(
        &self,
        bar_id: BarId,
        period_key: &str,
        marked_before: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM dirty_periods
             WHERE bar_id = $1 AND period_key = $2 AND marked_at <= $3
            "#,
        )
        .bind(bar_id)
        .bind(period_key)
        .bind(marked_before)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_begin_run(&self, run: &SyncRun, stale_after: Duration) -> Result<bool, StoreError> {
        let cutoff = Utc::now() - stale_after;
        sqlx::query(
            r#"
            UPDATE sync_runs
               SET status = 'timed_out',
                   finished_at = NOW(),
                   error = 'stale running run superseded'
             WHERE status = 'running'
               AND target = $1
               AND bar_id IS NOT DISTINCT FROM $2
               AND window_start = $3
               AND window_end = $4
               AND started_at < $5
            "#,
        )
        .bind(&run.target)
        .bind(run.bar_id)
        .bind(run.window.start)
        .bind(run.window.end)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        match self.save_run(run).await {
            Ok(()) => Ok(true),
            Err(StoreError::Database(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn save_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, target, bar_id, window_start, window_end, started_at, finished_at,
                status, steps, counts, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE
               SET finished_at = EXCLUDED.finished_at,
                   status = EXCLUDED.status,
                   steps = EXCLUDED.steps,
                   counts = EXCLUDED.counts,
                   error = EXCLUDED.error
            "#,
        )
        .bind(run.id)
        .bind(&run.target)
        .bind(run.bar_id)
        .bind(run.window.start)
        .bind(run.window.end)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.status.as_str())
        .bind(serde_json::to_value(&run.steps)?)
        .bind(serde_json::to_value(run.counts)?)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<SyncRun>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, target, bar_id, window_start, window_end, started_at, finished_at,
                   status, steps, counts, error
              FROM sync_runs
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, target, bar_id, window_start, window_end, started_at, finished_at,
                   status, steps, counts, error
              FROM sync_runs
             ORDER BY started_at DESC
             LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn acquire_lease(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO job_leases (name, holder, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE
               SET holder = EXCLUDED.holder,
                   expires_at = EXCLUDED.expires_at
             WHERE job_leases.expires_at <= $4
                OR job_leases.holder = EXCLUDED.holder
            RETURNING holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(now + ttl)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn release_lease(&self, name: &str, holder: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM job_leases WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
