use std::path::PathBuf;
use std::time::Duration;

use barops_storage::{BackoffPolicy, HttpClientConfig};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Postgres URL; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub registry_path: PathBuf,
    pub dispatch_base_url: Option<String>,
    pub service_token: Option<String>,
    pub cron_secret: Option<String>,
    pub notify_webhook: Option<String>,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub user_agent: String,
    pub page_delay_ms: u64,
    pub max_pages: u32,
    pub process_batch: usize,
    pub insert_chunk: usize,
    pub drain_max_rounds: usize,
    pub trailing_periods: usize,
    pub scheduler_enabled: bool,
    pub daily_cron: String,
    pub web_port: u16,
    pub pair_timeout_secs: u64,
    pub job_timeout_secs: u64,
    pub lease_ttl_secs: u64,
    pub stale_run_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: non_empty(lookup("DATABASE_URL")),
            registry_path: non_empty(lookup("BAROPS_REGISTRY"))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("bars.yaml")),
            dispatch_base_url: non_empty(lookup("BAROPS_DISPATCH_BASE_URL")),
            service_token: non_empty(lookup("BAROPS_SERVICE_TOKEN")),
            cron_secret: non_empty(lookup("CRON_SECRET")),
            notify_webhook: non_empty(lookup("BAROPS_NOTIFY_WEBHOOK")),
            http_timeout_secs: parsed(lookup("BAROPS_HTTP_TIMEOUT_SECS"), 30),
            http_max_retries: parsed(lookup("BAROPS_HTTP_MAX_RETRIES"), 0),
            user_agent: non_empty(lookup("BAROPS_USER_AGENT"))
                .unwrap_or_else(|| "barops-sync/0.1".to_string()),
            page_delay_ms: parsed(lookup("BAROPS_PAGE_DELAY_MS"), 250),
            max_pages: parsed(lookup("BAROPS_MAX_PAGES"), 50),
            process_batch: parsed(lookup("BAROPS_PROCESS_BATCH"), 1000),
            insert_chunk: parsed(lookup("BAROPS_INSERT_CHUNK"), 500),
            drain_max_rounds: parsed(lookup("BAROPS_DRAIN_MAX_ROUNDS"), 20),
            trailing_periods: parsed(lookup("BAROPS_TRAILING_PERIODS"), 4),
            scheduler_enabled: lookup("BAROPS_SCHEDULER_ENABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            daily_cron: non_empty(lookup("BAROPS_DAILY_CRON"))
                .unwrap_or_else(|| "0 0 6 * * *".to_string()),
            web_port: parsed(lookup("BAROPS_WEB_PORT"), 8080),
            pair_timeout_secs: parsed(lookup("BAROPS_PAIR_TIMEOUT_SECS"), 120),
            job_timeout_secs: parsed(lookup("BAROPS_JOB_TIMEOUT_SECS"), 3300),
            lease_ttl_secs: parsed(lookup("BAROPS_LEASE_TTL_SECS"), 3600),
            stale_run_secs: parsed(lookup("BAROPS_STALE_RUN_SECS"), 7200),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.http_max_retries,
                ..BackoffPolicy::default()
            },
            ..HttpClientConfig::default()
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn pair_timeout(&self) -> Duration {
        Duration::from_secs(self.pair_timeout_secs.max(1))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs.max(1))
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.lease_ttl_secs).unwrap_or(i64::MAX / 1000))
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_run_secs).unwrap_or(i64::MAX / 1000))
    }
}
