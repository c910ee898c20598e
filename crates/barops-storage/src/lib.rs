//! Persistence and outbound HTTP for the bar operations pipeline.

mod http;
mod memory;
mod postgres;
mod store;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, OutboundRequest, RetryDisposition,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{
    dedup_key, payload_hash, sha256_hex, RawUpsertStats, RawVersion, Store, StoreError,
};

pub const CRATE_NAME: &str = "barops-storage";
