//! Remote feed reconciliation: fetch, decode and upsert opportunities without touching
//! local user state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gscholar_core::{Opportunity, OpportunityRecord};
use gscholar_storage::{HttpClientConfig, HttpFetcher, RecordStore, StoreError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod seed;

pub use seed::{load_seed_file, seed_if_empty, SeedFile, SeedReport};

pub const CRATE_NAME: &str = "gscholar-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("feed payload is malformed: {0}")]
    MalformedFeed(#[source] serde_json::Error),
    #[error("fetching feed from {origin} failed: {reason}")]
    FetchFailed { origin: String, reason: String },
    #[error("a sync is already in flight")]
    Busy,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub feed_url: Option<String>,
    pub feed_file: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub sync_timeout_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("GSCHOLAR_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            feed_url: non_empty_var("GSCHOLAR_FEED_URL"),
            feed_file: non_empty_var("GSCHOLAR_FEED_FILE").map(PathBuf::from),
            seed_file: non_empty_var("GSCHOLAR_SEED_FILE").map(PathBuf::from),
            user_agent: std::env::var("GSCHOLAR_USER_AGENT")
                .unwrap_or_else(|_| "gscholar/0.1".to_string()),
            http_timeout_secs: parsed_var("GSCHOLAR_HTTP_TIMEOUT_SECS").unwrap_or(20),
            sync_timeout_secs: parsed_var("GSCHOLAR_SYNC_TIMEOUT_SECS").unwrap_or(30),
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    /// The configured feed: a remote URL wins over a local file; `None` when neither is set.
    pub fn feed_source(&self) -> anyhow::Result<Option<Arc<dyn FeedSource>>> {
        if let Some(url) = &self.feed_url {
            let fetcher = HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(self.http_timeout_secs),
                user_agent: Some(self.user_agent.clone()),
                ..Default::default()
            })
            .with_context(|| format!("building http client for {url}"))?;
            return Ok(Some(Arc::new(HttpFeed::new(fetcher, url.clone()))));
        }
        Ok(self
            .feed_file
            .as_ref()
            .map(|path| Arc::new(FileFeed::new(path.clone())) as Arc<dyn FeedSource>))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Where feed bytes come from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Human-readable origin for logs and errors.
    fn origin(&self) -> String;

    async fn fetch(&self) -> Result<Vec<u8>, SyncError>;
}

pub struct HttpFeed {
    fetcher: HttpFetcher,
    url: String,
}

impl HttpFeed {
    pub fn new(fetcher: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    fn origin(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<Vec<u8>, SyncError> {
        self.fetcher
            .fetch_bytes(&self.url)
            .await
            .map(|resp| resp.body)
            .map_err(|err| SyncError::FetchFailed {
                origin: self.origin(),
                reason: err.to_string(),
            })
    }
}

/// A feed bundled on disk, e.g. the scraper's `opportunities.json`.
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeedSource for FileFeed {
    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<Vec<u8>, SyncError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|err| SyncError::FetchFailed {
                origin: self.origin(),
                reason: err.to_string(),
            })
    }
}

/// Decodes a feed payload: a JSON array of opportunity records.
pub fn decode_feed(payload: &[u8]) -> Result<Vec<OpportunityRecord>, SyncError> {
    serde_json::from_slice(payload).map_err(SyncError::MalformedFeed)
}

pub fn payload_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// What a second caller does while a sync is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    Wait,
    #[default]
    SkipIfBusy,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub origin: String,
    pub payload_sha256: String,
    pub records: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug)]
pub enum SyncOutcome {
    Applied(SyncSummary),
    Skipped,
    Failed(SyncError),
}

impl SyncOutcome {
    pub fn summary(&self) -> Option<&SyncSummary> {
        match self {
            SyncOutcome::Applied(summary) => Some(summary),
            _ => None,
        }
    }
}

pub struct SyncEngine {
    store: Arc<RecordStore>,
    source: Arc<dyn FeedSource>,
    timeout: Option<Duration>,
    in_flight: Mutex<()>,
}

impl SyncEngine {
    pub fn new(store: Arc<RecordStore>, source: Arc<dyn FeedSource>) -> Self {
        Self {
            store,
            source,
            timeout: None,
            in_flight: Mutex::new(()),
        }
    }

    /// Bounds the fetch; expiry surfaces as `FetchFailed`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn origin(&self) -> String {
        self.source.origin()
    }

    /// Runs fetch, decode and upsert. Failures before the upsert leave the store untouched.
    pub async fn sync_now(&self, mode: SyncMode) -> Result<SyncSummary, SyncError> {
        let _in_flight = match mode {
            SyncMode::Wait => self.in_flight.lock().await,
            SyncMode::SkipIfBusy => self.in_flight.try_lock().map_err(|_| SyncError::Busy)?,
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("feed_sync", %run_id, origin = %self.source.origin());
        self.run(run_id).instrument(span).await
    }

    /// Like `sync_now`, but never fails: errors are logged and local data stays as it was.
    pub async fn refresh(&self, mode: SyncMode) -> SyncOutcome {
        match self.sync_now(mode).await {
            Ok(summary) => SyncOutcome::Applied(summary),
            Err(SyncError::Busy) => {
                info!("sync already running; skipping this refresh");
                SyncOutcome::Skipped
            }
            Err(err) => {
                warn!(error = %err, "sync failed; keeping local data");
                SyncOutcome::Failed(err)
            }
        }
    }

    async fn run(&self, run_id: Uuid) -> Result<SyncSummary, SyncError> {
        let started_at = Utc::now();
        let origin = self.source.origin();

        let payload = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.source.fetch())
                .await
                .map_err(|_| SyncError::FetchFailed {
                    origin: origin.clone(),
                    reason: format!("timed out after {}ms", limit.as_millis()),
                })??,
            None => self.source.fetch().await?,
        };
        let payload_sha256 = payload_sha256(&payload);

        let records = decode_feed(&payload)?;
        let count = records.len();
        let opportunities: Vec<Opportunity> =
            records.into_iter().map(Opportunity::from_remote).collect();
        let report = self.store.upsert_batch(opportunities).await?;

        let summary = SyncSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            origin,
            payload_sha256,
            records: count,
            inserted: report.inserted,
            updated: report.updated,
            unchanged: report.unchanged,
        };
        info!(
            records = summary.records,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            sha256 = %summary.payload_sha256,
            "feed synced"
        );
        Ok(summary)
    }
}
