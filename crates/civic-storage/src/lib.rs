//! Issue persistence + HTTP fetch utilities for the civic issue radar.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civic_core::{IssueRecord, Sentiment, SourceKind};
use reqwest::StatusCode;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "civic-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row for {url}: {reason}")]
    Corrupt { url: String, reason: String },
}

/// Result of an insert. A second insert for a known `url` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    Duplicate,
}

/// Sole authority on duplicate detection, keyed by `IssueRecord::url`.
#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn find_by_url(&self, url: &str) -> Result<Option<IssueRecord>, StoreError>;

    async fn insert(&self, record: &IssueRecord) -> Result<InsertOutcome, StoreError>;

    /// Every stored record, oldest ingestion first.
    async fn list_all(&self) -> Result<Vec<IssueRecord>, StoreError>;

    /// Newest ingestion first.
    async fn recent(&self, limit: usize) -> Result<Vec<IssueRecord>, StoreError>;
}

/// Process-local store used by tests and DB-less runs.
#[derive(Debug, Default)]
pub struct MemoryIssueStore {
    records: Mutex<Vec<(Uuid, IssueRecord)>>,
}

impl MemoryIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl IssueStore for MemoryIssueStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<IssueRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|(_, r)| r.url == url)
            .map(|(_, r)| r.clone()))
    }

    async fn insert(&self, record: &IssueRecord) -> Result<InsertOutcome, StoreError> {
        let mut records = self.records.lock().await;
        if records.iter().any(|(_, r)| r.url == record.url) {
            return Ok(InsertOutcome::Duplicate);
        }
        let id = Uuid::new_v4();
        records.push((id, record.clone()));
        Ok(InsertOutcome::Inserted(id))
    }

    async fn list_all(&self) -> Result<Vec<IssueRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.iter().map(|(_, r)| r.clone()).collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<IssueRecord>, StoreError> {
        let mut all = self.list_all().await?;
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        Ok(all)
    }
}

const SELECT_COLUMNS: &str = "issue_type, city, area, latitude, longitude, sentiment, post_text, \
                              url, author, created_at, source, ingested_at";

/// Postgres-backed store. `url` carries a UNIQUE constraint, so concurrent
/// inserts of the same url collapse into one row.
#[derive(Debug, Clone)]
pub struct PgIssueStore {
    pool: PgPool,
}

impl PgIssueStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<IssueRecord, StoreError> {
    let url: String = row.try_get("url")?;
    let source_label: String = row.try_get("source")?;
    let source = source_label
        .parse::<SourceKind>()
        .map_err(|reason| StoreError::Corrupt {
            url: url.clone(),
            reason,
        })?;
    let sentiment: String = row.try_get("sentiment")?;
    Ok(IssueRecord {
        issue_type: row.try_get("issue_type")?,
        city: row.try_get("city")?,
        area: row.try_get("area")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        sentiment: Sentiment::parse_loose(&sentiment),
        post_text: row.try_get("post_text")?,
        url,
        author: row.try_get("author")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        source,
        timestamp: row.try_get::<DateTime<Utc>, _>("ingested_at")?,
    })
}

#[async_trait]
impl IssueStore for PgIssueStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<IssueRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM issues WHERE url = $1"))
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert(&self, record: &IssueRecord) -> Result<InsertOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO issues (
                id, issue_type, city, area, latitude, longitude, sentiment,
                post_text, url, author, created_at, source, ingested_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.issue_type)
        .bind(&record.city)
        .bind(&record.area)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.sentiment.as_str())
        .bind(&record.post_text)
        .bind(&record.url)
        .bind(&record.author)
        .bind(record.created_at)
        .bind(record.source.label())
        .bind(record.timestamp)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(InsertOutcome::Inserted(row.try_get("id")?)),
            None => Ok(InsertOutcome::Duplicate),
        }
    }

    async fn list_all(&self) -> Result<Vec<IssueRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM issues ORDER BY ingested_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<IssueRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM issues ORDER BY ingested_at DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Shared HTTP client with a bounded per-request timeout and capped retries.
/// Requests run strictly one at a time from the batch loop, so there is no
/// concurrency limiting here.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    /// Underlying client, for callers that need POST bodies or custom headers.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn fetch_bytes(&self, source_id: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse { body });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(status = status.as_u16(), attempt, "retrying after status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying after request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}
