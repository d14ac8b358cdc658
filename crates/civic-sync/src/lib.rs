//! Resumable, rate-limited ingestion of civic issue mentions.

pub mod classifier;
pub mod cursor;
pub mod geocode;
pub mod orchestrator;
pub mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use civic_adapters::{NewsListingAdapter, RedditSearchAdapter};
use civic_core::{Coordinates, TargetCity, DEFAULT_KEYWORDS, DEFAULT_SUBREDDITS};
use civic_storage::{HttpClientConfig, HttpFetcher, IssueStore, MemoryIssueStore, PgIssueStore};
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub use classifier::{Classification, ClassifyFailure, Classifier, ClassifierConfig, GeminiClient, TextGenerator};
pub use cursor::{Phase, ScrapeCursor};
pub use geocode::{GeoResolution, GeocodeCache, GeocodeError, Geocoder, NominatimGeocoder};
pub use orchestrator::{BatchOrchestrator, BatchRunner, BatchSettings, ItemOutcome, OrchestratorDeps};
pub use stats::{RunGuard, RunStats};

pub const CRATE_NAME: &str = "civic-sync";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("keyword vocabulary is empty")]
    EmptyVocabulary,
    #[error("blank entry in {0}")]
    BlankEntry(&'static str),
}

/// Ordered keywords (sweep order) and forum sub-sources.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Vocabulary {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub subreddits: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            subreddits: DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Vocabulary {
    pub fn new(keywords: Vec<String>, subreddits: Vec<String>) -> Result<Self, ConfigError> {
        let vocabulary = Self {
            keywords,
            subreddits,
        };
        vocabulary.validate()?;
        Ok(vocabulary)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keywords.is_empty() {
            return Err(ConfigError::EmptyVocabulary);
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::BlankEntry("keywords"));
        }
        if self.subreddits.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::BlankEntry("subreddits"));
        }
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let vocabulary: Vocabulary = serde_yaml::from_str(yaml).context("parsing vocabulary yaml")?;
        vocabulary.validate()?;
        Ok(vocabulary)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: Option<String>,
    pub target_city: TargetCity,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub batch_size: usize,
    pub items_per_query: usize,
    pub item_pacing: Duration,
    pub classifier_pacing: Duration,
    pub rate_limit_backoff: Duration,
    pub geocode_pacing: Duration,
    pub scheduler_enabled: bool,
    pub batch_interval: Duration,
    pub vocabulary_path: Option<PathBuf>,
    pub news_listing_url: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let fallback = TargetCity::default();
        let target_city = TargetCity::new(
            env_string("CIVIC_TARGET_CITY", &fallback.name),
            env_string("CIVIC_TARGET_COUNTRY", &fallback.country),
            Coordinates::new(
                env_parse("CIVIC_DEFAULT_LAT", fallback.center.latitude),
                env_parse("CIVIC_DEFAULT_LON", fallback.center.longitude),
            ),
        );
        Self {
            database_url: env_optional("DATABASE_URL"),
            target_city,
            gemini_api_key: env_optional("GEMINI_API_KEY"),
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.0-flash"),
            user_agent: env_string("CIVIC_USER_AGENT", "civic-issues-radar/0.1"),
            http_timeout_secs: env_parse("CIVIC_HTTP_TIMEOUT_SECS", 10),
            batch_size: env_parse("CIVIC_BATCH_SIZE", 3),
            items_per_query: env_parse("CIVIC_ITEMS_PER_QUERY", 3),
            item_pacing: Duration::from_millis(env_parse("CIVIC_ITEM_PACING_MS", 2000)),
            classifier_pacing: Duration::from_millis(env_parse("CIVIC_CLASSIFIER_PACING_MS", 2000)),
            rate_limit_backoff: Duration::from_secs(env_parse("CIVIC_RATE_LIMIT_BACKOFF_SECS", 30)),
            geocode_pacing: Duration::from_millis(env_parse("CIVIC_GEOCODE_PACING_MS", 1000)),
            scheduler_enabled: std::env::var("CIVIC_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
            batch_interval: Duration::from_secs(env_parse("CIVIC_BATCH_INTERVAL_SECS", 600)),
            vocabulary_path: env_optional("CIVIC_VOCABULARY_PATH").map(PathBuf::from),
            news_listing_url: env_string(
                "CIVIC_NEWS_LISTING_URL",
                "https://timesofindia.indiatimes.com/city/mumbai",
            ),
        }
    }

    pub fn vocabulary(&self) -> Result<Vocabulary> {
        match &self.vocabulary_path {
            Some(path) => Vocabulary::load(path),
            None => Ok(Vocabulary::default()),
        }
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.batch_size.max(1),
            items_per_query: self.items_per_query.max(1),
            item_pacing: self.item_pacing,
            ..BatchSettings::default()
        }
    }
}

/// Postgres when `DATABASE_URL` is set (migrations applied), otherwise a
/// process-local store.
pub async fn open_store(config: &PipelineConfig) -> Result<Arc<dyn IssueStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgIssueStore::connect(url).await?;
            store.migrate().await.context("running issue store migrations")?;
            info!("using postgres issue store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, issues are kept in memory only");
            Ok(Arc::new(MemoryIssueStore::new()))
        }
    }
}

/// Wires the production adapters, classifier and geocoder around `store`.
pub fn build_orchestrator(config: &PipelineConfig, store: Arc<dyn IssueStore>) -> Result<BatchOrchestrator> {
    let vocabulary = config.vocabulary()?;
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })?;

    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY not set, every classification will fall back to no issue");
    }
    let generator = GeminiClient::new(&http, config.gemini_api_key.clone(), &config.gemini_model);
    let classifier = Classifier::new(
        Arc::new(generator),
        ClassifierConfig {
            target_city: config.target_city.name.clone(),
            pacing: config.classifier_pacing,
            rate_limit_backoff: config.rate_limit_backoff,
        },
    );
    let geocoder = GeocodeCache::new(
        Arc::new(NominatimGeocoder::new(http.clone())),
        config.target_city.clone(),
        config.geocode_pacing,
    );

    info!(
        city = %config.target_city.name,
        keywords = vocabulary.keywords.len(),
        subreddits = vocabulary.subreddits.len(),
        "pipeline configured"
    );

    Ok(BatchOrchestrator::new(
        vocabulary,
        config.target_city.clone(),
        config.batch_settings(),
        OrchestratorDeps {
            http,
            forum: Arc::new(RedditSearchAdapter::default()),
            news: Arc::new(NewsListingAdapter::new(config.news_listing_url.clone())),
            classifier,
            geocoder,
            store,
        },
    ))
}

/// Periodic trigger: one batch of `runner.default_target()` every `interval`.
pub async fn build_scheduler(runner: Arc<dyn BatchRunner>, interval: Duration) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let runner = runner.clone();
        Box::pin(async move {
            let processed = runner.run_batch(runner.default_target()).await;
            info!(processed, "scheduled batch finished");
        })
    })
    .context("creating periodic batch job")?;
    sched.add(job).await.context("adding periodic batch job")?;
    Ok(sched)
}

/// Kicks off one batch in the background right after start-up.
pub fn spawn_initial_batch(runner: Arc<dyn BatchRunner>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        info!("starting initial batch in background");
        runner.run_batch(runner.default_target()).await
    })
}
