//! Bounded, resumable batch driver and the per-item ingestion pipeline.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use civic_adapters::{SearchTarget, SourceAdapter};
use civic_core::{
    truncate_chars, IssueRecord, RawItem, RunStatsSnapshot, TargetCity, POST_TEXT_MAX_CHARS,
};
use civic_storage::{HttpFetcher, InsertOutcome, IssueStore};
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::cursor::{Phase, ScrapeCursor};
use crate::geocode::{GeoResolution, GeocodeCache};
use crate::stats::RunStats;
use crate::Vocabulary;

/// Shortest text, in characters, worth classifying.
pub const MIN_TEXT_CHARS: usize = 10;

/// Anything that can run one bounded batch. The periodic trigger and the
/// manual HTTP trigger only see this.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    /// Returns the number of newly stored records; 0 when a batch is already running.
    async fn run_batch(&self, target_count: usize) -> usize;
    fn default_target(&self) -> usize;
    fn stats(&self) -> RunStatsSnapshot;
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub items_per_query: usize,
    pub item_pacing: Duration,
    pub recent_log_limit: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 3,
            items_per_query: 3,
            item_pacing: Duration::from_secs(2),
            recent_log_limit: 5,
        }
    }
}

/// Where one raw item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Invalid,
    Duplicate,
    NotRelevant,
    WrongCity,
    GeocodeFailed,
    StoreFailed,
    Stored(Uuid),
}

impl ItemOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, ItemOutcome::Stored(_))
    }
}

pub struct OrchestratorDeps {
    pub http: HttpFetcher,
    pub forum: Arc<dyn SourceAdapter>,
    pub news: Arc<dyn SourceAdapter>,
    pub classifier: Classifier,
    pub geocoder: GeocodeCache,
    pub store: Arc<dyn IssueStore>,
}

pub struct BatchOrchestrator {
    vocabulary: Vocabulary,
    target_city: TargetCity,
    settings: BatchSettings,
    http: HttpFetcher,
    forum: Arc<dyn SourceAdapter>,
    news: Arc<dyn SourceAdapter>,
    classifier: Classifier,
    geocoder: GeocodeCache,
    store: Arc<dyn IssueStore>,
    cursor: Mutex<ScrapeCursor>,
    stats: RunStats,
}

impl BatchOrchestrator {
    pub fn new(
        vocabulary: Vocabulary,
        target_city: TargetCity,
        settings: BatchSettings,
        deps: OrchestratorDeps,
    ) -> Self {
        Self {
            vocabulary,
            target_city,
            settings,
            http: deps.http,
            forum: deps.forum,
            news: deps.news,
            classifier: deps.classifier,
            geocoder: deps.geocoder,
            store: deps.store,
            cursor: Mutex::new(ScrapeCursor::new()),
            stats: RunStats::new(),
        }
    }

    pub fn run_stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn geocode_cache(&self) -> &GeocodeCache {
        &self.geocoder
    }

    pub async fn cursor(&self) -> ScrapeCursor {
        self.cursor.lock().await.clone()
    }

    /// Runs one batch. Never fails and never overlaps: a second caller while
    /// a batch is in flight gets 0 back without touching any state.
    pub async fn run_batch(&self, target_count: usize) -> usize {
        let Some(_guard) = self.stats.try_begin() else {
            warn!("batch already running, skipping");
            return 0;
        };
        self.stats.mark_last_run(Utc::now());

        let before = self.stats.snapshot();
        info!(
            target_count,
            scraped = before.total_scraped,
            stored = before.total_stored,
            errors = before.total_errors,
            "starting batch"
        );

        let processed = match AssertUnwindSafe(self.drive_batch(target_count))
            .catch_unwind()
            .await
        {
            Ok(processed) => processed,
            Err(_) => {
                self.stats.record_error();
                error!("batch aborted by an internal panic");
                0
            }
        };

        let after = self.stats.snapshot();
        info!(
            processed,
            scraped = after.total_scraped,
            stored = after.total_stored,
            duplicates = after.total_duplicates,
            errors = after.total_errors,
            "batch complete"
        );
        self.log_recent_issues().await;
        processed
    }

    async fn drive_batch(&self, target_count: usize) -> usize {
        let mut cursor = self.cursor.lock().await;
        let mut processed = 0;

        if cursor.phase == Phase::DiscussionForum {
            let forum = self.sweep_forum(&mut cursor, target_count).await;
            info!(processed = forum, "forum phase slice done");
            processed += forum;
        }

        if processed < target_count && cursor.phase == Phase::News {
            let news = self.sweep_news(&mut cursor, target_count - processed).await;
            info!(processed = news, "news phase slice done");
            processed += news;
        }

        processed
    }

    async fn sweep_forum(&self, cursor: &mut ScrapeCursor, target_count: usize) -> usize {
        let keywords = self.vocabulary.keywords.len();
        let sub_sources = self.vocabulary.subreddits.len();
        let mut processed = 0;

        while processed < target_count {
            let Some((keyword_index, source_index)) = cursor.forum_slot(keywords, sub_sources)
            else {
                break;
            };
            let target = SearchTarget::in_sub_source(
                &self.vocabulary.keywords[keyword_index],
                &self.vocabulary.subreddits[source_index],
            );
            processed += self
                .pull_slot(self.forum.as_ref(), &target, target_count - processed)
                .await;
            cursor.advance_forum(keywords, sub_sources);
        }

        if cursor.phase == Phase::News {
            info!("forum sweep finished, moving to news");
        }
        processed
    }

    async fn sweep_news(&self, cursor: &mut ScrapeCursor, target_count: usize) -> usize {
        let keywords = self.vocabulary.keywords.len();
        let mut processed = 0;

        while processed < target_count {
            let Some(keyword_index) = cursor.news_slot(keywords) else {
                cursor.reset();
                break;
            };
            let target = SearchTarget::keyword(&self.vocabulary.keywords[keyword_index]);
            processed += self
                .pull_slot(self.news.as_ref(), &target, target_count - processed)
                .await;
            if cursor.advance_news(keywords) {
                info!("completed full cycle, cursor reset");
                break;
            }
        }
        processed
    }

    /// One cursor slot. A panic in the adapter or an item counts one error and
    /// yields 0, so the caller still advances past the slot.
    async fn pull_slot(
        &self,
        adapter: &dyn SourceAdapter,
        target: &SearchTarget,
        remaining: usize,
    ) -> usize {
        match AssertUnwindSafe(self.pull_and_ingest(adapter, target, remaining))
            .catch_unwind()
            .await
        {
            Ok(stored) => stored,
            Err(_) => {
                self.stats.record_error();
                error!(
                    source = adapter.source_id(),
                    keyword = %target.keyword,
                    sub_source = target.sub_source.as_deref().unwrap_or("-"),
                    "slot aborted by a panic, moving on"
                );
                0
            }
        }
    }

    /// Pulls one capped page from `adapter` and routes each item until
    /// `remaining` records have been stored.
    async fn pull_and_ingest(
        &self,
        adapter: &dyn SourceAdapter,
        target: &SearchTarget,
        remaining: usize,
    ) -> usize {
        let items = match adapter
            .search(&self.http, target, self.settings.items_per_query)
            .await
        {
            Ok(items) => items,
            Err(err) => {
                self.stats.record_error();
                error!(
                    source = adapter.source_id(),
                    keyword = %target.keyword,
                    sub_source = target.sub_source.as_deref().unwrap_or("-"),
                    error = %err,
                    "source query failed"
                );
                return 0;
            }
        };

        if items.is_empty() {
            info!(
                source = adapter.source_id(),
                keyword = %target.keyword,
                sub_source = target.sub_source.as_deref().unwrap_or("-"),
                "no items found"
            );
            return 0;
        }

        let mut stored = 0;
        for item in items.into_iter().take(self.settings.items_per_query) {
            if stored >= remaining {
                break;
            }
            if self.ingest(item).await.is_stored() {
                stored += 1;
            }
            tokio::time::sleep(self.settings.item_pacing).await;
        }
        stored
    }

    /// Validity -> dedup -> classify -> relevance -> geocode -> persist,
    /// stopping at the first rejection.
    pub async fn ingest(&self, item: RawItem) -> ItemOutcome {
        if item.text.trim().chars().count() < MIN_TEXT_CHARS {
            debug!(url = %item.url, "skipping short or empty text");
            return ItemOutcome::Invalid;
        }
        self.stats.record_scraped();

        match self.store.find_by_url(&item.url).await {
            Ok(Some(_)) => {
                self.stats.record_duplicate();
                info!(url = %item.url, "skipped duplicate");
                return ItemOutcome::Duplicate;
            }
            Ok(None) => {}
            Err(err) => {
                self.stats.record_error();
                error!(url = %item.url, error = %err, "dedup lookup failed");
                return ItemOutcome::StoreFailed;
            }
        }

        info!(source = %item.source, text = truncate_chars(&item.text, 100), "classifying");
        let classification = self.classifier.classify(&item.text).await;
        self.stats.record_processed();
        if classification.failure.is_some() {
            self.stats.record_error();
        }
        let candidate = classification.candidate;

        let (Some(issue), Some(city)) = (candidate.relevant_issue(), candidate.city.as_deref())
        else {
            info!(
                issue = candidate.issue.as_deref().unwrap_or("-"),
                city = candidate.city.as_deref().unwrap_or("-"),
                "not relevant"
            );
            return ItemOutcome::NotRelevant;
        };
        if !self.target_city.matches(city) {
            info!(city, target = %self.target_city.name, "not in target city");
            return ItemOutcome::WrongCity;
        }

        let coords = match self.geocoder.resolve(city, candidate.area.as_deref()).await {
            GeoResolution::OutsideTarget => return ItemOutcome::WrongCity,
            GeoResolution::Failed(reason) => {
                self.stats.record_error();
                warn!(
                    city,
                    area = candidate.area.as_deref().unwrap_or("-"),
                    reason = %reason,
                    "could not geocode"
                );
                return ItemOutcome::GeocodeFailed;
            }
            resolved => match resolved.coordinates() {
                Some(coords) => coords,
                None => return ItemOutcome::GeocodeFailed,
            },
        };

        let record = IssueRecord {
            issue_type: issue.to_string(),
            city: city.to_string(),
            area: candidate.area.clone(),
            latitude: coords.latitude,
            longitude: coords.longitude,
            sentiment: candidate.sentiment,
            post_text: truncate_chars(&candidate.post_text, POST_TEXT_MAX_CHARS).to_string(),
            url: item.url,
            author: item.author,
            created_at: item.created_at,
            source: item.source,
            timestamp: Utc::now(),
        };

        match self.store.insert(&record).await {
            Ok(InsertOutcome::Inserted(id)) => {
                self.stats.record_stored();
                info!(
                    %id,
                    issue = %record.issue_type,
                    area = record.area.as_deref().unwrap_or(&record.city),
                    "stored civic issue"
                );
                ItemOutcome::Stored(id)
            }
            Ok(InsertOutcome::Duplicate) => {
                self.stats.record_duplicate();
                info!(url = %record.url, "url stored concurrently, ignoring");
                ItemOutcome::Duplicate
            }
            Err(err) => {
                self.stats.record_error();
                error!(url = %record.url, error = %err, "insert failed");
                ItemOutcome::StoreFailed
            }
        }
    }

    async fn log_recent_issues(&self) {
        match self.store.recent(self.settings.recent_log_limit).await {
            Ok(recent) if recent.is_empty() => info!("no issues stored yet"),
            Ok(recent) => {
                for (rank, issue) in recent.iter().enumerate() {
                    info!(
                        rank = rank + 1,
                        issue = %issue.issue_type,
                        area = issue.area.as_deref().unwrap_or("-"),
                        sentiment = issue.sentiment.as_str(),
                        lat = issue.latitude,
                        lon = issue.longitude,
                        at = %issue.timestamp.format("%Y-%m-%d %H:%M"),
                        "recent issue"
                    );
                }
            }
            Err(err) => error!(error = %err, "could not load recent issues"),
        }
    }
}

#[async_trait]
impl BatchRunner for BatchOrchestrator {
    async fn run_batch(&self, target_count: usize) -> usize {
        BatchOrchestrator::run_batch(self, target_count).await
    }

    fn default_target(&self) -> usize {
        self.settings.batch_size
    }

    fn stats(&self) -> RunStatsSnapshot {
        self.stats.snapshot()
    }
}
