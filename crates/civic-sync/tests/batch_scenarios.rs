use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use civic_adapters::{AdapterError, SearchTarget, SourceAdapter};
use civic_core::{Coordinates, IssueRecord, RawItem, Sentiment, SourceKind, TargetCity};
use civic_storage::{
    HttpClientConfig, HttpFetcher, InsertOutcome, IssueStore, MemoryIssueStore, StoreError,
};
use civic_sync::{
    BatchOrchestrator, BatchRunner, BatchSettings, Classifier, ClassifierConfig, GeocodeCache,
    GeocodeError, Geocoder, ItemOutcome, OrchestratorDeps, Phase, TextGenerator, Vocabulary,
};

const ANDHERI: Coordinates = Coordinates::new(19.1197, 72.8468);

/// Serves canned items per `(keyword, sub_source)` and records every query.
#[derive(Default)]
struct FakeSource {
    items: HashMap<(String, Option<String>), Vec<RawItem>>,
    failing: Vec<String>,
    panicking: Vec<SearchTarget>,
    calls: Mutex<Vec<SearchTarget>>,
}

impl FakeSource {
    fn new() -> Self {
        Self::default()
    }

    fn with_items(mut self, keyword: &str, sub_source: Option<&str>, items: Vec<RawItem>) -> Self {
        self.items
            .insert((keyword.to_string(), sub_source.map(str::to_string)), items);
        self
    }

    fn failing_on(mut self, keyword: &str) -> Self {
        self.failing.push(keyword.to_string());
        self
    }

    fn panicking_on(mut self, keyword: &str, sub_source: &str) -> Self {
        self.panicking
            .push(SearchTarget::in_sub_source(keyword, sub_source));
        self
    }

    fn calls(&self) -> Vec<SearchTarget> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    fn source_id(&self) -> &'static str {
        "fake"
    }

    async fn search(
        &self,
        _http: &HttpFetcher,
        target: &SearchTarget,
        limit: usize,
    ) -> Result<Vec<RawItem>, AdapterError> {
        self.calls.lock().unwrap().push(target.clone());
        if self.panicking.contains(target) {
            panic!("listing parser blew up on {}", target.keyword);
        }
        if self.failing.contains(&target.keyword) {
            return Err(AdapterError::Message("listing unavailable".into()));
        }
        let key = (target.keyword.clone(), target.sub_source.clone());
        Ok(self
            .items
            .get(&key)
            .map(|items| items.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Replies by looking for a marker in the prompt; unmatched prompts get a
/// "no issue" reply.
#[derive(Default)]
struct RuleGenerator {
    rules: Vec<(&'static str, Result<String, String>)>,
    calls: AtomicUsize,
}

impl RuleGenerator {
    fn reply(mut self, marker: &'static str, reply: &str) -> Self {
        self.rules.push((marker, Ok(reply.to_string())));
        self
    }

    fn fail(mut self, marker: &'static str, message: &str) -> Self {
        self.rules.push((marker, Err(message.to_string())));
        self
    }
}

#[async_trait]
impl TextGenerator for RuleGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (marker, reply) in &self.rules {
            if prompt.contains(marker) {
                return reply.clone().map_err(|message| anyhow!(message));
            }
        }
        Ok(r#"{"issue": null, "location": null, "sentiment": "neutral", "post_text": ""}"#.into())
    }
}

struct CountingGeocoder {
    result: Option<Coordinates>,
    unreachable: bool,
    calls: AtomicUsize,
}

impl CountingGeocoder {
    fn new(result: Option<Coordinates>, unreachable: bool) -> Self {
        Self {
            result,
            unreachable,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Geocoder for CountingGeocoder {
    async fn lookup(&self, _query: &str) -> Result<Option<Coordinates>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(GeocodeError::InvalidResponse("service unavailable".into()));
        }
        Ok(self.result)
    }
}

#[derive(Debug, Clone, Copy)]
enum StoreFault {
    LookupFails,
    InsertFails,
    /// Lookup misses a url that is already stored, as when another writer
    /// inserted it in between.
    StaleLookup,
}

/// Delegates to a memory store, except for the injected fault.
struct FaultyStore {
    inner: Arc<MemoryIssueStore>,
    fault: StoreFault,
}

fn store_down(url: &str) -> StoreError {
    StoreError::Corrupt {
        url: url.to_string(),
        reason: "connection reset".into(),
    }
}

#[async_trait]
impl IssueStore for FaultyStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<IssueRecord>, StoreError> {
        match self.fault {
            StoreFault::LookupFails => Err(store_down(url)),
            StoreFault::StaleLookup => Ok(None),
            StoreFault::InsertFails => self.inner.find_by_url(url).await,
        }
    }

    async fn insert(&self, record: &IssueRecord) -> Result<InsertOutcome, StoreError> {
        match self.fault {
            StoreFault::InsertFails => Err(store_down(&record.url)),
            _ => self.inner.insert(record).await,
        }
    }

    async fn list_all(&self) -> Result<Vec<IssueRecord>, StoreError> {
        self.inner.list_all().await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<IssueRecord>, StoreError> {
        self.inner.recent(limit).await
    }
}

fn item(text: &str, url: &str, source: SourceKind) -> RawItem {
    RawItem {
        text: text.to_string(),
        url: url.to_string(),
        author: "resident".to_string(),
        created_at: Utc.with_ymd_and_hms(2026, 7, 14, 8, 30, 0).unwrap(),
        source,
    }
}

fn pothole_reply() -> &'static str {
    r#"```json
{"issue": "potholes", "location": {"city": "Mumbai", "area": "Andheri"}, "sentiment": "Negative", "post_text": "Potholes on SV Road in Andheri"}
```"#
}

struct Harness {
    orchestrator: BatchOrchestrator,
    forum: Arc<FakeSource>,
    news: Arc<FakeSource>,
    generator: Arc<RuleGenerator>,
    geocoder: Arc<CountingGeocoder>,
    store: Arc<MemoryIssueStore>,
}

struct HarnessBuilder {
    vocabulary: Vocabulary,
    forum: FakeSource,
    news: FakeSource,
    generator: RuleGenerator,
    geocode_result: Option<Coordinates>,
    geocoder_unreachable: bool,
    store_fault: Option<StoreFault>,
    rate_limit_backoff: Duration,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            vocabulary: Vocabulary::new(
                vec!["potholes".into(), "flooding".into()],
                vec!["mumbai".into(), "india".into()],
            )
            .unwrap(),
            forum: FakeSource::new(),
            news: FakeSource::new(),
            generator: RuleGenerator::default(),
            geocode_result: Some(ANDHERI),
            geocoder_unreachable: false,
            store_fault: None,
            rate_limit_backoff: Duration::ZERO,
        }
    }

    fn build(self) -> Harness {
        let forum = Arc::new(self.forum);
        let news = Arc::new(self.news);
        let generator = Arc::new(self.generator);
        let geocoder = Arc::new(CountingGeocoder::new(
            self.geocode_result,
            self.geocoder_unreachable,
        ));
        let store = Arc::new(MemoryIssueStore::new());
        let pipeline_store: Arc<dyn IssueStore> = match self.store_fault {
            Some(fault) => Arc::new(FaultyStore {
                inner: store.clone(),
                fault,
            }),
            None => store.clone(),
        };
        let city = TargetCity::default();

        let classifier = Classifier::new(
            generator.clone(),
            ClassifierConfig {
                target_city: city.name.clone(),
                pacing: Duration::ZERO,
                rate_limit_backoff: self.rate_limit_backoff,
            },
        );
        let orchestrator = BatchOrchestrator::new(
            self.vocabulary,
            city.clone(),
            BatchSettings {
                batch_size: 3,
                items_per_query: 3,
                item_pacing: Duration::ZERO,
                recent_log_limit: 5,
            },
            OrchestratorDeps {
                http: HttpFetcher::new(HttpClientConfig::default()).unwrap(),
                forum: forum.clone(),
                news: news.clone(),
                classifier,
                geocoder: GeocodeCache::new(geocoder.clone(), city, Duration::ZERO),
                store: pipeline_store,
            },
        );

        Harness {
            orchestrator,
            forum,
            news,
            generator,
            geocoder,
            store,
        }
    }
}

#[tokio::test]
async fn relevant_forum_post_is_stored_with_geocoded_area() {
    let h = HarnessBuilder::new()
        .tap_generator(|g| g.reply("SV Road", pothole_reply()))
        .build();

    let outcome = h
        .orchestrator
        .ingest(item(
            "Massive potholes on SV Road near Andheri station after one night of rain",
            "https://reddit.com/r/mumbai/comments/abc",
            SourceKind::DiscussionForum,
        ))
        .await;
    assert!(outcome.is_stored());

    let stored = h
        .store
        .find_by_url("https://reddit.com/r/mumbai/comments/abc")
        .await
        .unwrap()
        .expect("record stored");
    assert_eq!(stored.issue_type, "potholes");
    assert_eq!(stored.city, "Mumbai");
    assert_eq!(stored.area.as_deref(), Some("Andheri"));
    assert_eq!(stored.sentiment, Sentiment::Negative);
    assert_eq!(stored.latitude, ANDHERI.latitude);
    assert_eq!(stored.longitude, ANDHERI.longitude);
    assert_eq!(stored.source, SourceKind::DiscussionForum);
    assert_eq!(stored.author, "resident");

    let stats = h.orchestrator.run_stats().snapshot();
    assert_eq!(stats.total_scraped, 1);
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.total_stored, 1);
    assert_eq!(stats.total_errors, 0);
}

#[tokio::test]
async fn known_url_is_skipped_before_classification() {
    let h = HarnessBuilder::new()
        .tap_generator(|g| g.reply("SV Road", pothole_reply()))
        .build();
    let post = item(
        "Massive potholes on SV Road near Andheri station again",
        "https://reddit.com/r/mumbai/comments/dup",
        SourceKind::DiscussionForum,
    );

    assert!(h.orchestrator.ingest(post.clone()).await.is_stored());
    assert_eq!(h.orchestrator.ingest(post).await, ItemOutcome::Duplicate);

    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.len().await, 1);
    let stats = h.orchestrator.run_stats().snapshot();
    assert_eq!(stats.total_scraped, 2);
    assert_eq!(stats.total_duplicates, 1);
    assert_eq!(stats.total_processed, 1);
}

#[tokio::test]
async fn other_city_is_dropped_without_geocoding() {
    let h = HarnessBuilder::new()
        .tap_generator(|g| {
            g.reply(
                "Kothrud",
                r#"{"issue": "garbage", "location": {"city": "Pune", "area": "Kothrud"}, "sentiment": "negative", "post_text": "Garbage in Kothrud"}"#,
            )
        })
        .build();

    let outcome = h
        .orchestrator
        .ingest(item(
            "Garbage piling up near Kothrud depot for a week",
            "https://reddit.com/r/india/comments/pune",
            SourceKind::DiscussionForum,
        ))
        .await;

    assert_eq!(outcome, ItemOutcome::WrongCity);
    assert_eq!(h.geocoder.calls.load(Ordering::SeqCst), 0);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn unmatched_area_is_placed_at_city_centre() {
    let mut builder = HarnessBuilder::new().tap_generator(|g| {
        g.reply(
            "Nowhere Nagar",
            r#"{"issue": "flooding", "location": {"city": "mumbai", "area": "Nowhere Nagar"}, "sentiment": "negative", "post_text": "Flooding in Nowhere Nagar"}"#,
        )
    });
    builder.geocode_result = None;
    let h = builder.build();

    let outcome = h
        .orchestrator
        .ingest(item(
            "Knee deep flooding in Nowhere Nagar lane since morning",
            "https://timesofindia.indiatimes.com/city/mumbai/flood",
            SourceKind::NewsSite,
        ))
        .await;
    assert!(outcome.is_stored());

    let stored = h.store.list_all().await.unwrap();
    let centre = TargetCity::default().center;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].latitude, centre.latitude);
    assert_eq!(stored[0].longitude, centre.longitude);
    assert_eq!(stored[0].source, SourceKind::NewsSite);
}

#[tokio::test]
async fn irrelevant_and_short_texts_are_not_stored() {
    let h = HarnessBuilder::new().build();

    let short = h
        .orchestrator
        .ingest(item("tiny", "https://example.com/short", SourceKind::NewsSite))
        .await;
    assert_eq!(short, ItemOutcome::Invalid);

    let chatter = h
        .orchestrator
        .ingest(item(
            "Which is the best vada pav stall near Dadar station?",
            "https://reddit.com/r/mumbai/comments/food",
            SourceKind::DiscussionForum,
        ))
        .await;
    assert_eq!(chatter, ItemOutcome::NotRelevant);

    assert!(h.store.is_empty().await);
    let stats = h.orchestrator.run_stats().snapshot();
    assert_eq!(stats.total_scraped, 1);
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.total_stored, 0);
}

#[tokio::test]
async fn repeated_area_hits_geocoder_once() {
    let h = HarnessBuilder::new()
        .tap_generator(|g| g.reply("SV Road", pothole_reply()))
        .build();

    for n in 0..3 {
        let outcome = h
            .orchestrator
            .ingest(item(
                "Massive potholes on SV Road near Andheri station, day count rising",
                &format!("https://reddit.com/r/mumbai/comments/{n}"),
                SourceKind::DiscussionForum,
            ))
            .await;
        assert!(outcome.is_stored());
    }

    assert_eq!(h.geocoder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.orchestrator.geocode_cache().len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_classification_backs_off_and_counts_an_error() {
    let mut builder = HarnessBuilder::new()
        .tap_generator(|g| g.fail("Bandra", "429 Too Many Requests: quota exceeded"));
    builder.rate_limit_backoff = Duration::from_secs(30);
    let h = builder.build();

    let started = tokio::time::Instant::now();
    let outcome = h
        .orchestrator
        .ingest(item(
            "Power cut across Bandra west since last night",
            "https://reddit.com/r/mumbai/comments/power",
            SourceKind::DiscussionForum,
        ))
        .await;

    assert_eq!(outcome, ItemOutcome::NotRelevant);
    assert!(started.elapsed() >= Duration::from_secs(30));
    let stats = h.orchestrator.run_stats().snapshot();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.total_processed, 1);
}

#[tokio::test]
async fn batch_stops_at_target_and_resumes_from_cursor() {
    let forum = FakeSource::new().with_items(
        "potholes",
        Some("mumbai"),
        vec![
            item(
                "Massive potholes on SV Road near Andheri, first report",
                "https://reddit.com/a",
                SourceKind::DiscussionForum,
            ),
            item(
                "Massive potholes on SV Road near Andheri, second report",
                "https://reddit.com/b",
                SourceKind::DiscussionForum,
            ),
        ],
    );
    let h = HarnessBuilder::new()
        .tap_forum(|_| forum)
        .tap_generator(|g| g.reply("SV Road", pothole_reply()))
        .build();

    assert_eq!(h.orchestrator.run_batch(1).await, 1);
    let cursor = h.orchestrator.cursor().await;
    assert_eq!(cursor.phase, Phase::DiscussionForum);
    assert_eq!((cursor.keyword_index, cursor.source_index), (0, 1));
    assert_eq!(h.store.len().await, 1);

    let stats = h.orchestrator.run_stats().snapshot();
    assert!(!stats.is_running);
    assert!(stats.last_run_timestamp.is_some());

    assert_eq!(h.orchestrator.run_batch(1).await, 0);
    let calls = h.forum.calls();
    assert_eq!(calls[0], SearchTarget::in_sub_source("potholes", "mumbai"));
    assert_eq!(calls[1], SearchTarget::in_sub_source("potholes", "india"));
}

#[tokio::test]
async fn empty_sweep_visits_every_slot_then_resets() {
    let h = HarnessBuilder::new().build();

    assert_eq!(h.orchestrator.run_batch(10).await, 0);

    assert_eq!(
        h.forum.calls(),
        vec![
            SearchTarget::in_sub_source("potholes", "mumbai"),
            SearchTarget::in_sub_source("potholes", "india"),
            SearchTarget::in_sub_source("flooding", "mumbai"),
            SearchTarget::in_sub_source("flooding", "india"),
        ]
    );
    assert_eq!(
        h.news.calls(),
        vec![
            SearchTarget::keyword("potholes"),
            SearchTarget::keyword("flooding"),
        ]
    );
    let cursor = h.orchestrator.cursor().await;
    assert_eq!(cursor.phase, Phase::DiscussionForum);
    assert_eq!(cursor.keyword_index, 0);
    assert_eq!(cursor.news_keyword_index, 0);
}

#[tokio::test]
async fn news_phase_picks_up_after_forum_is_exhausted() {
    let news = FakeSource::new().with_items(
        "flooding",
        None,
        vec![item(
            "Waterlogging at Andheri subway shuts traffic again",
            "https://timesofindia.indiatimes.com/city/mumbai/andheri-subway",
            SourceKind::NewsSite,
        )],
    );
    let h = HarnessBuilder::new()
        .tap_news(|_| news)
        .tap_generator(|g| {
            g.reply(
                "Andheri subway",
                r#"{"issue": "waterlogging", "location": {"city": "Mumbai", "area": "Andheri"}, "sentiment": "negative", "post_text": "Andheri subway waterlogged"}"#,
            )
        })
        .build();

    assert_eq!(h.orchestrator.run_batch(1).await, 1);
    assert_eq!(h.forum.calls().len(), 4);
    assert_eq!(h.news.calls().len(), 2);

    let cursor = h.orchestrator.cursor().await;
    assert_eq!(cursor.phase, Phase::DiscussionForum);
    let stored = h.store.list_all().await.unwrap();
    assert_eq!(stored[0].source, SourceKind::NewsSite);
    assert_eq!(stored[0].issue_type, "waterlogging");
}

#[tokio::test]
async fn failing_query_counts_an_error_and_still_advances() {
    let forum = FakeSource::new().failing_on("potholes");
    let h = HarnessBuilder::new().tap_forum(|_| forum).build();

    assert_eq!(h.orchestrator.run_batch(10).await, 0);
    assert_eq!(h.forum.calls().len(), 4);
    assert_eq!(h.orchestrator.run_stats().snapshot().total_errors, 2);
}

#[tokio::test]
async fn panicking_slot_counts_an_error_and_cursor_moves_on() {
    let forum = FakeSource::new()
        .panicking_on("potholes", "mumbai")
        .with_items(
            "flooding",
            Some("mumbai"),
            vec![item(
                "Massive potholes on SV Road near Andheri after the flood",
                "https://reddit.com/r/mumbai/comments/after-flood",
                SourceKind::DiscussionForum,
            )],
        );
    let h = HarnessBuilder::new()
        .tap_forum(|_| forum)
        .tap_generator(|g| g.reply("SV Road", pothole_reply()))
        .build();

    assert_eq!(h.orchestrator.run_batch(1).await, 1);

    let cursor = h.orchestrator.cursor().await;
    assert_eq!(cursor.phase, Phase::DiscussionForum);
    assert_eq!((cursor.keyword_index, cursor.source_index), (1, 1));
    let stats = h.orchestrator.run_stats().snapshot();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.total_stored, 1);
    assert!(!stats.is_running);

    assert_eq!(h.orchestrator.run_batch(1).await, 0);
    let calls = h.forum.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| **c == SearchTarget::in_sub_source("potholes", "mumbai"))
            .count(),
        1
    );
    assert_eq!(calls[3], SearchTarget::in_sub_source("flooding", "india"));
}

#[tokio::test]
async fn unreachable_geocoder_drops_the_item() {
    let mut builder = HarnessBuilder::new()
        .tap_generator(|g| g.reply("SV Road", pothole_reply()));
    builder.geocoder_unreachable = true;
    let h = builder.build();

    let outcome = h
        .orchestrator
        .ingest(item(
            "Massive potholes on SV Road near Andheri, nobody fixing them",
            "https://reddit.com/r/mumbai/comments/geo-down",
            SourceKind::DiscussionForum,
        ))
        .await;

    assert_eq!(outcome, ItemOutcome::GeocodeFailed);
    assert!(h.store.is_empty().await);
    assert!(h.orchestrator.geocode_cache().is_empty().await);
    let stats = h.orchestrator.run_stats().snapshot();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.total_stored, 0);
}

fn faulty_store_harness(fault: StoreFault) -> Harness {
    let mut builder = HarnessBuilder::new()
        .tap_generator(|g| g.reply("SV Road", pothole_reply()));
    builder.store_fault = Some(fault);
    builder.build()
}

fn sv_road_post(url: &str) -> RawItem {
    item(
        "Massive potholes on SV Road near Andheri, third week running",
        url,
        SourceKind::DiscussionForum,
    )
}

#[tokio::test]
async fn failed_dedup_lookup_drops_item_before_classification() {
    let h = faulty_store_harness(StoreFault::LookupFails);

    let outcome = h
        .orchestrator
        .ingest(sv_road_post("https://reddit.com/r/mumbai/comments/lookup"))
        .await;

    assert_eq!(outcome, ItemOutcome::StoreFailed);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
    assert!(h.store.is_empty().await);
    let stats = h.orchestrator.run_stats().snapshot();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.total_processed, 0);
}

#[tokio::test]
async fn failed_insert_counts_an_error_and_stores_nothing() {
    let h = faulty_store_harness(StoreFault::InsertFails);

    let outcome = h
        .orchestrator
        .ingest(sv_road_post("https://reddit.com/r/mumbai/comments/insert"))
        .await;

    assert_eq!(outcome, ItemOutcome::StoreFailed);
    assert!(h.store.is_empty().await);
    let stats = h.orchestrator.run_stats().snapshot();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.total_stored, 0);
}

#[tokio::test]
async fn concurrent_insert_of_same_url_counts_as_duplicate() {
    let h = faulty_store_harness(StoreFault::StaleLookup);
    let url = "https://reddit.com/r/mumbai/comments/race";
    let post = sv_road_post(url);

    assert!(h.orchestrator.ingest(post.clone()).await.is_stored());
    assert_eq!(h.orchestrator.ingest(post).await, ItemOutcome::Duplicate);

    assert_eq!(h.store.len().await, 1);
    let stats = h.orchestrator.run_stats().snapshot();
    assert_eq!(stats.total_stored, 1);
    assert_eq!(stats.total_duplicates, 1);
    assert_eq!(stats.total_errors, 0);
}

#[tokio::test]
async fn second_trigger_while_running_is_a_no_op() {
    let h = HarnessBuilder::new().build();

    let guard = h.orchestrator.run_stats().try_begin().expect("idle");
    let before = h.orchestrator.run_stats().snapshot();
    assert!(before.is_running);

    assert_eq!(h.orchestrator.run_batch(3).await, 0);
    assert!(h.forum.calls().is_empty());
    assert_eq!(h.orchestrator.run_stats().snapshot(), before);

    drop(guard);
    assert!(!h.orchestrator.run_stats().is_running());
}

#[tokio::test]
async fn batch_runner_trait_uses_configured_batch_size() {
    let h = HarnessBuilder::new().build();
    let runner: &dyn BatchRunner = &h.orchestrator;
    assert_eq!(runner.default_target(), 3);
    assert_eq!(runner.run_batch(runner.default_target()).await, 0);
    assert!(runner.stats().last_run_timestamp.is_some());
}

impl HarnessBuilder {
    fn tap_generator(mut self, f: impl FnOnce(RuleGenerator) -> RuleGenerator) -> Self {
        self.generator = f(self.generator);
        self
    }

    fn tap_forum(mut self, f: impl FnOnce(FakeSource) -> FakeSource) -> Self {
        self.forum = f(self.forum);
        self
    }

    fn tap_news(mut self, f: impl FnOnce(FakeSource) -> FakeSource) -> Self {
        self.news = f(self.news);
        self
    }
}
