//! Source adapter contracts + the discussion-forum and news-site adapters.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civic_core::{RawItem, SourceKind};
use civic_storage::{FetchError, HttpFetcher};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "civic-adapters";

pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// One keyword-scoped query against a source. `sub_source` names a
/// subreddit for the forum adapter and is ignored by the news adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTarget {
    pub keyword: String,
    pub sub_source: Option<String>,
}

impl SearchTarget {
    pub fn keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            sub_source: None,
        }
    }

    pub fn in_sub_source(keyword: impl Into<String>, sub_source: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            sub_source: Some(sub_source.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Produces raw text items for a keyword. Each adapter owns its own
/// query and pagination mechanics; an empty result is not an error.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn search(
        &self,
        http: &HttpFetcher,
        target: &SearchTarget,
        limit: usize,
    ) -> Result<Vec<RawItem>, AdapterError>;
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Message(e.to_string()))
}

fn select_first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn select_first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

// ---------------------------------------------------------------------------
// Discussion forum (Reddit search listing)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RedditSearchAdapter {
    base_url: String,
}

impl Default for RedditSearchAdapter {
    fn default() -> Self {
        Self::new("https://www.reddit.com")
    }
}

impl RedditSearchAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn search_url(&self, subreddit: &str, keyword: &str, limit: usize) -> Result<Url, AdapterError> {
        let endpoint = format!("{}/r/{}/search.json", self.base_url, subreddit);
        let limit = limit.to_string();
        Url::parse_with_params(
            &endpoint,
            &[
                ("q", keyword),
                ("restrict_sr", "1"),
                ("sort", "relevance"),
                ("limit", limit.as_str()),
            ],
        )
        .with_context(|| format!("building search url for r/{subreddit}"))
        .map_err(AdapterError::from)
    }
}

#[derive(Debug, Deserialize)]
struct RedditListing {
    data: RedditListingData,
}

#[derive(Debug, Deserialize)]
struct RedditListingData {
    #[serde(default)]
    children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
struct RedditChild {
    data: RedditSubmission,
}

#[derive(Debug, Deserialize)]
struct RedditSubmission {
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    author: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    permalink: String,
    created_utc: Option<f64>,
}

/// Parses a Reddit `search.json` listing body into raw items.
pub fn parse_reddit_listing(
    body: &[u8],
    limit: usize,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<RawItem>, AdapterError> {
    let listing: RedditListing = serde_json::from_slice(body)
        .map_err(|e| AdapterError::Message(format!("invalid reddit listing: {e}")))?;

    Ok(listing
        .data
        .children
        .into_iter()
        .take(limit)
        .map(|child| {
            let post = child.data;
            let author = post
                .author
                .filter(|a| !a.is_empty() && a != "[deleted]")
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
            let url = if post.url.is_empty() {
                format!("https://www.reddit.com{}", post.permalink)
            } else {
                post.url
            };
            let created_at = post
                .created_utc
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
                .unwrap_or(fetched_at);
            RawItem {
                text: format!("{} {}", post.title, post.selftext).trim().to_string(),
                url,
                author,
                created_at,
                source: SourceKind::DiscussionForum,
            }
        })
        .collect())
}

#[async_trait]
impl SourceAdapter for RedditSearchAdapter {
    fn source_id(&self) -> &'static str {
        "reddit"
    }

    async fn search(
        &self,
        http: &HttpFetcher,
        target: &SearchTarget,
        limit: usize,
    ) -> Result<Vec<RawItem>, AdapterError> {
        let subreddit = target
            .sub_source
            .as_deref()
            .ok_or_else(|| AdapterError::Message("reddit search needs a subreddit".into()))?;
        let url = self.search_url(subreddit, &target.keyword, limit)?;
        let resp = http.fetch_bytes(self.source_id(), url.as_str()).await?;
        let items = parse_reddit_listing(&resp.body, limit, Utc::now())?;
        debug!(subreddit, keyword = %target.keyword, items = items.len(), "reddit search done");
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// News site (Times of India city listing)
// ---------------------------------------------------------------------------

pub const NEWS_CARD_SELECTOR: &str = "div.uwU81";

#[derive(Debug, Clone)]
pub struct NewsListingAdapter {
    listing_url: String,
}

impl Default for NewsListingAdapter {
    fn default() -> Self {
        Self::new("https://timesofindia.indiatimes.com/city/mumbai")
    }
}

impl NewsListingAdapter {
    pub fn new(listing_url: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
        }
    }

    pub fn query_url(&self, keyword: &str) -> Result<Url, AdapterError> {
        Url::parse_with_params(&self.listing_url, &[("sort", "new-desc"), ("q", keyword)])
            .with_context(|| format!("building news query url from {}", self.listing_url))
            .map_err(AdapterError::from)
    }
}

/// Extracts title/link pairs from a news listing page. Only the first
/// `limit` cards are considered; cards without a title are skipped.
pub fn parse_news_listing(
    html: &str,
    page_url: &Url,
    limit: usize,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<RawItem>, AdapterError> {
    let document = Html::parse_document(html);
    let card_sel = parse_selector(NEWS_CARD_SELECTOR)?;
    let title_sel = parse_selector("span")?;
    let link_sel = parse_selector("a[href]")?;

    Ok(document
        .select(&card_sel)
        .take(limit)
        .filter_map(|card| {
            let title = select_first_text(&card, &title_sel)?;
            let url = select_first_attr(&card, &link_sel, "href")
                .and_then(|href| page_url.join(&href).ok())
                .unwrap_or_else(|| page_url.clone());
            Some(RawItem {
                text: title,
                url: url.to_string(),
                author: UNKNOWN_AUTHOR.to_string(),
                created_at: fetched_at,
                source: SourceKind::NewsSite,
            })
        })
        .collect())
}

#[async_trait]
impl SourceAdapter for NewsListingAdapter {
    fn source_id(&self) -> &'static str {
        "times-of-india"
    }

    async fn search(
        &self,
        http: &HttpFetcher,
        target: &SearchTarget,
        limit: usize,
    ) -> Result<Vec<RawItem>, AdapterError> {
        let url = self.query_url(&target.keyword)?;
        let resp = http.fetch_bytes(self.source_id(), url.as_str()).await?;
        let items = parse_news_listing(&resp.text(), &url, limit, Utc::now())?;
        debug!(keyword = %target.keyword, items = items.len(), "news listing done");
        Ok(items)
    }
}
