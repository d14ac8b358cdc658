//! Core domain model for the civic issue radar.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "civic-core";

/// Upper bound on the stored `post_text`, in characters.
pub const POST_TEXT_MAX_CHARS: usize = 500;

/// Ordered keyword vocabulary. Order defines sweep order.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "no light",
    "power cut",
    "electricity issue",
    "waterlogging",
    "flooding",
    "no water",
    "water supply issue",
    "garbage",
    "trash",
    "waste disposal",
    "traffic jam",
    "traffic congestion",
    "road repair",
    "potholes",
    "sewage",
    "drainage problem",
    "pollution",
    "air quality",
    "noise pollution",
    "encroachment",
    "illegal construction",
    "crime",
    "safety concern",
];

pub const DEFAULT_SUBREDDITS: &[&str] = &["mumbai", "india"];

/// Origin of a raw item. Serialized with the labels the map view already knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "Reddit")]
    DiscussionForum,
    #[serde(rename = "Times of India")]
    NewsSite,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::DiscussionForum => "Reddit",
            SourceKind::NewsSite => "Times of India",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Reddit" => Ok(SourceKind::DiscussionForum),
            "Times of India" => Ok(SourceKind::NewsSite),
            other => Err(format!("unknown source label: {other}")),
        }
    }
}

/// Text mention produced by a source adapter. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub text: String,
    pub url: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl Sentiment {
    /// Lenient parse of classifier output; anything unrecognised is neutral.
    pub fn parse_loose(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

/// Classifier output for one raw text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IssueCandidate {
    pub issue: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub sentiment: Sentiment,
    pub post_text: String,
}

impl IssueCandidate {
    /// The "no issue, neutral, empty text" candidate.
    pub fn none() -> Self {
        Self::default()
    }

    /// Issue label when present, non-empty and not the literal string "null".
    pub fn relevant_issue(&self) -> Option<&str> {
        self.issue
            .as_deref()
            .map(str::trim)
            .filter(|issue| !issue.is_empty() && !issue.eq_ignore_ascii_case("null"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// The single city this deployment harvests issues for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCity {
    pub name: String,
    pub country: String,
    pub center: Coordinates,
}

impl TargetCity {
    pub fn new(name: impl Into<String>, country: impl Into<String>, center: Coordinates) -> Self {
        Self {
            name: name.into(),
            country: country.into(),
            center,
        }
    }

    pub fn matches(&self, city: &str) -> bool {
        city.trim().eq_ignore_ascii_case(self.name.trim())
    }
}

impl Default for TargetCity {
    fn default() -> Self {
        Self::new("Mumbai", "India", Coordinates::new(19.0760, 72.8777))
    }
}

/// Persisted civic issue. Field names are the contract the map view reads;
/// the storage identifier is deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub issue_type: String,
    pub city: String,
    pub area: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub sentiment: Sentiment,
    pub post_text: String,
    pub url: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub source: SourceKind,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time copy of the process-wide run counters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStatsSnapshot {
    pub total_scraped: u64,
    pub total_processed: u64,
    pub total_stored: u64,
    pub total_duplicates: u64,
    pub total_errors: u64,
    pub last_run_timestamp: Option<DateTime<Utc>>,
    pub is_running: bool,
}

/// Keeps at most `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
