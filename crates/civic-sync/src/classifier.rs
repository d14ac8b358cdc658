//! Free text -> structured issue candidate, via a text-generation model.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use civic_core::{truncate_chars, IssueCandidate, Sentiment};
use civic_storage::HttpFetcher;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

/// Characters of the raw text embedded in the prompt.
pub const PROMPT_TEXT_MAX_CHARS: usize = 500;

const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "ratelimit",
    "quota",
    "resource_exhausted",
    "too many requests",
    "429",
];

/// Accepts a prompt and returns free text expected to contain a JSON object.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(http: &HttpFetcher, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http: http.client().clone(),
            api_key,
            model: model.into(),
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerateCandidate {
    content: Option<GenerateContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Deserialize)]
struct GeneratePart {
    text: Option<String>,
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("GEMINI_API_KEY is not configured"))?;
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        debug!(model = %self.model, "gemini generate request");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&json!({ "contents": [{ "parts": [{ "text": prompt }] }] }))
            .send()
            .await
            .context("sending gemini request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini API error ({}): {}", status, error_text));
        }

        let body: GenerateResponse = response.json().await.context("decoding gemini response")?;
        let text = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<String>();
        Ok(text)
    }
}

/// Why a classification fell back to the empty candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyFailure {
    RateLimited,
    Invocation,
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub candidate: IssueCandidate,
    pub failure: Option<ClassifyFailure>,
}

impl Classification {
    fn parsed(candidate: IssueCandidate) -> Self {
        Self {
            candidate,
            failure: None,
        }
    }

    fn fallback(failure: ClassifyFailure) -> Self {
        Self {
            candidate: IssueCandidate::none(),
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub target_city: String,
    /// Applied after every successful model call.
    pub pacing: Duration,
    /// Applied after a rate-limit or quota failure.
    pub rate_limit_backoff: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            target_city: "Mumbai".to_string(),
            pacing: Duration::from_secs(2),
            rate_limit_backoff: Duration::from_secs(30),
        }
    }
}

pub struct Classifier {
    generator: Arc<dyn TextGenerator>,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(generator: Arc<dyn TextGenerator>, config: ClassifierConfig) -> Self {
        Self { generator, config }
    }

    /// Never fails: invocation errors and unparsable output yield the empty
    /// candidate with the failure reason attached.
    pub async fn classify(&self, text: &str) -> Classification {
        let prompt = build_prompt(&self.config.target_city, text);

        match self.generator.generate(&prompt).await {
            Ok(reply) => {
                debug!(reply = truncate_chars(&reply, 100), "classifier reply");
                let parsed = parse_candidate(&reply, text);
                tokio::time::sleep(self.config.pacing).await;
                match parsed {
                    Ok(candidate) => Classification::parsed(candidate),
                    Err(err) => {
                        error!(error = %err, reply = %reply, "unparsable classifier output");
                        Classification::fallback(ClassifyFailure::Malformed)
                    }
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(error = %message, text = truncate_chars(text, 30), "classifier call failed");
                if is_rate_limit_message(&message) {
                    warn!(
                        backoff_secs = self.config.rate_limit_backoff.as_secs(),
                        "classifier rate limited, backing off"
                    );
                    tokio::time::sleep(self.config.rate_limit_backoff).await;
                    Classification::fallback(ClassifyFailure::RateLimited)
                } else {
                    Classification::fallback(ClassifyFailure::Invocation)
                }
            }
        }
    }
}

pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub fn build_prompt(target_city: &str, text: &str) -> String {
    let excerpt = truncate_chars(text, PROMPT_TEXT_MAX_CHARS);
    format!(
        r#"You extract municipal problems reported for {city} from short public posts.

Read the post below and decide:
- issue: the concrete civic problem (for example power outage, waterlogging, garbage, traffic, potholes). Use null when the post does not describe a clear civic problem.
- location: an object with "city" and "area". "city" must be "{city}" when the post concerns {city}. Use null for "area" when no neighbourhood is named.
- sentiment: one of positive, negative, neutral.
- post_text: a concise restatement of the post.

Skip general discussion, advertising and anything that is not a civic problem in {city}.

Reply with a single JSON object with exactly the keys "issue", "location", "sentiment" and "post_text", and nothing else.

Post: "{excerpt}""#,
        city = target_city,
        excerpt = excerpt,
    )
}

#[derive(Debug, Deserialize)]
struct ClassifierReply {
    #[serde(default)]
    issue: Option<String>,
    #[serde(default)]
    location: Option<ReplyLocation>,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default)]
    post_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyLocation {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    area: Option<String>,
}

/// Strip markdown code fences from a model reply.
pub fn strip_code_fences(reply: &str) -> &str {
    reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn non_null(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

/// Parses a model reply, tolerating code fences and prose around the object.
/// A missing `post_text` falls back to the original text.
pub fn parse_candidate(reply: &str, original_text: &str) -> Result<IssueCandidate> {
    let cleaned = strip_code_fences(reply);
    if cleaned.is_empty() {
        return Err(anyhow!("empty classifier reply"));
    }

    let parsed: ClassifierReply = match serde_json::from_str(cleaned) {
        Ok(parsed) => parsed,
        Err(first_err) => outermost_object(cleaned)
            .and_then(|object| serde_json::from_str::<ClassifierReply>(object).ok())
            .ok_or(first_err)
            .context("parsing classifier reply")?,
    };

    let (city, area) = match parsed.location {
        Some(location) => (non_null(location.city), non_null(location.area)),
        None => (None, None),
    };

    Ok(IssueCandidate {
        issue: non_null(parsed.issue),
        city,
        area,
        sentiment: parsed
            .sentiment
            .as_deref()
            .map(Sentiment::parse_loose)
            .unwrap_or_default(),
        post_text: non_null(parsed.post_text).unwrap_or_else(|| original_text.to_string()),
    })
}
