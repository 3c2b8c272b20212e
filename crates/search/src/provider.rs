use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::candidate::SearchCandidate;

/// The Custom Search JSON API returns at most ten items per request.
pub const MAX_RESULTS_PER_REQUEST: usize = 10;
/// Results past the hundredth are never served, whatever `start` says.
pub const MAX_TOTAL_RESULTS: usize = 100;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search is not configured: {0}")]
    NotConfigured(String),
    #[error("permission or configuration error with the search API ({status}): {detail}")]
    Permission { status: u16, detail: String },
    #[error("search API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    Malformed(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl SearchError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, SearchError::Malformed(_))
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Up to `max_results` candidates for `query`, in provider rank order.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchCandidate>, SearchError>;
}

// ── Google Custom Search ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    items: Vec<GoogleItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(rename = "displayLink", default)]
    display_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct GoogleSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
}

impl GoogleSearch {
    pub fn new(endpoint: &str, api_key: &str, engine_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            api_key: api_key.trim().to_string(),
            engine_id: engine_id.trim().to_string(),
        }
    }

    fn check_credentials(&self) -> Result<(), SearchError> {
        if self.api_key.is_empty() || self.api_key.contains("YOUR_") {
            return Err(SearchError::NotConfigured("API key not set".to_string()));
        }
        if self.engine_id.is_empty() || self.engine_id.contains("YOUR_") {
            return Err(SearchError::NotConfigured(
                "search engine id not set".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchCandidate>, SearchError> {
        self.check_credentials()?;
        let mut candidates = Vec::new();
        for (start, num) in page_plan(max_results) {
            let page = self.fetch_page(query, start, num).await?;
            let short = page.len() < num;
            candidates.extend(page);
            if short {
                break;
            }
        }
        info!(results = candidates.len(), "search complete");
        Ok(candidates)
    }
}

/// `(start, num)` requests covering the first `max_results` results, one
/// based, at most ten per request.  Always at least one request.
pub fn page_plan(max_results: usize) -> Vec<(usize, usize)> {
    let total = max_results.clamp(1, MAX_TOTAL_RESULTS);
    (0..total)
        .step_by(MAX_RESULTS_PER_REQUEST)
        .map(|offset| (offset + 1, (total - offset).min(MAX_RESULTS_PER_REQUEST)))
        .collect()
}

impl GoogleSearch {
    async fn fetch_page(
        &self,
        query: &str,
        start: usize,
        num: usize,
    ) -> Result<Vec<SearchCandidate>, SearchError> {
        debug!(start, num, "requesting search page");
        let (start, num) = (start.to_string(), num.to_string());
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
                ("start", start.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "search API returned an error");
            return Err(classify_error(status.as_u16(), body));
        }

        parse_google_response(&body)
    }
}

fn classify_error(status: u16, body: String) -> SearchError {
    if status == 400 || status == 403 {
        let detail = serde_json::from_str::<GoogleErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .ok()
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| format!("status code {status}"));
        SearchError::Permission { status, detail }
    } else {
        SearchError::Api { status, body }
    }
}

/// Decode a Custom Search response body.  A body without `items` is an empty
/// result set; items without a link are skipped.
pub fn parse_google_response(body: &str) -> Result<Vec<SearchCandidate>, SearchError> {
    let response: GoogleResponse =
        serde_json::from_str(body).map_err(|err| SearchError::Malformed(err.to_string()))?;
    Ok(response
        .items
        .into_iter()
        .filter(|item| !item.link.trim().is_empty())
        .map(|item| SearchCandidate::new(item.title, item.link, item.display_link.as_deref()))
        .collect())
}
