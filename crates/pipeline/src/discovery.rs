//! Program discovery: find plausible program pages for a course near a place.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};
use unilens_config::AppConfig;
use unilens_search::{CandidateFilter, SearchCandidate, SearchError, SearchProvider, discovery_query};
use unilens_store::{Entries, ResultStore, StoreError, StoreScope};

const MISSING_INPUT: &str = "Course or location missing in request.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(Vec<SearchCandidate>),
    Failed(String),
}

impl DiscoveryOutcome {
    pub fn to_store_entries(&self) -> Entries {
        let mut entries = Entries::new();
        match self {
            DiscoveryOutcome::Found(candidates) => {
                entries.insert("foundUniversities".to_string(), json!(candidates));
            }
            DiscoveryOutcome::Failed(message) => {
                entries.insert("discoveryError".to_string(), json!(message));
            }
        }
        entries
    }
}

pub struct DiscoveryService {
    search: Arc<dyn SearchProvider>,
    store: Arc<dyn ResultStore>,
    initial_results: usize,
    max_results: usize,
    timeout: Duration,
}

impl DiscoveryService {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        store: Arc<dyn ResultStore>,
        initial_results: usize,
        max_results: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            search,
            store,
            initial_results,
            max_results,
            timeout,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        search: Arc<dyn SearchProvider>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self::new(
            search,
            store,
            config.search.discovery_initial_results,
            config.search.discovery_max_results,
            Duration::from_secs(config.analysis.remote_timeout_secs.max(1)),
        )
    }

    /// Search, filter and persist.  Every failure, including missing input,
    /// is persisted as `discoveryError`.
    #[instrument(skip(self))]
    pub async fn run(&self, course: &str, location: &str) -> Result<DiscoveryOutcome, StoreError> {
        let outcome = self.discover(course.trim(), location.trim()).await;
        self.store
            .replace(StoreScope::Discovery, &outcome.to_store_entries())?;
        Ok(outcome)
    }

    async fn discover(&self, course: &str, location: &str) -> DiscoveryOutcome {
        if course.is_empty() || location.is_empty() {
            warn!("course or location missing");
            return DiscoveryOutcome::Failed(MISSING_INPUT.to_string());
        }

        let query = discovery_query(course, location);
        let searched = tokio::time::timeout(self.timeout, self.search.search(&query, self.initial_results))
            .await
            .unwrap_or(Err(SearchError::Timeout(self.timeout)));

        match searched {
            Ok(candidates) => {
                let kept = CandidateFilter::new(course, self.max_results).apply(&candidates);
                info!(found = candidates.len(), kept = kept.len(), "discovery search filtered");
                DiscoveryOutcome::Found(kept)
            }
            Err(err) => {
                warn!(error = %err, "discovery search failed");
                DiscoveryOutcome::Failed(format!("Failed to fetch university list: {err}"))
            }
        }
    }
}
