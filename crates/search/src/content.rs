//! Where per-category external content comes from.
//!
//! Two wire protocols exist for the same capability: structured link lists
//! from a search provider, and one delimited text blob from a snippet
//! service.  [`ExternalContentProvider`] is the single seam the orchestrator
//! sees; it picks the variant from configuration.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::category::Category;
use crate::provider::{SearchError, SearchProvider};

/// Everything the snippet service needs to assemble its blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetRequest {
    pub entity_name: String,
    pub enabled: Vec<Category>,
    pub sociable: u8,
    pub nature: u8,
    pub study: u8,
}

impl SnippetRequest {
    pub fn wants(&self, category: Category) -> bool {
        self.enabled.contains(&category)
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("uniName", self.entity_name.clone())];
        for (key, category) in [
            ("scholarships", Category::Scholarships),
            ("reviews", Category::Reviews),
            ("location", Category::Location),
            ("appTips", Category::AppTips),
        ] {
            pairs.push((key, self.wants(category).to_string()));
        }
        pairs.push(("sociable", self.sociable.to_string()));
        pairs.push(("nature", self.nature.to_string()));
        pairs.push(("study", self.study.to_string()));
        pairs
    }
}

#[async_trait]
pub trait SnippetSource: Send + Sync {
    /// Raw delimited text for the request; see [`crate::snippet`].
    async fn fetch(&self, request: &SnippetRequest) -> Result<String, SearchError>;
}

#[derive(Debug, Clone)]
pub struct HttpSnippetSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSnippetSource {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim().to_string(),
        }
    }
}

#[async_trait]
impl SnippetSource for HttpSnippetSource {
    #[instrument(skip(self, request), fields(entity = %request.entity_name))]
    async fn fetch(&self, request: &SnippetRequest) -> Result<String, SearchError> {
        if self.endpoint.is_empty() {
            return Err(SearchError::NotConfigured(
                "snippet endpoint not set".to_string(),
            ));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&request.query_pairs())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "snippet service returned an error");
            return Err(SearchError::Api {
                status: status.as_u16(),
                body,
            });
        }

        info!(bytes = body.len(), "snippet blob received");
        Ok(body)
    }
}

/// The content source selected for a run.
#[derive(Clone)]
pub enum ExternalContentProvider {
    /// One search per enabled category, each returning ranked candidates.
    LinkList {
        search: Arc<dyn SearchProvider>,
        per_category: usize,
    },
    /// One request returning every enabled category as delimited text.
    DelimitedText { source: Arc<dyn SnippetSource> },
}

impl ExternalContentProvider {
    pub fn name(&self) -> &'static str {
        match self {
            ExternalContentProvider::LinkList { .. } => "link_list",
            ExternalContentProvider::DelimitedText { .. } => "delimited_text",
        }
    }
}

impl fmt::Debug for ExternalContentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalContentProvider::LinkList { per_category, .. } => f
                .debug_struct("LinkList")
                .field("per_category", per_category)
                .finish_non_exhaustive(),
            ExternalContentProvider::DelimitedText { .. } => {
                f.debug_struct("DelimitedText").finish_non_exhaustive()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SnippetRequest {
        SnippetRequest {
            entity_name: "Ox".to_string(),
            enabled: vec![Category::Scholarships, Category::AppTips],
            sociable: 7,
            nature: 2,
            study: 10,
        }
    }

    #[test]
    fn query_pairs_cover_every_flag_and_trait() {
        let pairs = request().query_pairs();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("uniName"), Some("Ox"));
        assert_eq!(get("scholarships"), Some("true"));
        assert_eq!(get("reviews"), Some("false"));
        assert_eq!(get("location"), Some("false"));
        assert_eq!(get("appTips"), Some("true"));
        assert_eq!(get("sociable"), Some("7"));
        assert_eq!(get("nature"), Some("2"));
        assert_eq!(get("study"), Some("10"));
    }

    #[tokio::test]
    async fn empty_endpoint_is_not_configured() {
        let source = HttpSnippetSource::new("  ");
        assert!(matches!(
            source.fetch(&request()).await,
            Err(SearchError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running snippet service"]
    async fn fetch_from_local_service() {
        let source = HttpSnippetSource::new("http://localhost:5001/get-snippets");
        let body = source.fetch(&request()).await.unwrap();
        assert!(!body.is_empty());
    }
}
