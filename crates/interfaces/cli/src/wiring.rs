//! Builds the capabilities a command needs from the loaded configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use unilens_config::{AppConfig, ContentProtocol};
use unilens_llm::{GenerativeTextService, Provider, build_service};
use unilens_search::{ExternalContentProvider, GoogleSearch, HttpSnippetSource, SearchProvider};
use unilens_store::{RedbResultStore, ResultStore};

pub fn text_service(config: &AppConfig) -> Arc<dyn GenerativeTextService> {
    build_service(
        Provider::from_name(&config.llm.provider),
        config.active_model(),
        &config.llm.ollama_base_url,
    )
}

pub fn search_provider(config: &AppConfig) -> Arc<dyn SearchProvider> {
    Arc::new(GoogleSearch::new(
        &config.search.endpoint,
        &config.search.api_key,
        &config.search.engine_id,
    ))
}

pub fn content_provider(config: &AppConfig, protocol: ContentProtocol) -> ExternalContentProvider {
    match protocol {
        ContentProtocol::LinkList => ExternalContentProvider::LinkList {
            search: search_provider(config),
            per_category: config.search.results_per_category,
        },
        ContentProtocol::DelimitedText => ExternalContentProvider::DelimitedText {
            source: Arc::new(HttpSnippetSource::new(&config.analysis.snippet_endpoint)),
        },
    }
}

pub fn open_store(config: &AppConfig) -> Result<Arc<dyn ResultStore>> {
    let store = RedbResultStore::open(&config.store.path)
        .with_context(|| format!("opening result store at {}", config.store.path))?;
    Ok(Arc::new(store))
}

/// The run lock lives beside the store file.
pub fn run_lock_path(config: &AppConfig) -> PathBuf {
    Path::new(&config.store.path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("run_state.json")
}
