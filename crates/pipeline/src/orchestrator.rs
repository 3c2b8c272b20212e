//! One analysis run, end to end.
//!
//! ```text
//! availability ─► page summary ──────────────┐
//!              └► external content per category ─► app tips ─► store
//! ```
//!
//! The page summary and the external content run concurrently; categories
//! run concurrently with each other; snippets inside one category are
//! summarised one at a time.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};
use unilens_config::{AppConfig, SessionMode};
use unilens_llm::{Availability, GenerativeTextService};
use unilens_search::{
    Category, ExternalContentProvider, SearchCandidate, SearchError, SearchProvider,
    SnippetRequest, SnippetSource, parse_snippets,
};
use unilens_store::{ResultStore, StoreError, StoreScope};

use crate::error::AnalysisError;
use crate::generate::{
    Generation, TextGenerator, app_tips_prompt, error_placeholder, page_summary_prompt,
    snippet_summary_prompt,
};
use crate::page::{PageContext, PageSource};
use crate::preferences::UserPreferences;
use crate::result::{AnalysisResult, RunOutcome, StageError, TIPS_DISABLED, TopLevelFailure};

const PAGE_SUMMARY_TASK: &str = "page summary";
const APP_TIPS_TASK: &str = "application tips";
const SNIPPET_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub max_prompt_chars: usize,
    pub session_mode: SessionMode,
    /// Deadline applied to every remote call of a run.
    pub remote_timeout: Duration,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl AnalysisOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_prompt_chars: config.llm.max_prompt_chars,
            session_mode: config.llm.session_mode,
            remote_timeout: Duration::from_secs(config.analysis.remote_timeout_secs.max(1)),
        }
    }
}

/// Links, summaries and recorded failures from the external-content stage.
#[derive(Debug, Default)]
struct CategoryContent {
    links: BTreeMap<Category, Vec<SearchCandidate>>,
    summaries: BTreeMap<Category, String>,
    errors: Vec<StageError>,
}

pub struct AnalysisOrchestrator {
    generator: TextGenerator,
    content: ExternalContentProvider,
    store: Arc<dyn ResultStore>,
    options: AnalysisOptions,
}

impl AnalysisOrchestrator {
    pub fn new(
        service: Arc<dyn GenerativeTextService>,
        content: ExternalContentProvider,
        store: Arc<dyn ResultStore>,
        options: AnalysisOptions,
    ) -> Self {
        Self {
            generator: TextGenerator::new(service, options.max_prompt_chars, options.remote_timeout),
            content,
            store,
            options,
        }
    }

    /// Analyse text that has already been extracted.
    ///
    /// Always writes exactly one record to the analysis scope; the only
    /// error returned is failing to write it.
    pub async fn run(
        &self,
        prefs: &UserPreferences,
        page: &PageContext,
    ) -> Result<RunOutcome, StoreError> {
        let outcome = match self.ensure_available().await {
            Ok(()) => self.execute(prefs, page).await,
            Err(err) => failed(err),
        };
        self.persist(outcome)
    }

    /// Extract `url` through `source`, then analyse it.  Extraction failures
    /// are fatal: there is nothing to summarise.
    pub async fn analyze(
        &self,
        prefs: &UserPreferences,
        source: &dyn PageSource,
        url: &str,
    ) -> Result<RunOutcome, StoreError> {
        let outcome = match self.ensure_available().await {
            Err(err) => failed(err),
            Ok(()) => match tokio::time::timeout(self.options.remote_timeout, source.fetch(url)).await {
                Ok(Ok(page)) => self.execute(prefs, &page).await,
                Ok(Err(err)) => failed(err),
                Err(_) => failed(AnalysisError::RemoteFetchFailure {
                    stage: "page extraction".to_string(),
                    message: format!("no response within {:?}", self.options.remote_timeout),
                }),
            },
        };
        self.persist(outcome)
    }

    async fn ensure_available(&self) -> Result<(), AnalysisError> {
        let limit = self.options.remote_timeout;
        let availability = tokio::time::timeout(limit, self.generator.service().availability())
            .await
            .unwrap_or_else(|_| Availability::Unavailable {
                reason: format!("no answer within {limit:?}"),
            });

        match availability {
            Availability::Available => {
                info!(service = %self.generator.service().describe(), "model available");
                Ok(())
            }
            Availability::Unavailable { reason } => {
                warn!(%reason, "model unavailable, aborting run");
                Err(AnalysisError::CapabilityUnavailable(format!(
                    "AI model is currently unavailable ({reason}). Check that the model backend is running."
                )))
            }
        }
    }

    async fn execute(&self, prefs: &UserPreferences, page: &PageContext) -> RunOutcome {
        match AssertUnwindSafe(self.collect(prefs, page)).catch_unwind().await {
            Ok(result) => RunOutcome::Completed(result),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(%message, "analysis run panicked");
                failed(AnalysisError::UnexpectedFailure(message))
            }
        }
    }

    fn persist(&self, outcome: RunOutcome) -> Result<RunOutcome, StoreError> {
        self.store
            .replace(StoreScope::Analysis, &outcome.to_store_entries())?;
        match &outcome {
            RunOutcome::Completed(result) => {
                info!(recorded_errors = result.errors.len(), "analysis stored")
            }
            RunOutcome::Failed(failure) => warn!(error = %failure.message(), "analysis failure stored"),
        }
        Ok(outcome)
    }

    #[instrument(skip_all, fields(url = %page.source_url, protocol = self.content.name()))]
    async fn collect(&self, prefs: &UserPreferences, page: &PageContext) -> AnalysisResult {
        let mut result = AnalysisResult::default();

        let summary_prompt = if page.text.trim().is_empty() {
            String::new()
        } else {
            page_summary_prompt(prefs, &page.text)
        };
        let (summary, content) = tokio::join!(
            self.generator.generate(&summary_prompt, PAGE_SUMMARY_TASK),
            self.external_content(prefs, page),
        );

        result.page_summary = Some(take_text(summary, PAGE_SUMMARY_TASK, &mut result.errors));
        result.links.extend(content.links);
        result.summaries.extend(content.summaries);
        result.errors.extend(content.errors);

        result.generated_app_tips = if prefs.app_tips {
            let prompt = app_tips_prompt(
                prefs,
                result.page_summary.as_deref().unwrap_or_default(),
                result.links(Category::AppTips),
            );
            let tips = self.generator.generate(&prompt, APP_TIPS_TASK).await;
            take_text(tips, APP_TIPS_TASK, &mut result.errors)
        } else {
            debug!("application tips disabled");
            TIPS_DISABLED.to_string()
        };

        let open = self.generator.service().open_sessions();
        if open > 0 {
            warn!(open, "model sessions still open after run");
        } else {
            debug!("all model sessions released");
        }
        info!(recorded_errors = result.errors.len(), "analysis complete");
        result
    }

    // ── External content ────────────────────────────────────────────────────

    async fn external_content(&self, prefs: &UserPreferences, page: &PageContext) -> CategoryContent {
        if !prefs.any_category() {
            info!("no categories requested, skipping external content");
            return CategoryContent::default();
        }
        let Some(entity) = page.entity_name() else {
            let error = StageError::new(
                "entity name",
                format!("could not derive an institution name from {}", page.source_url),
            );
            warn!(stage = %error.stage, message = %error.message, "skipping external content");
            return CategoryContent {
                errors: vec![error],
                ..CategoryContent::default()
            };
        };
        info!(%entity, categories = ?prefs.enabled(), "fetching external content");

        match &self.content {
            ExternalContentProvider::LinkList {
                search,
                per_category,
            } => {
                self.fetch_links(search.as_ref(), *per_category, prefs, &entity)
                    .await
            }
            ExternalContentProvider::DelimitedText { source } => {
                self.fetch_snippets(source.as_ref(), prefs, &entity).await
            }
        }
    }

    async fn fetch_links(
        &self,
        search: &dyn SearchProvider,
        per_category: usize,
        prefs: &UserPreferences,
        entity: &str,
    ) -> CategoryContent {
        let limit = self.options.remote_timeout;
        let searches = prefs.enabled().into_iter().map(|category| async move {
            let query = category.search_query(entity);
            let outcome = with_deadline(limit, search.search(&query, per_category)).await;
            (category, outcome)
        });

        let mut content = CategoryContent::default();
        for (category, outcome) in join_all(searches).await {
            match outcome {
                Ok(links) => {
                    info!(%category, links = links.len(), "category search complete");
                    content.links.insert(category, links);
                }
                Err(err) => {
                    let err = AnalysisError::from_search(format!("{} search", category.noun()), &err);
                    warn!(%category, error = %err, "category search failed");
                    content.errors.push(err.to_stage_error());
                    content.links.insert(category, Vec::new());
                }
            }
        }
        content
    }

    async fn fetch_snippets(
        &self,
        source: &dyn SnippetSource,
        prefs: &UserPreferences,
        entity: &str,
    ) -> CategoryContent {
        let mut content = CategoryContent::default();
        let request = SnippetRequest {
            entity_name: entity.to_string(),
            enabled: prefs.enabled(),
            sociable: prefs.sociable,
            nature: prefs.nature,
            study: prefs.study,
        };

        let raw = match with_deadline(self.options.remote_timeout, source.fetch(&request)).await {
            Ok(raw) => raw,
            Err(err) => {
                let err = AnalysisError::from_search("external content fetch", &err);
                warn!(error = %err, "snippet fetch failed");
                content.errors.push(err.to_stage_error());
                return content;
            }
        };

        let groups = parse_snippets(&raw);
        info!(sections = groups.len(), bytes = raw.len(), "snippet blob parsed");

        let groups = &groups;
        let summaries = prefs.enabled().into_iter().map(|category| async move {
            let usable = groups.usable(category);
            debug!(
                %category,
                total = groups.get(category).len(),
                usable = usable.len(),
                "snippets screened"
            );
            self.summarize_category(category, prefs, entity, &usable).await
        });

        for (category, summary, errors) in join_all(summaries).await {
            content.summaries.insert(category, summary);
            content.errors.extend(errors);
        }
        content
    }

    /// Summarise the usable snippets of one category in order, joined by a
    /// blank line.  No snippets means an empty summary.
    async fn summarize_category(
        &self,
        category: Category,
        prefs: &UserPreferences,
        entity: &str,
        snippets: &[&str],
    ) -> (Category, String, Vec<StageError>) {
        let mut errors = Vec::new();
        if snippets.is_empty() {
            return (category, String::new(), errors);
        }

        let mut parts = Vec::with_capacity(snippets.len());
        match self.options.session_mode {
            SessionMode::PerPrompt => {
                for (index, snippet) in snippets.iter().enumerate() {
                    let task = snippet_task(category, index);
                    let prompt = snippet_summary_prompt(category, prefs, entity, snippet);
                    let generation = self.generator.generate(&prompt, &task).await;
                    parts.push(take_text(generation, &task, &mut errors));
                }
            }
            SessionMode::PerCategory => {
                let category_task = format!("{} summary", category.noun());
                match self.generator.open(&category_task).await {
                    Ok(mut guard) => {
                        for (index, snippet) in snippets.iter().enumerate() {
                            let task = snippet_task(category, index);
                            let prompt = snippet_summary_prompt(category, prefs, entity, snippet);
                            let generation = self.generator.generate_in(&mut guard, &prompt, &task).await;
                            parts.push(take_text(generation, &task, &mut errors));
                        }
                    }
                    Err(err) => {
                        warn!(%category, error = %err, "could not open category session");
                        errors.push(StageError::new(&category_task, err.to_string()));
                        parts.push(error_placeholder(&category_task, &err.to_string()));
                    }
                }
            }
        }

        info!(%category, snippets = snippets.len(), "category summarised");
        (category, parts.join(SNIPPET_SEPARATOR), errors)
    }
}

fn snippet_task(category: Category, index: usize) -> String {
    format!("{} snippet {}", category.noun(), index + 1)
}

/// Keep the generated (or placeholder) text, recording the failure if any.
fn take_text(generation: Generation, task: &str, errors: &mut Vec<StageError>) -> String {
    if let Some(message) = generation.failure {
        errors.push(StageError::new(task, message));
    }
    generation.text
}

fn failed(error: AnalysisError) -> RunOutcome {
    RunOutcome::Failed(TopLevelFailure { error })
}

async fn with_deadline<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, SearchError>>,
) -> Result<T, SearchError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(SearchError::Timeout(limit)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "an unknown error occurred during analysis".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use unilens_llm::{LlmError, TextSession};
    use unilens_store::MemoryResultStore;

    use super::*;
    use crate::page::StaticPageSource;

    const PAGE_URL: &str = "https://www.abdn.ac.uk/study/marine-biology";

    // ── Scripted model ─────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeModel {
        unavailable: bool,
        hang_availability: bool,
        open: Arc<AtomicUsize>,
        opened: AtomicUsize,
        prompts: Arc<Mutex<Vec<String>>>,
        fail_marker: Option<&'static str>,
        panic_marker: Option<&'static str>,
    }

    struct FakeSession {
        open: Arc<AtomicUsize>,
        prompts: Arc<Mutex<Vec<String>>>,
        fail_marker: Option<&'static str>,
        panic_marker: Option<&'static str>,
        released: bool,
    }

    #[async_trait]
    impl TextSession for FakeSession {
        async fn prompt(&mut self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(marker) = self.panic_marker.filter(|m| prompt.contains(m)) {
                panic!("model exploded on {marker}");
            }
            if self.fail_marker.is_some_and(|m| prompt.contains(m)) {
                return Err(LlmError::Unavailable("scripted failure".into()));
            }
            Ok(format!("<{}>", prompt.lines().last().unwrap_or_default()))
        }

        fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.open.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl GenerativeTextService for FakeModel {
        fn describe(&self) -> String {
            "fake".into()
        }

        async fn availability(&self) -> Availability {
            if self.hang_availability {
                std::future::pending::<()>().await;
            }
            if self.unavailable {
                Availability::Unavailable {
                    reason: "model not downloaded".into(),
                }
            } else {
                Availability::Available
            }
        }

        async fn open_session(&self) -> Result<Box<dyn TextSession>, LlmError> {
            self.open.fetch_add(1, Ordering::SeqCst);
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                open: Arc::clone(&self.open),
                prompts: Arc::clone(&self.prompts),
                fail_marker: self.fail_marker,
                panic_marker: self.panic_marker,
                released: false,
            }))
        }

        fn open_sessions(&self) -> usize {
            self.open.load(Ordering::SeqCst)
        }
    }

    impl FakeModel {
        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        fn prompt_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    // ── Scripted content sources ───────────────────────────────────────────

    #[derive(Default)]
    struct FakeSearch {
        queries: Mutex<Vec<String>>,
        fail_containing: Option<&'static str>,
        malformed_containing: Option<&'static str>,
        hang_containing: Option<&'static str>,
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(
            &self,
            query: &str,
            max_results: usize,
        ) -> Result<Vec<SearchCandidate>, SearchError> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.hang_containing.is_some_and(|m| query.contains(m)) {
                std::future::pending::<()>().await;
            }
            if self.fail_containing.is_some_and(|m| query.contains(m)) {
                return Err(SearchError::Api {
                    status: 500,
                    body: "backend error".into(),
                });
            }
            if self.malformed_containing.is_some_and(|m| query.contains(m)) {
                return Err(SearchError::Malformed("expected value at line 1".into()));
            }
            Ok((1..=max_results.min(2))
                .map(|i| {
                    SearchCandidate::new(
                        format!("{query} #{i}"),
                        format!("https://site{i}.example.com/page"),
                        None,
                    )
                })
                .collect())
        }
    }

    impl FakeSearch {
        fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    struct FakeSnippets {
        blob: Result<String, u16>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SnippetSource for FakeSnippets {
        async fn fetch(&self, _request: &SnippetRequest) -> Result<String, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.blob.clone().map_err(|status| SearchError::Api {
                status,
                body: "snippet service down".into(),
            })
        }
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    fn orchestrator(
        model: &Arc<FakeModel>,
        content: ExternalContentProvider,
        store: &Arc<MemoryResultStore>,
        session_mode: SessionMode,
    ) -> AnalysisOrchestrator {
        orchestrator_with_deadline(model, content, store, session_mode, Duration::from_secs(5))
    }

    fn orchestrator_with_deadline(
        model: &Arc<FakeModel>,
        content: ExternalContentProvider,
        store: &Arc<MemoryResultStore>,
        session_mode: SessionMode,
        remote_timeout: Duration,
    ) -> AnalysisOrchestrator {
        let options = AnalysisOptions {
            session_mode,
            remote_timeout,
            ..AnalysisOptions::default()
        };
        let service: Arc<dyn GenerativeTextService> = model.clone();
        let store: Arc<dyn ResultStore> = store.clone();
        AnalysisOrchestrator::new(service, content, store, options)
    }

    fn link_list(search: &Arc<FakeSearch>) -> ExternalContentProvider {
        ExternalContentProvider::LinkList {
            search: search.clone(),
            per_category: 5,
        }
    }

    fn delimited(blob: Result<String, u16>) -> (ExternalContentProvider, Arc<FakeSnippets>) {
        let source = Arc::new(FakeSnippets {
            blob,
            calls: AtomicUsize::new(0),
        });
        (
            ExternalContentProvider::DelimitedText {
                source: source.clone(),
            },
            source,
        )
    }

    fn all_categories() -> UserPreferences {
        let mut prefs = UserPreferences::default();
        for category in Category::ALL {
            prefs.set(category, true);
        }
        prefs
    }

    fn no_categories() -> UserPreferences {
        let mut prefs = UserPreferences::default();
        for category in Category::ALL {
            prefs.set(category, false);
        }
        prefs
    }

    fn page(text: &str) -> PageContext {
        PageContext::new(text, PAGE_URL)
    }

    fn long(tag: &str) -> String {
        format!("{tag} {}", "with plenty of supporting detail ".repeat(4))
            .trim()
            .to_string()
    }

    fn completed(outcome: RunOutcome) -> AnalysisResult {
        match outcome {
            RunOutcome::Completed(result) => result,
            RunOutcome::Failed(failure) => panic!("run failed: {}", failure.message()),
        }
    }

    fn failure(outcome: RunOutcome) -> AnalysisError {
        match outcome {
            RunOutcome::Failed(failure) => failure.error,
            RunOutcome::Completed(_) => panic!("run unexpectedly completed"),
        }
    }

    // ── Fatal paths ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unavailable_model_is_fatal_and_searches_nothing() {
        let model = Arc::new(FakeModel {
            unavailable: true,
            ..FakeModel::default()
        });
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let outcome = orch.run(&all_categories(), &page("Course text")).await.unwrap();

        assert!(matches!(failure(outcome), AnalysisError::CapabilityUnavailable(_)));
        assert_eq!(search.calls(), 0);
        assert_eq!(model.opened(), 0);
        let stored = store.entries(StoreScope::Analysis).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(
            stored["analysisError"]
                .as_str()
                .unwrap()
                .contains("model not downloaded")
        );
    }

    #[tokio::test]
    async fn panic_inside_a_stage_becomes_a_failure_record() {
        let model = Arc::new(FakeModel {
            panic_marker: Some("EXPLODE"),
            ..FakeModel::default()
        });
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let outcome = orch.run(&all_categories(), &page("EXPLODE")).await.unwrap();

        match failure(outcome) {
            AnalysisError::UnexpectedFailure(message) => {
                assert_eq!(message, "model exploded on EXPLODE")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(model.open_sessions(), 0, "guard released during unwind");
        let stored = store.entries(StoreScope::Analysis).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored.contains_key("analysisError"));
    }

    #[tokio::test]
    async fn failed_extraction_is_fatal() {
        struct BrokenPage;

        #[async_trait]
        impl PageSource for BrokenPage {
            async fn fetch(&self, _url: &str) -> Result<PageContext, AnalysisError> {
                Err(AnalysisError::RemoteFetchFailure {
                    stage: "page extraction".into(),
                    message: "Could not find any relevant course content on this page.".into(),
                })
            }
        }

        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let outcome = orch
            .analyze(&UserPreferences::default(), &BrokenPage, PAGE_URL)
            .await
            .unwrap();

        assert!(!outcome.is_completed());
        assert_eq!(search.calls(), 0);
        assert_eq!(
            store.get(StoreScope::Analysis, "analysisError").unwrap(),
            Some(json!(
                "page extraction failed: Could not find any relevant course content on this page."
            ))
        );
    }

    // ── Link-list protocol ─────────────────────────────────────────────────

    #[tokio::test]
    async fn failing_category_search_is_isolated() {
        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch {
            fail_containing: Some("student reviews"),
            ..FakeSearch::default()
        });
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let result = completed(orch.run(&all_categories(), &page("Course text")).await.unwrap());

        assert_eq!(search.calls(), 4);
        assert!(result.links(Category::Reviews).is_empty());
        for category in [Category::Scholarships, Category::Location, Category::AppTips] {
            assert_eq!(result.links(category).len(), 2, "{category}");
        }
        assert_eq!(
            result.errors,
            vec![StageError::new(
                "student reviews search",
                "search API error 500: backend error"
            )]
        );
        assert_eq!(result.page_summary.as_deref(), Some("<Course text>"));
        assert_eq!(model.open_sessions(), 0);

        let stored = store.entries(StoreScope::Analysis).unwrap();
        assert_eq!(stored.len(), 12);
        assert_eq!(stored["reviewLinks"], json!([]));
        assert_eq!(stored["analysisErrors"][0]["stage"], json!("student reviews search"));
    }

    #[tokio::test]
    async fn queries_use_the_derived_entity_name() {
        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        orch.run(&UserPreferences::default(), &page("Course text"))
            .await
            .unwrap();

        let queries = search.queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 2, "only the enabled categories are searched");
        assert!(queries.contains(&"\"Abdn\" scholarships OR financial aid".to_string()));
    }

    #[tokio::test]
    async fn malformed_search_response_is_recorded_as_fetch_failure() {
        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch {
            malformed_containing: Some("scholarships"),
            ..FakeSearch::default()
        });
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let result = completed(
            orch.run(&UserPreferences::default(), &page("Course text"))
                .await
                .unwrap(),
        );

        assert!(result.links(Category::Scholarships).is_empty());
        assert_eq!(result.links(Category::Reviews).len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.starts_with("malformed response:"));
    }

    #[tokio::test]
    async fn no_categories_means_no_external_calls() {
        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let result = completed(orch.run(&no_categories(), &page("Course text")).await.unwrap());

        assert_eq!(search.calls(), 0);
        assert!(result.errors.is_empty());
        assert_eq!(result.generated_app_tips, TIPS_DISABLED);
        assert_eq!(model.opened(), 1, "only the page summary");
    }

    #[tokio::test]
    async fn app_tips_prompt_uses_tip_link_titles() {
        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let result = completed(orch.run(&all_categories(), &page("Course text")).await.unwrap());

        let prompts = model.prompts.lock().unwrap().clone();
        let tips_prompt = prompts
            .iter()
            .find(|p| p.contains("application tips for a student"))
            .expect("tips prompt sent");
        assert!(tips_prompt.contains("Page Summary:\n<Course text>"));
        assert!(tips_prompt.contains("application tips OR admission requirements"));
        assert_ne!(result.generated_app_tips, TIPS_DISABLED);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn page_summary_failure_is_recorded_not_fatal() {
        let model = Arc::new(FakeModel {
            fail_marker: Some("BROKEN PAGE"),
            ..FakeModel::default()
        });
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let result = completed(
            orch.run(&UserPreferences::default(), &page("BROKEN PAGE"))
                .await
                .unwrap(),
        );

        assert_eq!(
            result.page_summary.as_deref(),
            Some("[Error during page summary: language model unavailable: scripted failure]")
        );
        assert_eq!(result.errors[0].stage, "page summary");
        assert_eq!(result.links(Category::Scholarships).len(), 2);
    }

    #[tokio::test]
    async fn empty_page_text_gets_no_input_placeholder() {
        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let result = completed(orch.run(&no_categories(), &page("   ")).await.unwrap());

        assert_eq!(
            result.page_summary.as_deref(),
            Some("[No input provided for page summary.]")
        );
        assert_eq!(model.opened(), 0);
    }

    // ── Delimited-text protocol ────────────────────────────────────────────

    #[tokio::test]
    async fn snippets_are_screened_then_summarised_in_order() {
        let r1 = long("Review one");
        let r2 = long("Review two");
        let blob = format!(
            "--- SCHOLARSHIPS ---\nshort\n---\nCould not retrieve content\n\
             --- STUDENT REVIEWS ---\n{r1}\n---\nCould not retrieve content\n---\n{r2}\n\
             --- LOCATION INFO ---\n{}\n",
            long("Location")
        );
        let model = Arc::new(FakeModel::default());
        let (content, source) = delimited(Ok(blob));
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, content, &store, SessionMode::PerPrompt);

        let result = completed(
            orch.run(&UserPreferences::default(), &page("Course text"))
                .await
                .unwrap(),
        );

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.summary(Category::Scholarships), "");
        assert_eq!(result.summary(Category::Reviews), format!("<{r1}>\n\n<{r2}>"));
        assert_eq!(result.summary(Category::Location), "", "location not requested");
        assert!(result.errors.is_empty());
        assert_eq!(model.opened(), 3, "page summary plus one per valid snippet");
        assert_eq!(model.open_sessions(), 0);

        let stored = store.entries(StoreScope::Analysis).unwrap();
        assert_eq!(stored["scholarshipSummary"], json!(""));
        assert_eq!(stored["reviewLinks"], json!([]));
    }

    #[tokio::test]
    async fn one_failing_snippet_does_not_stop_its_siblings() {
        let r1 = long("Review one");
        let r2 = long("BROKEN review");
        let r3 = long("Review three");
        let blob = format!("--- STUDENT REVIEWS ---\n{r1}\n---\n{r2}\n---\n{r3}");
        let model = Arc::new(FakeModel {
            fail_marker: Some("BROKEN"),
            ..FakeModel::default()
        });
        let (content, _) = delimited(Ok(blob));
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, content, &store, SessionMode::PerPrompt);

        let result = completed(
            orch.run(&UserPreferences::default(), &page("Course text"))
                .await
                .unwrap(),
        );

        assert_eq!(
            result.summary(Category::Reviews),
            format!(
                "<{r1}>\n\n[Error during student reviews snippet 2: language model unavailable: scripted failure]\n\n<{r3}>"
            )
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, "student reviews snippet 2");
        assert_eq!(model.open_sessions(), 0);
    }

    #[tokio::test]
    async fn per_category_mode_reuses_one_session_per_category() {
        let blob = format!(
            "--- SCHOLARSHIPS ---\n{}\n---\n{}\n--- STUDENT REVIEWS ---\n{}\n---\n{}",
            long("Award a"),
            long("Award b"),
            long("Review a"),
            long("Review b")
        );
        let model = Arc::new(FakeModel::default());
        let (content, _) = delimited(Ok(blob));
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, content, &store, SessionMode::PerCategory);

        let result = completed(
            orch.run(&UserPreferences::default(), &page("Course text"))
                .await
                .unwrap(),
        );

        assert_eq!(model.prompt_count(), 5);
        assert_eq!(model.opened(), 3, "page summary plus one per category");
        assert_eq!(model.open_sessions(), 0);
        assert!(result.summary(Category::Scholarships).contains("Award b"));
    }

    #[tokio::test]
    async fn snippet_fetch_failure_leaves_empty_summaries() {
        let model = Arc::new(FakeModel::default());
        let (content, _) = delimited(Err(503));
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, content, &store, SessionMode::PerPrompt);

        let result = completed(orch.run(&all_categories(), &page("Course text")).await.unwrap());

        for category in Category::ALL {
            assert_eq!(result.summary(category), "");
        }
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, "external content fetch");
        assert_ne!(result.generated_app_tips, TIPS_DISABLED);
    }

    #[tokio::test]
    async fn analyze_runs_extraction_first() {
        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator(&model, link_list(&search), &store, SessionMode::PerPrompt);

        let outcome = orch
            .analyze(
                &UserPreferences::default(),
                &StaticPageSource::new("Marine biology at Aberdeen"),
                PAGE_URL,
            )
            .await
            .unwrap();

        let result = completed(outcome);
        assert_eq!(result.page_summary.as_deref(), Some("<Marine biology at Aberdeen>"));
        assert_eq!(search.calls(), 2);
    }

    // ── Deadlines ──────────────────────────────────────────────────────────

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn hung_availability_check_is_fatal() {
        let model = Arc::new(FakeModel {
            hang_availability: true,
            ..FakeModel::default()
        });
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator_with_deadline(
            &model,
            link_list(&search),
            &store,
            SessionMode::PerPrompt,
            SHORT,
        );

        let outcome = orch.run(&all_categories(), &page("Course text")).await.unwrap();

        match failure(outcome) {
            AnalysisError::CapabilityUnavailable(message) => {
                assert!(message.contains("no answer within 50ms"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(search.calls(), 0);
        assert_eq!(model.opened(), 0);
    }

    #[tokio::test]
    async fn hung_category_search_times_out_alone() {
        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch {
            hang_containing: Some("student reviews"),
            ..FakeSearch::default()
        });
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator_with_deadline(
            &model,
            link_list(&search),
            &store,
            SessionMode::PerPrompt,
            SHORT,
        );

        let result = completed(orch.run(&all_categories(), &page("Course text")).await.unwrap());

        assert!(result.links(Category::Reviews).is_empty());
        for category in [Category::Scholarships, Category::Location, Category::AppTips] {
            assert_eq!(result.links(category).len(), 2, "{category}");
        }
        assert_eq!(
            result.errors,
            vec![StageError::new("student reviews search", "no response within 50ms")]
        );
        assert_eq!(
            store.get(StoreScope::Analysis, "reviewLinks").unwrap(),
            Some(json!([]))
        );
        assert_eq!(model.open_sessions(), 0);
    }

    #[tokio::test]
    async fn hung_snippet_fetch_is_recorded() {
        struct StuckSnippets;

        #[async_trait]
        impl SnippetSource for StuckSnippets {
            async fn fetch(&self, _request: &SnippetRequest) -> Result<String, SearchError> {
                std::future::pending().await
            }
        }

        let model = Arc::new(FakeModel::default());
        let content = ExternalContentProvider::DelimitedText {
            source: Arc::new(StuckSnippets),
        };
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator_with_deadline(&model, content, &store, SessionMode::PerPrompt, SHORT);

        let result = completed(
            orch.run(&UserPreferences::default(), &page("Course text"))
                .await
                .unwrap(),
        );

        assert_eq!(
            result.errors,
            vec![StageError::new("external content fetch", "no response within 50ms")]
        );
        assert_eq!(result.summary(Category::Scholarships), "");
        assert_eq!(result.page_summary.as_deref(), Some("<Course text>"));
    }

    #[tokio::test]
    async fn hung_page_extraction_is_fatal() {
        struct StuckPage;

        #[async_trait]
        impl PageSource for StuckPage {
            async fn fetch(&self, _url: &str) -> Result<PageContext, AnalysisError> {
                std::future::pending().await
            }
        }

        let model = Arc::new(FakeModel::default());
        let search = Arc::new(FakeSearch::default());
        let store = Arc::new(MemoryResultStore::new());
        let orch = orchestrator_with_deadline(
            &model,
            link_list(&search),
            &store,
            SessionMode::PerPrompt,
            SHORT,
        );

        let outcome = orch
            .analyze(&UserPreferences::default(), &StuckPage, PAGE_URL)
            .await
            .unwrap();

        assert!(!outcome.is_completed());
        assert_eq!(search.calls(), 0);
        assert_eq!(
            store.get(StoreScope::Analysis, "analysisError").unwrap(),
            Some(json!("page extraction failed: no response within 50ms"))
        );
    }
}
