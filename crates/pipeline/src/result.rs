use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use unilens_search::{Category, SearchCandidate};
use unilens_store::Entries;

use crate::error::AnalysisError;

/// Placeholder written when the user switched tips off.
pub const TIPS_DISABLED: &str = "[Application tip generation disabled in preferences.]";

/// One recorded, non-fatal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

impl StageError {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Aggregate of one completed run.  Every category always has an entry in
/// both `summaries` and `links`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub page_summary: Option<String>,
    pub summaries: BTreeMap<Category, String>,
    pub links: BTreeMap<Category, Vec<SearchCandidate>>,
    pub generated_app_tips: String,
    pub errors: Vec<StageError>,
    pub generated_at: DateTime<Utc>,
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self {
            page_summary: None,
            summaries: Category::ALL
                .into_iter()
                .map(|category| (category, String::new()))
                .collect(),
            links: Category::ALL
                .into_iter()
                .map(|category| (category, Vec::new()))
                .collect(),
            generated_app_tips: TIPS_DISABLED.to_string(),
            errors: Vec::new(),
            generated_at: Utc::now(),
        }
    }
}

impl AnalysisResult {
    pub fn summary(&self, category: Category) -> &str {
        self.summaries.get(&category).map_or("", String::as_str)
    }

    pub fn links(&self, category: Category) -> &[SearchCandidate] {
        self.links.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    /// Flat record written to the analysis scope.  All keys are always
    /// present.
    pub fn to_store_entries(&self) -> Entries {
        let mut entries = Entries::new();
        entries.insert(
            "pageSummary".to_string(),
            self.page_summary.as_ref().map_or(Value::Null, |s| json!(s)),
        );
        for category in Category::ALL {
            entries.insert(
                category.links_key().to_string(),
                json!(self.links(category)),
            );
            entries.insert(
                category.summary_key().to_string(),
                json!(self.summary(category)),
            );
        }
        entries.insert("generatedAppTips".to_string(), json!(self.generated_app_tips));
        entries.insert("analysisErrors".to_string(), json!(self.errors));
        entries.insert(
            "generatedAt".to_string(),
            json!(self.generated_at.to_rfc3339()),
        );
        entries
    }
}

/// A run that produced no result, only a message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelFailure {
    pub error: AnalysisError,
}

impl TopLevelFailure {
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    pub fn to_store_entries(&self) -> Entries {
        let mut entries = Entries::new();
        entries.insert("analysisError".to_string(), json!(self.message()));
        entries
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(AnalysisResult),
    Failed(TopLevelFailure),
}

impl RunOutcome {
    pub fn to_store_entries(&self) -> Entries {
        match self {
            RunOutcome::Completed(result) => result.to_store_entries(),
            RunOutcome::Failed(failure) => failure.to_store_entries(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}
