use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Protocol and session modes ────────────────────────────────────────────────

/// Which shape of external content the analysis pipeline consumes.
///
/// | Protocol         | Behaviour                                                   |
/// |------------------|-------------------------------------------------------------|
/// | `link_list`      | One search per enabled category, results kept as links.     |
/// | `delimited_text` | One fetch of `--- LABEL ---` text, snippets summarised.     |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentProtocol {
    #[default]
    LinkList,
    DelimitedText,
}

/// How generative-text sessions are scoped.
///
/// `per_prompt` opens and releases one session for every prompt.  `per_category`
/// reuses one session for all snippet prompts of a single category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    PerPrompt,
    PerCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub ollama_model: String,
    pub openrouter_model: String,
    /// Base URL for the Ollama API.  Overridden at runtime by the
    /// `OLLAMA_BASE_URL` environment variable when set.
    pub ollama_base_url: String,
    /// Prompts are cut to this many characters before they reach the model.
    pub max_prompt_chars: usize,
    pub session_mode: SessionMode,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            openrouter_model: "openai/gpt-4o-mini".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            max_prompt_chars: 18_000,
            session_mode: SessionMode::PerPrompt,
        }
    }
}

// ── Search config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Google Custom Search API key.  `GOOGLE_API_KEY` takes precedence.
    pub api_key: String,
    /// Programmable search engine id (`cx`).  `GOOGLE_SEARCH_ENGINE_ID` takes
    /// precedence.
    pub engine_id: String,
    pub endpoint: String,
    /// Links requested for each enabled analysis category.
    pub results_per_category: usize,
    /// Candidates requested for a program discovery search, before filtering.
    /// Fetched ten per request; the API serves at most 100.
    pub discovery_initial_results: usize,
    /// Upper bound on program pages kept after filtering.
    pub discovery_max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            engine_id: String::new(),
            endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
            results_per_category: 5,
            discovery_initial_results: 15,
            discovery_max_results: 10,
        }
    }
}

impl SearchConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.engine_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub protocol: ContentProtocol,
    /// Service returning `--- LABEL ---` delimited text.  Only used by the
    /// `delimited_text` protocol.
    pub snippet_endpoint: String,
    /// Deadline applied to every remote call (search, snippet fetch, model
    /// prompt).
    pub remote_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            protocol: ContentProtocol::LinkList,
            snippet_endpoint: String::new(),
            remote_timeout_secs: 30,
        }
    }
}

/// Stored defaults for what a run looks for and how the user describes
/// themselves.  Traits are on a 0–10 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    pub scholarships: bool,
    pub reviews: bool,
    pub location: bool,
    pub app_tips: bool,
    pub sociable: u8,
    pub nature: u8,
    pub study: u8,
    pub course: String,
    pub location_query: String,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            scholarships: true,
            reviews: true,
            location: false,
            app_tips: false,
            sociable: 5,
            nature: 5,
            study: 5,
            course: String::new(),
            location_query: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: ".unilens/results.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub analysis: AnalysisConfig,
    pub preferences: PreferencesConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        config.apply_env_overrides(|name| env::var(name).ok());
        Ok(config)
    }

    /// Apply the environment overrides, reading variables through `lookup`.
    /// Empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(value) = var("OLLAMA_BASE_URL") {
            self.llm.provider = "ollama".to_string();
            self.llm.ollama_base_url = value;
        }
        // Search credentials from the environment win over the config file.
        if let Some(key) = var("GOOGLE_API_KEY") {
            self.search.api_key = key;
        }
        if let Some(cx) = var("GOOGLE_SEARCH_ENGINE_ID") {
            self.search.engine_id = cx;
        }
        if let Some(endpoint) = var("UNILENS_SNIPPET_ENDPOINT") {
            self.analysis.snippet_endpoint = endpoint;
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn active_model(&self) -> &str {
        if self.llm.provider.eq_ignore_ascii_case("openrouter") {
            &self.llm.openrouter_model
        } else {
            &self.llm.ollama_model
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
