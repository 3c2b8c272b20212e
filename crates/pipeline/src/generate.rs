//! Prompting helpers: session scoping, prompt truncation, deadlines and the
//! placeholder strings that stand in for failed generations.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use unilens_llm::{GenerativeTextService, LlmError, SessionGuard};
use unilens_search::{Category, SearchCandidate};

use crate::preferences::UserPreferences;

/// Text produced for one task, plus the failure message when `text` is a
/// placeholder standing in for an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub failure: Option<String>,
}

impl Generation {
    fn ok(text: String) -> Self {
        Self {
            text,
            failure: None,
        }
    }

    fn failed(task: &str, err: &LlmError) -> Self {
        Self {
            text: error_placeholder(task, &err.to_string()),
            failure: Some(err.to_string()),
        }
    }
}

pub fn error_placeholder(task: &str, message: &str) -> String {
    format!("[Error during {task}: {message}]")
}

pub fn no_input_placeholder(task: &str) -> String {
    format!("[No input provided for {task}.]")
}

/// First `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ── TextGenerator ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TextGenerator {
    service: Arc<dyn GenerativeTextService>,
    max_prompt_chars: usize,
    timeout: Duration,
}

impl TextGenerator {
    pub fn new(service: Arc<dyn GenerativeTextService>, max_prompt_chars: usize, timeout: Duration) -> Self {
        Self {
            service,
            max_prompt_chars,
            timeout,
        }
    }

    pub fn service(&self) -> &dyn GenerativeTextService {
        self.service.as_ref()
    }

    /// Acquire a session for `task`, bounded by the remote deadline.
    pub async fn open(&self, task: &str) -> Result<SessionGuard, LlmError> {
        tokio::time::timeout(self.timeout, SessionGuard::open(self.service.as_ref(), task))
            .await
            .unwrap_or(Err(LlmError::Timeout(self.timeout)))
    }

    /// One acquire/prompt/release cycle.  Never fails: errors come back as a
    /// bracketed placeholder with [`Generation::failure`] set.
    pub async fn generate(&self, prompt: &str, task: &str) -> Generation {
        if prompt.trim().is_empty() {
            warn!(%task, "empty prompt, skipping model call");
            return Generation::ok(no_input_placeholder(task));
        }

        let mut guard = match self.open(task).await {
            Ok(guard) => guard,
            Err(err) => {
                warn!(%task, error = %err, "could not open model session");
                return Generation::failed(task, &err);
            }
        };
        self.generate_in(&mut guard, prompt, task).await
    }

    /// Prompt through an already-open session.
    pub async fn generate_in(&self, guard: &mut SessionGuard, prompt: &str, task: &str) -> Generation {
        if prompt.trim().is_empty() {
            warn!(%task, "empty prompt, skipping model call");
            return Generation::ok(no_input_placeholder(task));
        }

        let limited = truncate_chars(prompt, self.max_prompt_chars);
        debug!(%task, chars = limited.chars().count(), "prompting model");
        let reply = tokio::time::timeout(self.timeout, guard.prompt(limited))
            .await
            .unwrap_or(Err(LlmError::Timeout(self.timeout)));

        match reply {
            Ok(text) => Generation::ok(text),
            Err(err) => {
                warn!(%task, error = %err, "generation failed");
                Generation::failed(task, &err)
            }
        }
    }
}

// ── Prompts ──────────────────────────────────────────────────────────────────

pub fn page_summary_prompt(prefs: &UserPreferences, page_text: &str) -> String {
    format!(
        "Generate a concise, single-paragraph summary of the following university course page. \
         The reader describes themselves as {}; subtly highlight aspects relevant to these traits \
         if they are prominent in the text:\n\n{page_text}",
        prefs.trait_line()
    )
}

fn snippet_focus(category: Category) -> &'static str {
    match category {
        Category::Scholarships => "eligibility, award amounts and deadlines",
        Category::Reviews => "the overall sentiment and recurring themes in what students say",
        Category::Location => "the city, the surrounding area and the campus setting",
        Category::AppTips => "concrete admission requirements and practical application advice",
    }
}

pub fn snippet_summary_prompt(
    category: Category,
    prefs: &UserPreferences,
    entity: &str,
    snippet: &str,
) -> String {
    format!(
        "Summarize the following {noun} information about {entity} in two or three sentences \
         for a prospective student, focusing on {focus}. The student rates themselves as {traits}; \
         mention details that match these traits when the text contains them. If the text is not \
         about {entity}, say so in one sentence.\n\nText:\n{snippet}",
        noun = category.noun(),
        focus = snippet_focus(category),
        traits = prefs.trait_line(),
    )
}

pub fn app_tips_prompt(prefs: &UserPreferences, page_summary: &str, tip_links: &[SearchCandidate]) -> String {
    let mut context = format!("Page Summary:\n{page_summary}\n\n");
    if !tip_links.is_empty() {
        context.push_str("Relevant application resources:\n");
        for link in tip_links {
            let title = if link.title.trim().is_empty() {
                &link.url
            } else {
                &link.title
            };
            context.push_str(&format!("- {title}\n"));
        }
    }
    format!(
        "Based on the context below, generate helpful application tips for a student applying to \
         this program. Tailor the advice slightly considering the student rates themselves as {}. \
         Use bullet points.\n\nContext:\n{context}",
        prefs.trait_line()
    )
}
