//! Generative-text capability: the service/session traits the pipeline
//! prompts through, plus the Ollama and OpenRouter HTTP backends.

mod session;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub use session::SessionGuard;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenRouter,
}

impl Provider {
    /// Resolve a configured provider name.  Anything that is not
    /// `openrouter` (case-insensitive) falls back to Ollama.
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("openrouter") {
            Provider::OpenRouter
        } else {
            Provider::Ollama
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Ollama => f.write_str("Ollama"),
            Provider::OpenRouter => f.write_str("OpenRouter"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} error ({status}): {body}")]
    Api {
        provider: Provider,
        status: u16,
        body: String,
    },
    #[error("{0} response missing text")]
    MissingText(Provider),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// Whether the capability can be used right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable { reason: String },
}

impl Availability {
    pub fn is_usable(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

// ── Capability traits ────────────────────────────────────────────────────────

/// One acquired model session.  Every session handed out by
/// [`GenerativeTextService::open_session`] must be released exactly once;
/// wrap it in a [`SessionGuard`] so that happens on every exit path.
#[async_trait]
pub trait TextSession: Send {
    async fn prompt(&mut self, prompt: &str) -> Result<String, LlmError>;

    /// Return the session to its service.  Must be idempotent.
    fn release(&mut self);
}

#[async_trait]
pub trait GenerativeTextService: Send + Sync {
    fn describe(&self) -> String;

    async fn availability(&self) -> Availability;

    async fn open_session(&self) -> Result<Box<dyn TextSession>, LlmError>;

    /// Sessions acquired and not yet released.
    fn open_sessions(&self) -> usize;
}

/// Build the configured backend.
pub fn build_service(
    provider: Provider,
    model: &str,
    ollama_base_url: &str,
) -> Arc<dyn GenerativeTextService> {
    match provider {
        Provider::Ollama => Arc::new(OllamaService::new(ollama_base_url, model)),
        Provider::OpenRouter => Arc::new(OpenRouterService::new(model)),
    }
}

// ── Session bookkeeping shared by the HTTP backends ──────────────────────────

#[derive(Debug)]
struct SessionTicket {
    open: Arc<AtomicUsize>,
    released: bool,
}

impl SessionTicket {
    fn acquire(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            open: Arc::clone(open),
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ── Ollama ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OllamaService {
    client: reqwest::Client,
    base_url: String,
    model: String,
    open: Arc<AtomicUsize>,
}

impl OllamaService {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn installed_models(&self) -> Result<Vec<String>, LlmError> {
        let endpoint = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                provider: Provider::Ollama,
                status: status.as_u16(),
                body: body.to_string(),
            });
        }

        Ok(body
            .get("models")
            .and_then(|models| models.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("name").and_then(|name| name.as_str()))
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl GenerativeTextService for OllamaService {
    fn describe(&self) -> String {
        format!("ollama model={} base_url={}", self.model, self.base_url)
    }

    async fn availability(&self) -> Availability {
        match self.installed_models().await {
            Ok(models) => {
                let tagged = format!("{}:latest", self.model);
                if models.iter().any(|name| *name == self.model || *name == tagged) {
                    Availability::Available
                } else {
                    Availability::Unavailable {
                        reason: format!(
                            "model '{}' is not installed (run: ollama pull {})",
                            self.model, self.model
                        ),
                    }
                }
            }
            Err(error) => Availability::Unavailable {
                reason: format!("Ollama unreachable at {}: {error}", self.base_url),
            },
        }
    }

    async fn open_session(&self) -> Result<Box<dyn TextSession>, LlmError> {
        Ok(Box::new(OllamaSession {
            client: self.client.clone(),
            endpoint: format!("{}/api/generate", self.base_url),
            model: self.model.clone(),
            ticket: SessionTicket::acquire(&self.open),
        }))
    }

    fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

struct OllamaSession {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    ticket: SessionTicket,
}

#[async_trait]
impl TextSession for OllamaSession {
    async fn prompt(&mut self, prompt: &str) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                provider: Provider::Ollama,
                status: status.as_u16(),
                body: body.to_string(),
            });
        }

        body.get("response")
            .and_then(|value| value.as_str())
            .map(ToString::to_string)
            .ok_or(LlmError::MissingText(Provider::Ollama))
    }

    fn release(&mut self) {
        self.ticket.release();
    }
}

// ── OpenRouter ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenRouterService {
    client: reqwest::Client,
    model: String,
    open: Arc<AtomicUsize>,
}

impl OpenRouterService {
    pub fn new(model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.to_string(),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }
}

fn openrouter_api_key() -> Option<String> {
    std::env::var("OPENROUTER_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
}

#[async_trait]
impl GenerativeTextService for OpenRouterService {
    fn describe(&self) -> String {
        format!("openrouter model={}", self.model)
    }

    async fn availability(&self) -> Availability {
        if openrouter_api_key().is_some() {
            Availability::Available
        } else {
            Availability::Unavailable {
                reason: "OPENROUTER_API_KEY is not set".to_string(),
            }
        }
    }

    async fn open_session(&self) -> Result<Box<dyn TextSession>, LlmError> {
        let api_key = openrouter_api_key()
            .ok_or_else(|| LlmError::Unavailable("OPENROUTER_API_KEY is not set".to_string()))?;
        Ok(Box::new(OpenRouterSession {
            client: self.client.clone(),
            api_key,
            model: self.model.clone(),
            ticket: SessionTicket::acquire(&self.open),
        }))
    }

    fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

struct OpenRouterSession {
    client: reqwest::Client,
    api_key: String,
    model: String,
    ticket: SessionTicket,
}

#[async_trait]
impl TextSession for OpenRouterSession {
    async fn prompt(&mut self, prompt: &str) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ]
        });

        let response = self
            .client
            .post("https://openrouter.ai/api/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://unilens.local")
            .header("X-Title", "Unilens")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                provider: Provider::OpenRouter,
                status: status.as_u16(),
                body: body.to_string(),
            });
        }

        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(ToString::to_string)
            .ok_or(LlmError::MissingText(Provider::OpenRouter))
    }

    fn release(&mut self) {
        if !self.ticket.released {
            debug!(model = %self.model, "releasing OpenRouter session");
        }
        self.ticket.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
