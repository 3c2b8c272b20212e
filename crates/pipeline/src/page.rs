//! Page text extraction and the institution name derived from a page URL.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::AnalysisError;

/// Maximum characters of page text handed to the pipeline.
pub const MAX_PAGE_CHARS: usize = 15_000;
/// Below this many characters a scrape is considered empty.
pub const MIN_PAGE_CHARS: usize = 100;

const NO_CONTENT: &str = "Could not find any relevant course content on this page.";
const NOT_A_WEB_PAGE: &str = "Could not get a valid web page to scrape.";

const NOISE_SELECTOR: &str = "nav, header, footer, aside, .sidebar, .menu, form, button, \
    script, style, noscript, svg, img, video, audio, iframe";
const MAIN_REGION_SELECTORS: &[&str] = &["main", "[role=\"main\"]", "body"];

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Suffix labels dropped from the end of a host when naming an institution.
const GENERIC_SUFFIXES: &[&str] = &[
    "com", "org", "net", "info", "biz", "edu", "gov", "ac", "co", "io",
];

// ── PageContext ──────────────────────────────────────────────────────────────

/// Text of the page under analysis and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub text: String,
    pub source_url: String,
}

impl PageContext {
    pub fn new(text: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_url: source_url.into(),
        }
    }

    /// [`entity_name`] of the URL host, if the URL has one.
    pub fn entity_name(&self) -> Option<String> {
        let url = Url::parse(&self.source_url).ok()?;
        let name = entity_name(url.host_str()?);
        (!name.is_empty()).then_some(name)
    }
}

/// Institution name from a hostname: `www.st-andrews.ac.uk` → `St Andrews`.
///
/// Strips a `www.`/`ww2.` prefix, drops one trailing two-letter country
/// label and then any generic or academic labels before it (always keeping
/// the first label), then
/// title-cases each whitespace/hyphen separated token.  Feeding the output
/// back in returns it unchanged.
pub fn entity_name(host: &str) -> String {
    let host = host.trim().trim_end_matches('.');
    let host = strip_prefix_ignore_case(host, "www.")
        .or_else(|| strip_prefix_ignore_case(host, "ww2."))
        .unwrap_or(host);

    let mut labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() > 1 && labels.last().is_some_and(|l| is_country_label(l)) {
        labels.pop();
    }
    while labels.len() > 1 && labels.last().is_some_and(|l| is_generic_label(l)) {
        labels.pop();
    }

    labels
        .join(" ")
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|token| !token.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn is_country_label(label: &str) -> bool {
    label.len() == 2 && label.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_generic_label(label: &str) -> bool {
    GENERIC_SUFFIXES.contains(&label.to_ascii_lowercase().as_str())
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PageContext, AnalysisError>;
}

/// Text supplied by the caller, e.g. from a file or stdin.
#[derive(Debug, Clone)]
pub struct StaticPageSource {
    text: String,
}

impl StaticPageSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl PageSource for StaticPageSource {
    async fn fetch(&self, url: &str) -> Result<PageContext, AnalysisError> {
        Ok(PageContext::new(truncate(&self.text, MAX_PAGE_CHARS), url))
    }
}

/// Downloads a page and scrapes its course text.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| fetch_failure(err.to_string()))?;
        Ok(Self { client })
    }
}

fn fetch_failure(message: impl Into<String>) -> AnalysisError {
    AnalysisError::RemoteFetchFailure {
        stage: "page extraction".to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<PageContext, AnalysisError> {
        let parsed = Url::parse(url).map_err(|_| fetch_failure(NOT_A_WEB_PAGE))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fetch_failure(NOT_A_WEB_PAGE));
        }

        let response = self
            .client
            .get(parsed.as_str())
            .send()
            .await
            .map_err(|err| fetch_failure(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_failure(format!("page returned HTTP {status}")));
        }
        let html = response
            .text()
            .await
            .map_err(|err| fetch_failure(err.to_string()))?;

        let text = extract_course_text(&html);
        info!(chars = text.chars().count(), "page scraped");
        if text.chars().count() <= MIN_PAGE_CHARS {
            warn!("not enough content found on page");
            return Err(fetch_failure(NO_CONTENT));
        }
        Ok(PageContext::new(text, url))
    }
}

/// Course-oriented text of an HTML document.
///
/// Pairs each `h3`/`h4` with the `p`/`div` that follows it; when that finds
/// too little, falls back to the visible text of the main region.  Noise
/// elements (navigation, forms, media, scripts) never contribute.
pub fn extract_course_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let (Ok(noise), Ok(headings)) = (Selector::parse(NOISE_SELECTOR), Selector::parse("h3, h4"))
    else {
        return String::new();
    };

    let Some(region) = MAIN_REGION_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| doc.select(&sel).next())
    else {
        return String::new();
    };

    let mut text = String::new();
    for heading in region.select(&headings) {
        if inside_noise(heading, region, &noise) {
            continue;
        }
        let Some(next) = heading
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| !noise.matches(el))
        else {
            continue;
        };
        if !matches!(next.value().name(), "p" | "div") {
            continue;
        }

        let title = collapse_whitespace(&visible_text(heading, &noise));
        let description = collapse_whitespace(&visible_text(next, &noise));
        if title.chars().count() > 2 && description.chars().count() > 25 {
            text.push_str(&format!("Course: {title}\nDescription: {description}\n\n"));
        }
    }

    if text.chars().count() < MIN_PAGE_CHARS {
        debug!("heading strategy too thin, using region text");
        text = collapse_blank_runs(&visible_text(region, &noise));
    }

    truncate(&text, MAX_PAGE_CHARS).to_string()
}

fn inside_noise(element: ElementRef<'_>, region: ElementRef<'_>, noise: &Selector) -> bool {
    element
        .ancestors()
        .take_while(|node| node.id() != region.id())
        .filter_map(ElementRef::wrap)
        .any(|ancestor| noise.matches(&ancestor))
}

fn visible_text(element: ElementRef<'_>, noise: &Selector) -> String {
    let mut out = String::new();
    push_visible_text(element, noise, &mut out);
    out
}

fn push_visible_text(element: ElementRef<'_>, noise: &Selector, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                if noise.matches(&child) {
                    continue;
                }
                push_visible_text(child, noise, out);
                if is_block(el.name()) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div" | "section" | "article" | "li" | "ul" | "ol" | "br" | "tr" | "table"
            | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
    )
}

/// Collapse runs of whitespace into single spaces and trim.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace every run of two or more whitespace characters with a newline.
fn collapse_blank_runs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut run = String::new();
    for c in s.trim().chars() {
        if c.is_whitespace() {
            run.push(c);
            continue;
        }
        match run.chars().count() {
            0 => {}
            1 => out.push_str(&run),
            _ => out.push('\n'),
        }
        run.clear();
        out.push(c);
    }
    out
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
