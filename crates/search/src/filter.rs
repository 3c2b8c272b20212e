//! Narrow a broad search down to plausible program pages.
//!
//! Precision over recall: aggregator listicles, ranking pages and bare
//! homepages are dropped even when that loses the odd valid page.

use std::collections::HashSet;

use tracing::debug;
use url::Url;

use crate::candidate::{SearchCandidate, domain_of};

const LISTICLE_MARKERS: &[&str] = &["top universities", "best schools", "ranking", "list of"];

const HOMEPAGE_PATHS: &[&str] = &["/", "/index.html", "/home"];

const PROGRAM_PATH_KEYWORDS: &[&str] = &[
    "program",
    "course",
    "degree",
    "major",
    "academic",
    "study",
    "faculty",
    "school",
    "department",
    "admission",
];

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidUrl,
    DuplicateDomain,
    Listicle,
    Homepage,
    NoProgramSignal,
}

#[derive(Debug, Clone)]
pub struct CandidateFilter {
    topic: String,
    max_results: usize,
}

impl CandidateFilter {
    pub fn new(topic: impl Into<String>, max_results: usize) -> Self {
        Self {
            topic: topic.into().trim().to_lowercase(),
            max_results,
        }
    }

    /// Screen `candidates` in order, stopping once `max_results` are kept.
    pub fn apply(&self, candidates: &[SearchCandidate]) -> Vec<SearchCandidate> {
        let mut accepted = Vec::new();
        let mut seen_domains: HashSet<String> = HashSet::new();

        for candidate in candidates {
            if accepted.len() >= self.max_results {
                break;
            }
            match self.screen(candidate, &seen_domains) {
                Ok(domain) => {
                    seen_domains.insert(domain);
                    accepted.push(candidate.clone());
                }
                Err(reason) => {
                    debug!(?reason, title = %candidate.title, url = %candidate.url, "candidate filtered out");
                }
            }
        }

        accepted
    }

    /// Accept (returning the candidate's domain) or reject one candidate.
    pub fn screen(
        &self,
        candidate: &SearchCandidate,
        seen_domains: &HashSet<String>,
    ) -> Result<String, Rejection> {
        let domain = domain_of(&candidate.url).ok_or(Rejection::InvalidUrl)?;
        if seen_domains.contains(&domain) {
            return Err(Rejection::DuplicateDomain);
        }

        let title = candidate.title.to_lowercase();
        if LISTICLE_MARKERS.iter().any(|marker| title.contains(marker)) {
            return Err(Rejection::Listicle);
        }

        let path = Url::parse(&candidate.url)
            .map_err(|_| Rejection::InvalidUrl)?
            .path()
            .to_lowercase();
        if path.len() < 2 || HOMEPAGE_PATHS.contains(&path.as_str()) {
            return Err(Rejection::Homepage);
        }

        let has_path_keyword = PROGRAM_PATH_KEYWORDS
            .iter()
            .any(|keyword| path.contains(&format!("/{keyword}")));
        let title_mentions_topic = !self.topic.is_empty() && title.contains(&self.topic);

        if has_path_keyword || title_mentions_topic {
            Ok(domain)
        } else {
            Err(Rejection::NoProgramSignal)
        }
    }
}
