//! External content for the analysis pipeline: search categories and
//! candidates, the search provider seam, candidate curation, and the
//! delimited snippet protocol.

pub mod candidate;
pub mod category;
pub mod content;
pub mod filter;
pub mod provider;
pub mod snippet;

pub use candidate::{SearchCandidate, domain_of};
pub use category::{Category, discovery_query};
pub use content::{ExternalContentProvider, HttpSnippetSource, SnippetRequest, SnippetSource};
pub use filter::{CandidateFilter, Rejection};
pub use provider::{GoogleSearch, SearchError, SearchProvider};
pub use snippet::{LabeledSnippetGroup, is_usable_snippet, parse_snippets};
