//! Parser for the delimited snippet protocol.
//!
//! ```text
//! preamble (ignored)
//! --- SCHOLARSHIPS ---
//! first snippet
//! ---
//! second snippet
//! --- STUDENT REVIEWS ---
//! ...
//! ```
//!
//! Parsing never fails: malformed input yields fewer (or no) groups.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::category::Category;

/// Snippets shorter than this many characters are not worth a model call.
pub const MIN_SNIPPET_CHARS: usize = 100;

const FETCH_FAILURE_MARKER: &str = "Could not retrieve content";
const BINARY_DOCUMENT_MARKER: &str = "%PDF-";
const SNIPPET_DELIMITER: &str = "---";

static SECTION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"---[ \t]*([A-Z](?:[A-Z ]*[A-Z])?)[ \t]*---").expect("section marker regex is valid")
});

/// Snippet text grouped by section label, in source order within a section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabeledSnippetGroup {
    groups: BTreeMap<Category, Vec<String>>,
}

impl LabeledSnippetGroup {
    pub fn get(&self, category: Category) -> &[String] {
        self.groups.get(&category).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Snippets of `category` that pass [`is_usable_snippet`].
    pub fn usable(&self, category: Category) -> Vec<&str> {
        self.get(category)
            .iter()
            .map(String::as_str)
            .filter(|snippet| is_usable_snippet(snippet))
            .collect()
    }
}

pub fn parse_snippets(raw: &str) -> LabeledSnippetGroup {
    let mut groups: BTreeMap<Category, Vec<String>> = BTreeMap::new();
    let markers: Vec<_> = SECTION_MARKER.captures_iter(raw).collect();

    for (index, captures) in markers.iter().enumerate() {
        let (Some(whole), Some(label)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let block_end = markers
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map_or(raw.len(), |next| next.start());
        let block = &raw[whole.end()..block_end];

        // Unknown labels still end the previous block; their text is dropped.
        let Some(category) = Category::from_label(label.as_str()) else {
            continue;
        };

        let snippets: Vec<String> = block
            .split(SNIPPET_DELIMITER)
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .map(ToString::to_string)
            .collect();
        if !snippets.is_empty() {
            groups.entry(category).or_default().extend(snippets);
        }
    }

    LabeledSnippetGroup { groups }
}

/// Whether a raw snippet is real text worth summarising.
pub fn is_usable_snippet(snippet: &str) -> bool {
    snippet.chars().count() >= MIN_SNIPPET_CHARS
        && !snippet.contains(FETCH_FAILURE_MARKER)
        && !snippet.starts_with(BINARY_DOCUMENT_MARKER)
}
