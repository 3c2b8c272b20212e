use serde::{Deserialize, Serialize};
use url::Url;

/// A single search hit.  Serialised in the `{title, link, displayLink}` wire
/// shape the display layer reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCandidate {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "link")]
    pub url: String,
    #[serde(rename = "displayLink", default)]
    pub display_site: String,
}

impl SearchCandidate {
    /// Build a candidate, falling back to [`domain_of`] when the provider did
    /// not supply a display site.
    pub fn new(title: impl Into<String>, url: impl Into<String>, display_site: Option<&str>) -> Self {
        let url = url.into();
        let display_site = display_site
            .map(str::trim)
            .filter(|site| !site.is_empty())
            .map(ToString::to_string)
            .or_else(|| domain_of(&url))
            .unwrap_or_default();
        Self {
            title: title.into(),
            url,
            display_site,
        }
    }
}

/// Registrable domain of `url`: the last two host labels, or the last three
/// when the second-to-last is `ac` / `edu` (`ox.ac.uk`, `unimelb.edu.au`).
///
/// Returns `None` for unparseable URLs and URLs without a host.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').filter(|label| !label.is_empty()).collect();
    if labels.len() < 2 {
        return Some(host);
    }

    let second_last = labels[labels.len() - 2];
    let keep = if (second_last == "ac" || second_last == "edu") && labels.len() >= 3 {
        3
    } else {
        2
    };
    Some(labels[labels.len() - keep..].join("."))
}
