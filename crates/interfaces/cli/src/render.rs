//! Terminal display of stored run records.

use serde_json::Value;
use unilens_search::Category;
use unilens_store::Entries;

const HEADING_WIDTH: usize = 54;

fn heading(title: &str) -> String {
    let lead = format!("── {title} ");
    let pad = HEADING_WIDTH.saturating_sub(lead.chars().count());
    format!("{lead}{}", "─".repeat(pad))
}

/// `scholarshipLinks` → `scholarship links`.
fn key_words(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push(' ');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn text_section(key: &str, value: Option<&Value>) -> String {
    match value.and_then(Value::as_str).map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => format!("No {} information was generated or requested.", key_words(key)),
    }
}

fn link_section(key: &str, value: Option<&Value>) -> String {
    let links = value.and_then(Value::as_array).filter(|links| !links.is_empty());
    let Some(links) = links else {
        let noun = key_words(key.trim_end_matches("Links"));
        return format!("No {noun} links were found or requested.");
    };
    links
        .iter()
        .filter_map(|item| {
            let link = item.get("link").and_then(Value::as_str)?;
            let title = item
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(link);
            if title == link {
                Some(format!("  - {link}"))
            } else {
                Some(format!("  - {title} ({link})"))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_analysis(entries: &Entries) -> String {
    if entries.is_empty() {
        return "No analysis has been run yet. Try `unilens analyze <url>`.".to_string();
    }
    if let Some(error) = entries.get("analysisError") {
        let message = error.as_str().unwrap_or("An unknown error occurred during analysis.");
        return format!("Analysis failed: {message}");
    }

    let mut sections = vec![
        heading("Page Summary"),
        text_section("pageSummary", entries.get("pageSummary")),
    ];
    for category in Category::ALL {
        let title = category.noun();
        sections.push(String::new());
        sections.push(heading(&format!("{} links", capitalize(title))));
        sections.push(link_section(category.links_key(), entries.get(category.links_key())));
        sections.push(heading(&format!("{} summary", capitalize(title))));
        sections.push(text_section(
            category.summary_key(),
            entries.get(category.summary_key()),
        ));
    }
    sections.push(String::new());
    sections.push(heading("Application Tips"));
    sections.push(text_section("generatedAppTips", entries.get("generatedAppTips")));

    let problems: Vec<String> = entries
        .get("analysisErrors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    format!(
                        "  - {}: {}",
                        e.get("stage").and_then(Value::as_str).unwrap_or("unknown stage"),
                        e.get("message").and_then(Value::as_str).unwrap_or_default()
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    if !problems.is_empty() {
        sections.push(String::new());
        sections.push(heading("Recorded problems"));
        sections.extend(problems);
    }
    if let Some(at) = entries.get("generatedAt").and_then(Value::as_str) {
        sections.push(String::new());
        sections.push(format!("generated at {at}"));
    }

    sections.join("\n")
}

pub fn render_discovery(entries: &Entries) -> String {
    if let Some(error) = entries.get("discoveryError") {
        let message = error
            .as_str()
            .unwrap_or("An unknown error occurred finding universities.");
        return format!("Search Failed: {message}");
    }

    let Some(found) = entries.get("foundUniversities").and_then(Value::as_array) else {
        return "Could not retrieve university list. Please try the search again.".to_string();
    };
    if found.is_empty() {
        return "No universities found matching your criteria. Try broadening your course or \
                location search."
            .to_string();
    }

    let mut lines = vec![heading("Universities")];
    for uni in found {
        let Some(link) = uni.get("link").and_then(Value::as_str) else {
            continue;
        };
        let display = uni
            .get("displayLink")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty());
        let label = uni
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .or(display)
            .unwrap_or(link);
        match display.filter(|d| *d != label) {
            Some(site) => lines.push(format!("  - {label} ({site})")),
            None => lines.push(format!("  - {label}")),
        }
        lines.push(format!("    {link}"));
    }
    lines.join("\n")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entries(value: Value) -> Entries {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn key_words_splits_camel_case() {
        assert_eq!(key_words("pageSummary"), "page summary");
        assert_eq!(key_words("appTips"), "app tips");
        assert_eq!(key_words("generatedAppTips"), "generated app tips");
    }

    #[test]
    fn fatal_analysis_shows_only_the_error() {
        let out = render_analysis(&entries(json!({"analysisError": "AI model is currently unavailable"})));
        assert_eq!(out, "Analysis failed: AI model is currently unavailable");
    }

    #[test]
    fn analysis_sections_fall_back_per_key() {
        let out = render_analysis(&entries(json!({
            "pageSummary": "A rigorous course.",
            "scholarshipLinks": [
                {"title": "", "link": "https://x.ac.uk/f", "displayLink": "x.ac.uk"},
                {"title": "Funding", "link": "https://x.ac.uk/g", "displayLink": "x.ac.uk"}
            ],
            "reviewLinks": [],
            "reviewSummary": "",
            "generatedAppTips": "[Application tip generation disabled in preferences.]",
            "analysisErrors": [{"stage": "location search", "message": "timed out"}]
        })));
        assert!(out.contains("A rigorous course."));
        assert!(out.contains("  - https://x.ac.uk/f\n"));
        assert!(out.contains("  - Funding (https://x.ac.uk/g)"));
        assert!(out.contains("No review links were found or requested."));
        assert!(out.contains("No app tips links were found or requested."));
        assert!(out.contains("No review summary information was generated or requested."));
        assert!(out.contains("[Application tip generation disabled in preferences.]"));
        assert!(out.contains("  - location search: timed out"));
    }

    #[test]
    fn empty_store_hints_at_analyze() {
        assert!(render_analysis(&Entries::new()).contains("unilens analyze"));
    }

    #[test]
    fn discovery_states() {
        assert_eq!(
            render_discovery(&entries(json!({"discoveryError": "Course or location missing in request."}))),
            "Search Failed: Course or location missing in request."
        );
        assert!(render_discovery(&entries(json!({"foundUniversities": []}))).starts_with("No universities found"));
        assert!(render_discovery(&Entries::new()).starts_with("Could not retrieve university list"));

        let out = render_discovery(&entries(json!({"foundUniversities": [
            {"title": "Marine Biology BSc", "link": "https://www.abdn.ac.uk/study/marine", "displayLink": "www.abdn.ac.uk"},
            {"title": "", "link": "https://www.hull.ac.uk/study/marine", "displayLink": "www.hull.ac.uk"}
        ]})));
        assert!(out.contains("  - Marine Biology BSc (www.abdn.ac.uk)\n    https://www.abdn.ac.uk/study/marine"));
        assert!(out.contains("  - www.hull.ac.uk\n    https://www.hull.ac.uk/study/marine"));
    }
}
