use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of things a run can look up about an institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Scholarships,
    Reviews,
    Location,
    AppTips,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Scholarships,
        Category::Reviews,
        Category::Location,
        Category::AppTips,
    ];

    /// Section label used by the delimited snippet protocol.
    pub fn label(self) -> &'static str {
        match self {
            Category::Scholarships => "SCHOLARSHIPS",
            Category::Reviews => "STUDENT REVIEWS",
            Category::Location => "LOCATION INFO",
            Category::AppTips => "APPLICATION TIPS",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|category| category.label() == label)
    }

    /// Human wording used in prompts, logs and display headings.
    pub fn noun(self) -> &'static str {
        match self {
            Category::Scholarships => "scholarships",
            Category::Reviews => "student reviews",
            Category::Location => "location",
            Category::AppTips => "application tips",
        }
    }

    pub fn links_key(self) -> &'static str {
        match self {
            Category::Scholarships => "scholarshipLinks",
            Category::Reviews => "reviewLinks",
            Category::Location => "locationLinks",
            Category::AppTips => "appTipsLinks",
        }
    }

    pub fn summary_key(self) -> &'static str {
        match self {
            Category::Scholarships => "scholarshipSummary",
            Category::Reviews => "reviewSummary",
            Category::Location => "locationSummary",
            Category::AppTips => "appTipsSummary",
        }
    }

    /// Web search query for this category about `entity`.
    pub fn search_query(self, entity: &str) -> String {
        match self {
            Category::Scholarships => format!("\"{entity}\" scholarships OR financial aid"),
            Category::Reviews => {
                format!("\"{entity}\" student reviews reddit OR student life forum OR quora")
            }
            Category::Location => {
                format!("\"{entity}\" city OR area information OR campus location")
            }
            Category::AppTips => format!(
                "\"{entity}\" application tips OR admission requirements OR how to apply undergraduate"
            ),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

/// Query used to find undergraduate program pages for a course near a place.
pub fn discovery_query(course: &str, location: &str) -> String {
    format!(
        "\"{course}\" bachelor OR undergraduate program OR degree site:.edu OR site:.ac \"{location}\" -filetype:pdf"
    )
}
