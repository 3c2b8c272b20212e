use unilens_config::PreferencesConfig;
use unilens_search::Category;

/// Upper bound of every self-rated trait.
pub const MAX_TRAIT: u8 = 10;

/// Snapshot of what the user asked for, taken once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPreferences {
    pub scholarships: bool,
    pub reviews: bool,
    pub location: bool,
    pub app_tips: bool,
    pub sociable: u8,
    pub nature: u8,
    pub study: u8,
    pub course: Option<String>,
    pub location_query: Option<String>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self::from(&PreferencesConfig::default())
    }
}

impl From<&PreferencesConfig> for UserPreferences {
    fn from(config: &PreferencesConfig) -> Self {
        Self {
            scholarships: config.scholarships,
            reviews: config.reviews,
            location: config.location,
            app_tips: config.app_tips,
            sociable: config.sociable.min(MAX_TRAIT),
            nature: config.nature.min(MAX_TRAIT),
            study: config.study.min(MAX_TRAIT),
            course: non_empty(&config.course),
            location_query: non_empty(&config.location_query),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl UserPreferences {
    pub fn wants(&self, category: Category) -> bool {
        match category {
            Category::Scholarships => self.scholarships,
            Category::Reviews => self.reviews,
            Category::Location => self.location,
            Category::AppTips => self.app_tips,
        }
    }

    pub fn set(&mut self, category: Category, enabled: bool) {
        match category {
            Category::Scholarships => self.scholarships = enabled,
            Category::Reviews => self.reviews = enabled,
            Category::Location => self.location = enabled,
            Category::AppTips => self.app_tips = enabled,
        }
    }

    /// Whether any external content is needed at all.
    pub fn any_category(&self) -> bool {
        Category::ALL.into_iter().any(|category| self.wants(category))
    }

    pub fn enabled(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|category| self.wants(*category))
            .collect()
    }

    /// "Sociable: 5/10, Nature Lover: 5/10, and Study Focused: 5/10"
    pub fn trait_line(&self) -> String {
        format!(
            "Sociable: {}/{MAX_TRAIT}, Nature Lover: {}/{MAX_TRAIT}, and Study Focused: {}/{MAX_TRAIT}",
            self.sociable, self.nature, self.study
        )
    }
}
