mod render;
mod run_lock;
mod wiring;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use unilens_config::{AppConfig, ContentProtocol, SessionMode};
use unilens_llm::Availability;
use unilens_pipeline::{
    AnalysisOptions, AnalysisOrchestrator, DiscoveryService, HttpPageSource, PageSource, RunKind,
    StaticPageSource, UserPreferences,
};
use unilens_search::Category;
use unilens_store::StoreScope;

use crate::run_lock::RunLock;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(
    name = "unilens",
    version,
    about = "Summarise university course pages and find programs worth a look"
)]
struct Cli {
    /// Configuration file; missing means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Analyse a course page and print the stored result.
    Analyze {
        #[arg(value_name = "URL")]
        url: String,
        /// Use already-extracted page text instead of fetching the URL.
        #[arg(long, value_name = "PATH")]
        text_file: Option<PathBuf>,
        #[arg(long, value_enum)]
        protocol: Option<CliProtocol>,
        #[arg(long, value_enum)]
        session_mode: Option<CliSessionMode>,
        #[command(flatten)]
        categories: CategoryFlags,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=10))]
        sociable: Option<u8>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=10))]
        nature: Option<u8>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=10))]
        study: Option<u8>,
    },
    /// Search for program pages matching a course near a location.
    Discover {
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },
    /// Print the last stored analysis or discovery record.
    Show {
        #[arg(value_enum, default_value = "analysis")]
        scope: CliScope,
    },
    Doctor,
}

#[derive(Debug, Args)]
struct CategoryFlags {
    #[arg(long, overrides_with = "no_scholarships")]
    scholarships: bool,
    #[arg(long)]
    no_scholarships: bool,
    #[arg(long, overrides_with = "no_reviews")]
    reviews: bool,
    #[arg(long)]
    no_reviews: bool,
    #[arg(long, overrides_with = "no_location")]
    location: bool,
    #[arg(long)]
    no_location: bool,
    #[arg(long, overrides_with = "no_app_tips")]
    app_tips: bool,
    #[arg(long)]
    no_app_tips: bool,
}

impl CategoryFlags {
    fn overrides(&self) -> [(Category, Option<bool>); 4] {
        [
            (Category::Scholarships, toggle(self.scholarships, self.no_scholarships)),
            (Category::Reviews, toggle(self.reviews, self.no_reviews)),
            (Category::Location, toggle(self.location, self.no_location)),
            (Category::AppTips, toggle(self.app_tips, self.no_app_tips)),
        ]
    }
}

fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliProtocol {
    LinkList,
    DelimitedText,
}

impl From<CliProtocol> for ContentProtocol {
    fn from(value: CliProtocol) -> Self {
        match value {
            CliProtocol::LinkList => ContentProtocol::LinkList,
            CliProtocol::DelimitedText => ContentProtocol::DelimitedText,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSessionMode {
    PerPrompt,
    PerCategory,
}

impl From<CliSessionMode> for SessionMode {
    fn from(value: CliSessionMode) -> Self {
        match value {
            CliSessionMode::PerPrompt => SessionMode::PerPrompt,
            CliSessionMode::PerCategory => SessionMode::PerCategory,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliScope {
    Analysis,
    Discovery,
}

impl From<CliScope> for StoreScope {
    fn from(value: CliScope) -> Self {
        match value {
            CliScope::Analysis => StoreScope::Analysis,
            CliScope::Discovery => StoreScope::Discovery,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Analyze {
            url,
            text_file,
            protocol,
            session_mode,
            categories,
            sociable,
            nature,
            study,
        } => {
            if let Some(mode) = session_mode {
                config.llm.session_mode = mode.into();
            }
            let protocol = protocol.map(Into::into).unwrap_or(config.analysis.protocol);

            let mut prefs = UserPreferences::from(&config.preferences);
            for (category, enabled) in categories.overrides() {
                if let Some(enabled) = enabled {
                    prefs.set(category, enabled);
                }
            }
            prefs.sociable = sociable.unwrap_or(prefs.sociable);
            prefs.nature = nature.unwrap_or(prefs.nature);
            prefs.study = study.unwrap_or(prefs.study);

            let source: Box<dyn PageSource> = match text_file {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    Box::new(StaticPageSource::new(text))
                }
                None => Box::new(HttpPageSource::new(Duration::from_secs(
                    config.analysis.remote_timeout_secs.max(1),
                ))?),
            };

            let store = wiring::open_store(&config)?;
            let orchestrator = AnalysisOrchestrator::new(
                wiring::text_service(&config),
                wiring::content_provider(&config, protocol),
                store.clone(),
                AnalysisOptions::from_config(&config),
            );

            let lock = RunLock::new(wiring::run_lock_path(&config));
            let ticket = lock.begin(RunKind::Analysis)?;
            info!(%url, ?protocol, "analysis started");
            let outcome = orchestrator.analyze(&prefs, source.as_ref(), &url).await;
            lock.finish(&ticket)?;
            outcome?;

            println!("{}", render::render_analysis(&store.entries(StoreScope::Analysis)?));
        }
        Commands::Discover { course, location } => {
            let course = course.unwrap_or_else(|| config.preferences.course.clone());
            let location = location.unwrap_or_else(|| config.preferences.location_query.clone());

            let store = wiring::open_store(&config)?;
            let service =
                DiscoveryService::from_config(&config, wiring::search_provider(&config), store.clone());

            let lock = RunLock::new(wiring::run_lock_path(&config));
            let ticket = lock.begin(RunKind::Discovery)?;
            let outcome = service.run(&course, &location).await;
            lock.finish(&ticket)?;
            outcome?;

            println!("{}", render::render_discovery(&store.entries(StoreScope::Discovery)?));
        }
        Commands::Show { scope } => {
            let store = wiring::open_store(&config)?;
            let scope = StoreScope::from(scope);
            let entries = store.entries(scope)?;
            match scope {
                StoreScope::Analysis => println!("{}", render::render_analysis(&entries)),
                StoreScope::Discovery => println!("{}", render::render_discovery(&entries)),
            }
        }
        Commands::Doctor => {
            let service = wiring::text_service(&config);
            let availability = service.availability().await;
            let lock = RunLock::new(wiring::run_lock_path(&config));

            println!("unilens doctor");
            println!("- config path: {}", cli.config.display());
            println!("- provider: {}", config.llm.provider);
            println!("- model: {}", config.active_model());
            match &availability {
                Availability::Available => println!("- model availability: available"),
                Availability::Unavailable { reason } => {
                    println!("- model availability: unavailable ({reason})")
                }
            }
            println!(
                "- search configured: {}",
                if config.search.is_configured() { "yes" } else { "no" }
            );
            println!("- content protocol: {:?}", config.analysis.protocol);
            if config.analysis.protocol == ContentProtocol::DelimitedText {
                if config.analysis.snippet_endpoint.is_empty() {
                    println!("- snippet endpoint: (not set)");
                } else {
                    println!("- snippet endpoint: {}", config.analysis.snippet_endpoint);
                }
            }
            println!("- store path: {}", config.store.path);
            println!("- run lock: {}", lock.path().display());
            if lock.load()?.is_running() {
                println!("- run state: running");
            } else {
                println!("- run state: idle");
            }

            if !availability.is_usable() {
                bail!("generative text service is not usable");
            }
        }
    }

    Ok(())
}
