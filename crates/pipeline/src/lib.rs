//! The analysis pipeline: page text in, one persisted result record out.
//!
//! [`AnalysisOrchestrator`] sequences the page summary, the per-category
//! external content and the application tips, isolating every non-fatal
//! failure into the result.  [`DiscoveryService`] runs the program search.

pub mod discovery;
pub mod error;
pub mod generate;
pub mod orchestrator;
pub mod page;
pub mod preferences;
pub mod result;
pub mod run_state;

pub use discovery::{DiscoveryOutcome, DiscoveryService};
pub use error::AnalysisError;
pub use generate::{Generation, TextGenerator};
pub use orchestrator::{AnalysisOptions, AnalysisOrchestrator};
pub use page::{HttpPageSource, PageContext, PageSource, StaticPageSource, entity_name};
pub use preferences::UserPreferences;
pub use result::{AnalysisResult, RunOutcome, StageError, TopLevelFailure};
pub use run_state::{AlreadyRunning, RunKind, RunState, RunTicket};
