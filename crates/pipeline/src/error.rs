use thiserror::Error;
use unilens_search::SearchError;

use crate::result::StageError;

/// Failure taxonomy of a run.
///
/// Only [`AnalysisError::CapabilityUnavailable`] and
/// [`AnalysisError::UnexpectedFailure`] end a run; the fetch failures are
/// recorded against their stage and the run carries on.  Parser degradation
/// is not an error at all: malformed snippet text just yields fewer groups.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("{0}")]
    CapabilityUnavailable(String),
    #[error("{stage} failed: {message}")]
    RemoteFetchFailure { stage: String, message: String },
    #[error("{stage} returned malformed data: {message}")]
    MalformedResponse { stage: String, message: String },
    #[error("unexpected failure: {0}")]
    UnexpectedFailure(String),
}

impl AnalysisError {
    pub fn from_search(stage: impl Into<String>, err: &SearchError) -> Self {
        let stage = stage.into();
        if err.is_malformed() {
            AnalysisError::MalformedResponse {
                stage,
                message: err.to_string(),
            }
        } else {
            AnalysisError::RemoteFetchFailure {
                stage,
                message: err.to_string(),
            }
        }
    }

    /// The record kept in `AnalysisResult.errors`.  Malformed responses are
    /// reported as fetch failures of the same stage.
    pub fn to_stage_error(&self) -> StageError {
        match self {
            AnalysisError::RemoteFetchFailure { stage, message } => {
                StageError::new(stage.clone(), message.clone())
            }
            AnalysisError::MalformedResponse { stage, message } => {
                StageError::new(stage.clone(), format!("malformed response: {message}"))
            }
            AnalysisError::CapabilityUnavailable(message) => {
                StageError::new("availability", message.clone())
            }
            AnalysisError::UnexpectedFailure(message) => {
                StageError::new("pipeline", message.clone())
            }
        }
    }
}
