//! Explicit "is a run in flight" value owned by the triggering surface.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Analysis,
    Discovery,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Analysis => f.write_str("analysis"),
            RunKind::Discovery => f.write_str("discovery"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running {
        kind: RunKind,
        run_id: Uuid,
        started_at: DateTime<Utc>,
    },
}

/// Proof of having started a run; hand it back to [`RunState::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub kind: RunKind,
    pub run_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} run already in progress (started {started_at})")]
pub struct AlreadyRunning {
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }

    /// Start a run unless one is already in flight.
    pub fn begin(&self, kind: RunKind) -> Result<(RunState, RunTicket), AlreadyRunning> {
        self.begin_at(kind, Utc::now())
    }

    pub fn begin_at(
        &self,
        kind: RunKind,
        now: DateTime<Utc>,
    ) -> Result<(RunState, RunTicket), AlreadyRunning> {
        match self {
            RunState::Running {
                kind, started_at, ..
            } => Err(AlreadyRunning {
                kind: *kind,
                started_at: *started_at,
            }),
            RunState::Idle => {
                let run_id = Uuid::new_v4();
                Ok((
                    RunState::Running {
                        kind,
                        run_id,
                        started_at: now,
                    },
                    RunTicket { kind, run_id },
                ))
            }
        }
    }

    /// End the run `ticket` belongs to.  A ticket from another run leaves the
    /// state untouched.
    pub fn finish(self, ticket: &RunTicket) -> RunState {
        match self {
            RunState::Running { run_id, .. } if run_id == ticket.run_id => RunState::Idle,
            other => other,
        }
    }

    /// A run that started before `cutoff` is treated as abandoned.
    pub fn expire_before(self, cutoff: DateTime<Utc>) -> RunState {
        match self {
            RunState::Running { started_at, .. } if started_at < cutoff => RunState::Idle,
            other => other,
        }
    }
}
