//! Cross-invocation run lock: the current [`RunState`] as a JSON file next to
//! the result store.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use tracing::{debug, warn};
use unilens_pipeline::{RunKind, RunState, RunTicket};

/// A run older than this is assumed to have died without finishing.
const STALE_AFTER_MINUTES: i64 = 15;

pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<RunState> {
        Ok(self.read_state()?.unwrap_or_default())
    }

    /// `None` when no lock file exists; unreadable content counts as idle.
    fn read_state(&self) -> Result<Option<RunState>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "unreadable run state, treating as idle");
                Ok(Some(RunState::Idle))
            }
        }
    }

    /// Take the lock for a `kind` run.  The state file is written under a
    /// private name and hard-linked into place, so of two processes starting
    /// together exactly one wins and nobody reads a half-written file.
    /// Clearing a stale or unreadable file is not race-free.
    pub fn begin(&self, kind: RunKind) -> Result<RunTicket> {
        let cutoff = Utc::now() - Duration::minutes(STALE_AFTER_MINUTES);
        let found = self.read_state()?;
        let live = found.clone().unwrap_or_default().expire_before(cutoff);
        if let Some(current) = found.filter(|_| !live.is_running()) {
            if current.is_running() {
                warn!(path = %self.path.display(), "taking over a stale run");
            }
            remove_if_present(&self.path)?;
        }

        let (next, ticket) = live.begin(kind)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staged = self.path.with_extension(format!("{}.tmp", ticket.run_id));
        fs::write(&staged, serde_json::to_string_pretty(&next)?)
            .with_context(|| format!("writing {}", staged.display()))?;
        let linked = fs::hard_link(&staged, &self.path);
        remove_if_present(&staged)?;
        match linked {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                self.load()?.begin(kind)?;
                bail!("another run started at the same time");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("writing {}", self.path.display()));
            }
        }

        debug!(%kind, run_id = %ticket.run_id, "run started");
        Ok(ticket)
    }

    /// Release the lock if `ticket` still owns it.
    pub fn finish(&self, ticket: &RunTicket) -> Result<()> {
        if self.load()?.finish(ticket).is_running() {
            warn!(run_id = %ticket.run_id, "run lock owned by another run, leaving it");
            return Ok(());
        }
        remove_if_present(&self.path)
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
    }
}
