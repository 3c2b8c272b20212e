use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::{Entries, ResultStore, StoreError, StoreScope};

// ── redb table definitions ────────────────────────────────────────────────────

/// `key (str) → JSON-encoded value (str)` for the latest analysis run.
const ANALYSIS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("analysis");
/// Same shape, for the latest discovery run.
const DISCOVERY_TABLE: TableDefinition<&str, &str> = TableDefinition::new("discovery");

fn table_for(scope: StoreScope) -> TableDefinition<'static, &'static str, &'static str> {
    match scope {
        StoreScope::Analysis => ANALYSIS_TABLE,
        StoreScope::Discovery => DISCOVERY_TABLE,
    }
}

// ── RedbResultStore ───────────────────────────────────────────────────────────

pub struct RedbResultStore {
    db: Database,
    path: PathBuf,
}

impl RedbResultStore {
    /// Open or create the results database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)?;

        // Ensure tables exist so reads never hit a missing table.
        {
            let tx = db.begin_write()?;
            tx.open_table(ANALYSIS_TABLE)?;
            tx.open_table(DISCOVERY_TABLE)?;
            tx.commit()?;
        }

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultStore for RedbResultStore {
    fn replace(&self, scope: StoreScope, entries: &Entries) -> Result<(), StoreError> {
        let encoded: Vec<(&str, String)> = entries
            .iter()
            .map(|(key, value)| Ok((key.as_str(), serde_json::to_string(value)?)))
            .collect::<Result<_, serde_json::Error>>()?;

        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(table_for(scope))?;
            let mut stale = Vec::new();
            for row in tbl.iter()? {
                let (k, _) = row?;
                stale.push(k.value().to_string());
            }
            for key in &stale {
                tbl.remove(key.as_str())?;
            }
            for (key, value) in &encoded {
                tbl.insert(*key, value.as_str())?;
            }
        }
        tx.commit()?;

        debug!(%scope, keys = entries.len(), path = %self.path.display(), "scope replaced");
        Ok(())
    }

    fn get(&self, scope: StoreScope, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(table_for(scope))?;
        match tbl.get(key)? {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
        }
    }

    fn entries(&self, scope: StoreScope) -> Result<Entries, StoreError> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(table_for(scope))?;
        let mut out = Entries::new();
        for row in tbl.iter()? {
            let (k, v) = row?;
            out.insert(k.value().to_string(), serde_json::from_str(v.value())?);
        }
        Ok(out)
    }
}
