//! Key/value sink for run results, read back by the display layer.
//!
//! Each scope holds the record of the latest run of one kind.  A write
//! replaces the whole scope at once so readers never observe a mix of two
//! runs.

mod memory;
mod redb_store;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryResultStore;
pub use redb_store::RedbResultStore;

/// Flat JSON record keyed by display field name.
pub type Entries = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreScope {
    Analysis,
    Discovery,
}

impl StoreScope {
    pub const ALL: [StoreScope; 2] = [StoreScope::Analysis, StoreScope::Discovery];

    pub fn slug(self) -> &'static str {
        match self {
            StoreScope::Analysis => "analysis",
            StoreScope::Discovery => "discovery",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.slug().eq_ignore_ascii_case(slug.trim()))
    }
}

impl fmt::Display for StoreScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("value encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub trait ResultStore: Send + Sync {
    /// Replace every entry of `scope` with `entries` in one atomic write.
    fn replace(&self, scope: StoreScope, entries: &Entries) -> Result<(), StoreError>;

    fn get(&self, scope: StoreScope, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// All entries of `scope`; empty when nothing was written yet.
    fn entries(&self, scope: StoreScope) -> Result<Entries, StoreError>;
}
