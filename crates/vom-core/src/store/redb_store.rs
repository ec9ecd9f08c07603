//! # redb-backed Vat Store
//!
//! A disk-backed `VatStore` using the redb embedded database.
//!
//! Every `set`/`delete` runs in its own write transaction, which gives the
//! per-call durability the manager relies on. redb provides crash safety
//! (copy-on-write B-trees), so a record is either fully written or absent.

use super::VatStore;
use crate::{VomError, VomResult};
use redb::{Database, ReadableDatabase, ReadableTableMetadata, TableDefinition};
use std::path::Path;

/// Table for vatstore records: key string -> value string
const VATSTORE: TableDefinition<&str, &str> = TableDefinition::new("vatstore");

fn io_err(e: impl std::fmt::Display) -> VomError {
    VomError::IoError(e.to_string())
}

/// A disk-backed vat store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store database at the given path.
    pub fn open(path: impl AsRef<Path>) -> VomResult<Self> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize the table if it doesn't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(VATSTORE).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db })
    }

    /// Number of records in the store.
    pub fn len(&self) -> VomResult<u64> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(VATSTORE).map_err(io_err)?;
        table.len().map_err(io_err)
    }

    pub fn is_empty(&self) -> VomResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reclaim pages freed by deleted records. Returns whether anything
    /// was compacted.
    pub fn compact(&mut self) -> VomResult<bool> {
        self.db.compact().map_err(io_err)
    }
}

impl VatStore for RedbStore {
    fn get(&self, key: &str) -> VomResult<Option<String>> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(VATSTORE).map_err(io_err)?;
        let value = table
            .get(key)
            .map_err(io_err)?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> VomResult<()> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(VATSTORE).map_err(io_err)?;
            table.insert(key, value).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)
    }

    fn delete(&mut self, key: &str) -> VomResult<()> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(VATSTORE).map_err(io_err)?;
            table.remove(key).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)
    }

    fn entries_with_prefix(&self, prefix: &str) -> VomResult<Vec<(String, String)>> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(VATSTORE).map_err(io_err)?;

        let mut entries = Vec::new();
        for entry in table.range(prefix..).map_err(io_err)? {
            let (key, value) = entry.map_err(io_err)?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_string(), value.value().to_string()));
        }
        Ok(entries)
    }
}

// =============================================================================
// TESTS
// =============================================================================
