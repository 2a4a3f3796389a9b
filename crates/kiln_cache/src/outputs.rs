//! Source-to-output tracking and the recompile mark set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::table::{delete_table, read_table, write_table};

const TABLE_KIND: &str = "outputs";

/// What one translator produced from one source file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Name of the module the source belonged to when it was compiled.
    pub module: String,
    /// Files written for the source.
    pub outputs: Vec<PathBuf>,
}

#[derive(Serialize, Deserialize, Default)]
struct OutputsTable {
    records: BTreeMap<String, BTreeMap<PathBuf, OutputRecord>>,
    to_recompile: BTreeSet<PathBuf>,
}

/// Persistent index of which outputs each translator produced for each
/// source, plus the set of sources marked for recompilation by an earlier
/// build.
pub struct SourceOutputIndex {
    path: PathBuf,
    table: OutputsTable,
    dirty: bool,
}

impl SourceOutputIndex {
    /// Opens the index backed by `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let table = read_table(path, TABLE_KIND)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            table,
            dirty: false,
        })
    }

    /// Creates an empty index that will be written to `path` on flush.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            table: OutputsTable::default(),
            dirty: true,
        }
    }

    /// Records what `translator` produced for `source`, replacing any
    /// earlier record.
    pub fn record(&mut self, translator: &str, source: &Path, record: OutputRecord) {
        self.table
            .records
            .entry(translator.to_string())
            .or_default()
            .insert(source.to_path_buf(), record);
        self.dirty = true;
    }

    /// Returns the record `translator` holds for `source`.
    pub fn record_of(&self, translator: &str, source: &Path) -> Option<&OutputRecord> {
        self.table.records.get(translator)?.get(source)
    }

    /// Forgets what `translator` produced for `source`.
    pub fn remove(&mut self, translator: &str, source: &Path) -> Option<OutputRecord> {
        let removed = self.table.records.get_mut(translator)?.remove(source);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Iterates over every `(source, record)` pair of `translator`.
    pub fn entries<'a>(
        &'a self,
        translator: &str,
    ) -> impl Iterator<Item = (&'a Path, &'a OutputRecord)> + 'a {
        self.table
            .records
            .get(translator)
            .into_iter()
            .flat_map(|m| m.iter().map(|(p, r)| (p.as_path(), r)))
    }

    /// Iterates over every output path of every translator.
    pub fn all_outputs(&self) -> impl Iterator<Item = (&Path, &OutputRecord)> {
        self.table
            .records
            .values()
            .flat_map(|m| m.iter().map(|(p, r)| (p.as_path(), r)))
    }

    /// Marks `source` for recompilation by the next build that sees it.
    pub fn mark(&mut self, source: &Path) {
        if self.table.to_recompile.insert(source.to_path_buf()) {
            self.dirty = true;
        }
    }

    /// Clears the recompile mark of `source`.
    pub fn unmark(&mut self, source: &Path) {
        if self.table.to_recompile.remove(source) {
            self.dirty = true;
        }
    }

    /// Returns `true` if `source` is marked for recompilation.
    pub fn is_marked(&self, source: &Path) -> bool {
        self.table.to_recompile.contains(source)
    }

    /// Iterates over all marked sources.
    pub fn marked(&self) -> impl Iterator<Item = &Path> {
        self.table.to_recompile.iter().map(PathBuf::as_path)
    }

    /// Writes the index to disk if it changed.
    pub fn force_flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        write_table(&self.path, TABLE_KIND, &self.table)?;
        self.dirty = false;
        Ok(())
    }

    /// Drops every record and mark and deletes the backing file.
    pub fn wipe_and_reinitialize(&mut self) -> Result<(), CacheError> {
        self.table = OutputsTable::default();
        self.dirty = true;
        delete_table(&self.path)
    }

    /// Flushes and releases the index.
    pub fn close(mut self) -> Result<(), CacheError> {
        self.force_flush()
    }
}
