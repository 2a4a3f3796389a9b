//! Ownership and lifecycle of all persistent build tables.
//!
//! A [`CacheManager`] is opened once per process for a project and handed to
//! the orchestrator. Opening never fails: a table that turns out to be
//! corrupted is wiped and replaced by an empty one, and the problem is
//! recorded so that the orchestrator can request a full rebuild.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::depgraph::DependencyGraphCache;
use crate::epoch::filesystem_epoch;
use crate::error::CacheError;
use crate::ledger::BuildStatusLedger;
use crate::outputs::SourceOutputIndex;
use crate::validity::ValidityStateStore;

const VALIDITY_SUBDIR: &str = "validity";
const GRAPH_FILE: &str = "graph.tbl";
const OUTPUTS_FILE: &str = "outputs.tbl";

/// Simultaneous mutable access to the tables one compiler works with.
pub struct CacheParts<'a> {
    /// The compiler's validity table.
    pub validity: &'a mut ValidityStateStore,
    /// The project dependency graph.
    pub graph: &'a mut DependencyGraphCache,
    /// The source-to-output index.
    pub outputs: &'a mut SourceOutputIndex,
}

/// Owner of every persistent table in a cache directory.
pub struct CacheManager {
    dir: PathBuf,
    validity: BTreeMap<String, ValidityStateStore>,
    graph: DependencyGraphCache,
    outputs: SourceOutputIndex,
    corruption: Vec<String>,
}

fn table_file_name(table: &str) -> String {
    let name: String = table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{name}.tbl")
}

/// Records a corrupted table and leaves a rebuild marker behind.
///
/// The table is wiped as soon as it is found damaged, so the marker is what
/// carries the rebuild request to a later build or process.
fn note_corruption(dir: &Path, corruption: &mut Vec<String>, err: CacheError) {
    let reason = format!("build caches are corrupted: {err}");
    if let Err(e) = BuildStatusLedger::new(dir).write_rebuild_marker(&reason) {
        warn!(error = %e, "cannot write rebuild marker");
    }
    corruption.push(err.to_string());
}

fn open_validity(dir: &Path, table: &str, corruption: &mut Vec<String>) -> ValidityStateStore {
    let path = dir.join(VALIDITY_SUBDIR).join(table_file_name(table));
    match ValidityStateStore::open(&path) {
        Ok(store) => store,
        Err(e) => {
            warn!(table, error = %e, "validity table corrupted, starting empty");
            note_corruption(dir, corruption, e);
            let mut store = ValidityStateStore::empty(&path);
            if let Err(e) = store.wipe_and_reinitialize() {
                note_corruption(dir, corruption, e);
            }
            store
        }
    }
}

impl CacheManager {
    /// Opens the tables stored in `cache_dir`.
    pub fn open(cache_dir: &Path) -> Self {
        let mut corruption = Vec::new();

        let graph_path = cache_dir.join(GRAPH_FILE);
        let graph = DependencyGraphCache::open(&graph_path).unwrap_or_else(|e| {
            warn!(error = %e, "dependency graph corrupted, starting empty");
            note_corruption(cache_dir, &mut corruption, e);
            let mut graph = DependencyGraphCache::empty(&graph_path);
            if let Err(e) = graph.wipe_and_reinitialize() {
                note_corruption(cache_dir, &mut corruption, e);
            }
            graph
        });

        let outputs_path = cache_dir.join(OUTPUTS_FILE);
        let outputs = SourceOutputIndex::open(&outputs_path).unwrap_or_else(|e| {
            warn!(error = %e, "output index corrupted, starting empty");
            note_corruption(cache_dir, &mut corruption, e);
            let mut outputs = SourceOutputIndex::empty(&outputs_path);
            if let Err(e) = outputs.wipe_and_reinitialize() {
                note_corruption(cache_dir, &mut corruption, e);
            }
            outputs
        });

        Self {
            dir: cache_dir.to_path_buf(),
            validity: BTreeMap::new(),
            graph,
            outputs,
            corruption,
        }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The status ledger stored alongside the tables.
    pub fn ledger(&self) -> BuildStatusLedger {
        BuildStatusLedger::new(&self.dir)
    }

    /// The identity stamp of this cache storage.
    pub fn epoch(&self) -> Result<i64, CacheError> {
        filesystem_epoch(&self.dir)
    }

    /// Returns the named validity table, opening it on first use.
    pub fn validity(&mut self, table: &str) -> &mut ValidityStateStore {
        self.parts(table).validity
    }

    /// Returns the named validity table together with the shared tables.
    pub fn parts(&mut self, table: &str) -> CacheParts<'_> {
        let Self {
            dir,
            validity,
            graph,
            outputs,
            corruption,
        } = self;
        let store = validity
            .entry(table.to_string())
            .or_insert_with(|| open_validity(dir, table, corruption));
        CacheParts {
            validity: store,
            graph,
            outputs,
        }
    }

    /// The project dependency graph.
    pub fn graph(&mut self) -> &mut DependencyGraphCache {
        &mut self.graph
    }

    /// The source-to-output index.
    pub fn outputs(&mut self) -> &mut SourceOutputIndex {
        &mut self.outputs
    }

    /// The corruption reports collected so far, left in place.
    pub fn corruption_reports(&self) -> &[String] {
        &self.corruption
    }

    /// Drains the corruption reports collected while opening tables.
    pub fn take_corruption_reports(&mut self) -> Vec<String> {
        std::mem::take(&mut self.corruption)
    }

    /// Writes every changed table to disk.
    ///
    /// All tables are attempted; the first failure is returned.
    pub fn flush_all(&mut self) -> Result<(), CacheError> {
        let mut first_error = None;
        for store in self.validity.values_mut() {
            if let Err(e) = store.force_flush() {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.graph.force_flush() {
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.outputs.force_flush() {
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wipes every table, including validity tables not opened yet.
    pub fn clear_all(&mut self) -> Result<(), CacheError> {
        for store in self.validity.values_mut() {
            store.wipe_and_reinitialize()?;
        }
        let validity_dir = self.dir.join(VALIDITY_SUBDIR);
        match std::fs::remove_dir_all(&validity_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(validity_dir, e)),
        }
        self.graph.wipe_and_reinitialize()?;
        self.outputs.wipe_and_reinitialize()
    }

    /// Flushes and releases every table.
    pub fn close(mut self) -> Result<(), CacheError> {
        self.graph.reset_state();
        self.flush_all()
    }
}
