//! The persistent cross-file symbol dependency graph.
//!
//! Each compiled file contributes the symbols it *defines*, each with a
//! shape hash, and the symbol names it *references*. When a file is
//! recompiled, any defined symbol that appeared, disappeared, or changed
//! shape becomes a *traverse root*. Querying the graph for dependents then
//! yields the files referencing those roots.
//!
//! Updates are applied to the in-memory graph immediately so that later
//! rounds see them, but they stay *staged* until [`commit`] is called. A
//! chunk that fails calls [`discard_staged`] instead, restoring the graph to
//! its last committed state.
//!
//! [`commit`]: DependencyGraphCache::commit
//! [`discard_staged`]: DependencyGraphCache::discard_staged

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use kiln_common::{ContentHash, SymbolId, SymbolInterner};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::table::{delete_table, read_table, write_table};

const TABLE_KIND: &str = "graph";

/// A symbol defined by a file together with a hash of its externally
/// visible shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolShape {
    /// The symbol name.
    pub name: String,
    /// Hash of everything dependents can observe about the symbol.
    pub shape: ContentHash,
}

/// The symbols a compiler extracted from one source file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSymbols {
    /// Symbols the file defines.
    pub defines: Vec<SymbolShape>,
    /// Names of symbols the file references.
    pub references: Vec<String>,
}

impl FileSymbols {
    /// Creates an empty symbol set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a defined symbol.
    pub fn define(mut self, name: impl Into<String>, shape: ContentHash) -> Self {
        self.defines.push(SymbolShape {
            name: name.into(),
            shape,
        });
        self
    }

    /// Adds a referenced symbol.
    pub fn reference(mut self, name: impl Into<String>) -> Self {
        self.references.push(name.into());
        self
    }
}

/// Cumulative filter for dependency queries within one chunk.
///
/// Remembers which symbols have already been traversed and which files have
/// already been reported, so that no dependency is reported twice.
#[derive(Default)]
pub struct DependentsFilter {
    seen_symbols: HashSet<SymbolId>,
    seen_files: HashSet<PathBuf>,
}

impl DependentsFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files reported through this filter so far.
    pub fn reported_files(&self) -> usize {
        self.seen_files.len()
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
struct FileEntry {
    defines: BTreeMap<SymbolId, ContentHash>,
    references: BTreeSet<SymbolId>,
}

#[derive(Serialize, Deserialize, Default)]
struct GraphTable {
    files: BTreeMap<PathBuf, FileSymbols>,
}

/// Persistent symbol-level dependency graph for a project.
pub struct DependencyGraphCache {
    path: PathBuf,
    interner: SymbolInterner,
    files: BTreeMap<PathBuf, FileEntry>,
    referrers: HashMap<SymbolId, BTreeSet<PathBuf>>,
    undo: BTreeMap<PathBuf, Option<FileEntry>>,
    traverse_roots: BTreeSet<SymbolId>,
    dirty: bool,
}

impl DependencyGraphCache {
    /// Opens the graph backed by `path`.
    ///
    /// A missing file yields an empty graph; an unreadable one is an error.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let table: GraphTable = read_table(path, TABLE_KIND)?.unwrap_or_default();
        let mut graph = Self::empty(path);
        for (file, symbols) in &table.files {
            let entry = graph.to_entry(symbols);
            graph.replace_entry(file, Some(entry));
        }
        graph.dirty = false;
        Ok(graph)
    }

    /// Creates an empty graph that will be written to `path` on flush.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            interner: SymbolInterner::new(),
            files: BTreeMap::new(),
            referrers: HashMap::new(),
            undo: BTreeMap::new(),
            traverse_roots: BTreeSet::new(),
            dirty: true,
        }
    }

    fn to_entry(&self, symbols: &FileSymbols) -> FileEntry {
        FileEntry {
            defines: symbols
                .defines
                .iter()
                .map(|d| (self.interner.intern(&d.name), d.shape))
                .collect(),
            references: symbols
                .references
                .iter()
                .map(|r| self.interner.intern(r))
                .collect(),
        }
    }

    fn to_symbols(&self, entry: &FileEntry) -> FileSymbols {
        FileSymbols {
            defines: entry
                .defines
                .iter()
                .map(|(id, shape)| SymbolShape {
                    name: self.interner.resolve(*id).to_string(),
                    shape: *shape,
                })
                .collect(),
            references: entry
                .references
                .iter()
                .map(|id| self.interner.resolve(*id).to_string())
                .collect(),
        }
    }

    fn replace_entry(&mut self, file: &Path, entry: Option<FileEntry>) {
        if let Some(old) = self.files.remove(file) {
            for symbol in &old.references {
                if let Some(set) = self.referrers.get_mut(symbol) {
                    set.remove(file);
                    if set.is_empty() {
                        self.referrers.remove(symbol);
                    }
                }
            }
        }
        if let Some(new) = entry {
            for symbol in &new.references {
                self.referrers
                    .entry(*symbol)
                    .or_default()
                    .insert(file.to_path_buf());
            }
            self.files.insert(file.to_path_buf(), new);
        }
        self.dirty = true;
    }

    fn remember(&mut self, file: &Path) {
        if !self.undo.contains_key(file) {
            let committed = self.files.get(file).cloned();
            self.undo.insert(file.to_path_buf(), committed);
        }
    }

    /// Stages the freshly extracted symbols of `file`.
    ///
    /// Returns the number of defined symbols whose shape changed, appeared,
    /// or disappeared; those become traverse roots.
    pub fn stage_file(&mut self, file: &Path, symbols: &FileSymbols) -> usize {
        let new = self.to_entry(symbols);
        let mut changed = BTreeSet::new();
        match self.files.get(file) {
            Some(old) => {
                for (id, shape) in &new.defines {
                    if old.defines.get(id) != Some(shape) {
                        changed.insert(*id);
                    }
                }
                for id in old.defines.keys() {
                    if !new.defines.contains_key(id) {
                        changed.insert(*id);
                    }
                }
                if *old == new {
                    return 0;
                }
            }
            None => changed.extend(new.defines.keys().copied()),
        }
        self.remember(file);
        self.replace_entry(file, Some(new));
        let count = changed.len();
        self.traverse_roots.extend(changed);
        count
    }

    /// Stages the removal of `file`; every symbol it defined becomes a
    /// traverse root.
    pub fn remove_file(&mut self, file: &Path) -> usize {
        let Some(old) = self.files.get(file) else {
            return 0;
        };
        let roots: Vec<SymbolId> = old.defines.keys().copied().collect();
        self.remember(file);
        self.replace_entry(file, None);
        let count = roots.len();
        self.traverse_roots.extend(roots);
        count
    }

    /// Treats every symbol `file` defines as changed without touching its
    /// entry. Used for files whose compilation failed.
    pub fn mark_changed(&mut self, file: &Path) {
        if let Some(entry) = self.files.get(file) {
            self.traverse_roots.extend(entry.defines.keys().copied());
        }
    }

    /// Returns `true` if some changed symbol has not been traversed yet.
    pub fn has_unprocessed_traverse_roots(&self) -> bool {
        !self.traverse_roots.is_empty()
    }

    /// Returns the files referencing a changed symbol.
    ///
    /// Symbols and files already reported through `filter` are skipped, as
    /// are files for which `exclude` returns `true`. An excluded file is not
    /// remembered by the filter, so a later change can still report it.
    pub fn find_dependents(
        &self,
        filter: &mut DependentsFilter,
        exclude: impl Fn(&Path) -> bool,
    ) -> Vec<PathBuf> {
        let mut dependents = Vec::new();
        for symbol in &self.traverse_roots {
            if !filter.seen_symbols.insert(*symbol) {
                continue;
            }
            let Some(files) = self.referrers.get(symbol) else {
                continue;
            };
            for file in files {
                if filter.seen_files.contains(file) || exclude(file) {
                    continue;
                }
                filter.seen_files.insert(file.clone());
                dependents.push(file.clone());
            }
        }
        debug!(
            roots = self.traverse_roots.len(),
            dependents = dependents.len(),
            "dependency query"
        );
        dependents
    }

    /// Forgets all traverse roots.
    pub fn clear_traverse_roots(&mut self) {
        self.traverse_roots.clear();
    }

    /// Makes every staged change permanent.
    pub fn commit(&mut self) {
        self.undo.clear();
    }

    /// Reverts every staged change and forgets the traverse roots.
    pub fn discard_staged(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        for (file, committed) in undo {
            self.replace_entry(&file, committed);
        }
        self.traverse_roots.clear();
    }

    /// Drops transient per-build state: staged changes and traverse roots.
    pub fn reset_state(&mut self) {
        self.discard_staged();
    }

    /// Returns `true` if `file` has an entry.
    pub fn contains(&self, file: &Path) -> bool {
        self.files.contains_key(file)
    }

    /// Returns the recorded symbols of `file`.
    pub fn symbols_of(&self, file: &Path) -> Option<FileSymbols> {
        self.files.get(file).map(|e| self.to_symbols(e))
    }

    /// Number of files in the graph.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the graph has no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Writes the graph to disk if it changed.
    pub fn force_flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        let table = GraphTable {
            files: self
                .files
                .iter()
                .map(|(path, entry)| (path.clone(), self.to_symbols(entry)))
                .collect(),
        };
        write_table(&self.path, TABLE_KIND, &table)?;
        self.dirty = false;
        Ok(())
    }

    /// Drops the whole graph and deletes the backing file.
    pub fn wipe_and_reinitialize(&mut self) -> Result<(), CacheError> {
        debug!(path = %self.path.display(), "wiping dependency graph");
        *self = Self::empty(&self.path);
        delete_table(&self.path)
    }

    /// Flushes and releases the graph.
    pub fn close(mut self) -> Result<(), CacheError> {
        self.reset_state();
        self.force_flush()
    }
}
