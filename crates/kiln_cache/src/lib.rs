//! Persistent build state for incremental compilation.
//!
//! Every store in this crate lives under the project's cache directory and
//! survives process restarts:
//!
//! - [`ValidityStateStore`]: per-compiler fingerprints of the files it has
//!   processed, used to skip unchanged inputs.
//! - [`DependencyGraphCache`]: the symbol-level "who references what" graph
//!   used to find files made stale by a changed symbol.
//! - [`SourceOutputIndex`]: which outputs each source produced, and which
//!   sources are marked for recompilation.
//! - [`BuildStatusLedger`]: the small record that detects interrupted builds,
//!   stale cache formats, and replaced cache storage.
//!
//! [`CacheManager`] owns the tables and is handed to the build orchestrator
//! at construction time.

#![warn(missing_docs)]

pub mod depgraph;
pub mod epoch;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod outputs;
pub mod table;
pub mod validity;

pub use depgraph::{DependencyGraphCache, DependentsFilter, FileSymbols, SymbolShape};
pub use error::CacheError;
pub use ledger::{BuildStatus, BuildStatusLedger, LedgerRead, CACHE_FORMAT_VERSION};
pub use manager::{CacheManager, CacheParts};
pub use outputs::{OutputRecord, SourceOutputIndex};
pub use validity::{ValidityState, ValidityStateStore};
