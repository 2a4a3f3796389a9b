//! Shared foundational types used across the kiln build orchestrator.
//!
//! This crate provides content hashing for validity fingerprints, interned
//! symbol identifiers for the dependency graph, and the internal error type
//! used when a build fails for reasons that are not the user's fault.

#![warn(missing_docs)]

pub mod hash;
pub mod result;
pub mod symbol;

pub use hash::ContentHash;
pub use result::{InternalError, KilnResult};
pub use symbol::{SymbolId, SymbolInterner};
