//! ncdb-core: the NCDB coverage container codec and merge engine.
//!
//! The crate reads and writes the compact ZIP-based NCDB container, its
//! relational SQLite sibling, and merges any number of either into one
//! database while keeping per-test provenance. With the `python` feature it
//! is also built as the `_ncdb_core` Python extension module.

pub mod codec;
pub mod config;
pub mod container;
pub mod errors;
pub mod merge;
pub mod meta;
pub mod models;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use errors::{NcdbError, NcdbResult};
pub use models::CoverageDb;
