//! Storage module for anycast-atlas.
//!
//! Provides the CSV artifacts behind the probe caches, the target ledger,
//! the ping result table, the failed-target log and the enrichment table.

mod models;
mod store;

pub use models::*;
pub use store::*;
