//! Transactional entity storage for Strata.
//!
//! This crate owns the two tables that make every revision of an entity
//! retrievable:
//!
//! - the **current-state** table, holding at most one row per key (the
//!   latest accepted revision), and
//! - the **history** table, an append-only record of every revision keyed
//!   by `(key, resource_version)`.
//!
//! A per-key **version allocator** hands out strictly increasing resource
//! versions. Allocation, the current-state write and the history append run
//! inside one [`EntityTxn`] and commit or roll back together.
//!
//! # Storage Backends
//!
//! All backends implement the [`EntityBackend`] trait:
//!
//! - [`SqliteEntityStore`] -- relational store backed by SQLite
//! - [`InMemoryEntityStore`] -- `BTreeMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Writers are serialized: a write transaction holds the backend write
//!    lock from its first read to commit, so versions follow commit order.
//! 2. History rows are never updated or deleted.
//! 3. Version counters survive deletion; a key never reuses a version.
//! 4. Any error inside a transaction rolls back every statement it ran.
//! 5. Readers only ever observe committed state.
//! 6. All backend errors are propagated, never silently ignored.

pub mod error;
pub mod history;
pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod transition;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use history::HistoryCursor;
pub use memory::InMemoryEntityStore;
pub use sqlite::{SqliteEntityStore, SqliteOptions};
pub use traits::{EntityBackend, EntityTxn, ListQuery, StoreStats};
pub use transition::WriteOutcome;
