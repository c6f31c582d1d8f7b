use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_types::Entity;

use crate::error::StoreResult;
use crate::history::HistoryCursor;

/// Statement surface available inside one write transaction.
///
/// Every method observes the writes made earlier in the same transaction.
/// Nothing becomes visible to readers until the enclosing
/// [`EntityBackend::write`] call commits.
pub trait EntityTxn {
    /// Read the current-state row for `key`.
    fn read_current(&mut self, key: &str) -> StoreResult<Option<Entity>>;

    /// Allocate the next resource version for `key`.
    ///
    /// The returned value is strictly greater than every version previously
    /// allocated for the key, including versions of deleted lineages.
    fn allocate_version(&mut self, key: &str) -> StoreResult<u64>;

    /// Replace the current-state row for `entity.key` entirely.
    fn upsert_current(&mut self, entity: &Entity) -> StoreResult<()>;

    /// Remove the current-state row for `key`. Returns `true` if a row
    /// existed.
    fn remove_current(&mut self, key: &str) -> StoreResult<bool>;

    /// Append an immutable history record at `(entity.key,
    /// entity.resource_version)`.
    ///
    /// Fails with [`crate::StoreError::DuplicateHistory`] if that exact pair
    /// is already recorded.
    fn append_history(&mut self, entity: &Entity) -> StoreResult<()>;
}

/// Filter and page bounds for listing current entities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Keys must start with one of these prefixes. Empty matches every key.
    pub key_prefixes: Vec<String>,
    /// Every label here must be present with exactly this value.
    pub labels: BTreeMap<String, String>,
    /// Only keys strictly greater than this one are returned.
    pub after_key: Option<String>,
    /// Maximum number of rows to return.
    pub limit: usize,
}

impl ListQuery {
    /// Returns `true` if `entity` passes the prefix and label filters.
    pub fn matches(&self, entity: &Entity) -> bool {
        let prefix_ok = self.key_prefixes.is_empty()
            || self
                .key_prefixes
                .iter()
                .any(|prefix| entity.key.starts_with(prefix.as_str()));
        let labels_ok = self
            .labels
            .iter()
            .all(|(name, value)| entity.labels.get(name) == Some(value));
        let after_ok = self
            .after_key
            .as_deref()
            .map_or(true, |after| entity.key.as_str() > after);
        prefix_ok && labels_ok && after_ok
    }
}

/// Row counts across the storage tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub current_rows: u64,
    pub history_rows: u64,
    pub label_rows: u64,
    pub version_counters: u64,
}

/// Transactional entity storage backend.
///
/// All implementations must satisfy these invariants:
/// - At most one current-state row per key.
/// - A write transaction either commits every statement it ran or none.
/// - Concurrent write transactions are serialized, so allocated versions
///   follow commit order.
/// - Reads never observe uncommitted writes.
pub trait EntityBackend: Send + Sync {
    /// Run `f` inside one write transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back otherwise and returns the
    /// error unchanged.
    fn write<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn EntityTxn) -> StoreResult<T>;

    /// Read the committed current-state row for `key`.
    fn read_current(&self, key: &str) -> StoreResult<Option<Entity>>;

    /// Read the history record at exactly `version`.
    fn read_version(&self, key: &str, version: u64) -> StoreResult<Option<Entity>>;

    /// Read up to `limit` history records of `key` with a version greater
    /// than `after_version`, ascending.
    fn history_page(&self, key: &str, after_version: u64, limit: usize)
        -> StoreResult<Vec<Entity>>;

    /// List current rows matching `query`, ordered by key.
    fn list_current(&self, query: &ListQuery) -> StoreResult<Vec<Entity>>;

    /// Row counts across the storage tables.
    fn stats(&self) -> StoreResult<StoreStats>;

    /// Lazily iterate every history record of `key` in version order.
    fn history(&self, key: &str, page_size: usize) -> HistoryCursor<'_, Self>
    where
        Self: Sized,
    {
        HistoryCursor::new(self, key, page_size)
    }
}
