use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use strata_types::Entity;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::traits::{EntityBackend, EntityTxn, ListQuery, StoreStats};

/// In-memory, `BTreeMap`-based entity store.
///
/// Intended for tests and embedding. A write transaction holds the write
/// lock and records its changes in an overlay of the keys it touched. The
/// overlay is applied on commit and dropped on rollback, so readers only
/// ever see committed state.
pub struct InMemoryEntityStore {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    current: BTreeMap<String, Entity>,
    history: BTreeMap<String, BTreeMap<u64, Entity>>,
    versions: HashMap<String, u64>,
}

/// Changes made by one uncommitted transaction.
#[derive(Default)]
struct Overlay {
    /// `None` marks a removed current row.
    current: HashMap<String, Option<Entity>>,
    history: Vec<Entity>,
    versions: HashMap<String, u64>,
}

impl MemoryState {
    fn apply(&mut self, overlay: Overlay) {
        for (key, row) in overlay.current {
            match row {
                Some(entity) => {
                    self.current.insert(key, entity);
                }
                None => {
                    self.current.remove(&key);
                }
            }
        }
        for entity in overlay.history {
            self.history
                .entry(entity.key.clone())
                .or_default()
                .insert(entity.resource_version, entity);
        }
        self.versions.extend(overlay.versions);
    }
}

struct MemoryTxn<'s> {
    committed: &'s MemoryState,
    overlay: Overlay,
}

impl InMemoryEntityStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryState::default()),
        }
    }

    /// Number of current-state rows.
    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.current.len()).unwrap_or(0)
    }

    /// Returns `true` if no entity is current.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_state(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityTxn for MemoryTxn<'_> {
    fn read_current(&mut self, key: &str) -> StoreResult<Option<Entity>> {
        Ok(match self.overlay.current.get(key) {
            Some(staged) => staged.clone(),
            None => self.committed.current.get(key).cloned(),
        })
    }

    fn allocate_version(&mut self, key: &str) -> StoreResult<u64> {
        let last = match self.overlay.versions.get(key) {
            Some(v) => *v,
            None => self.committed.versions.get(key).copied().unwrap_or(0),
        };
        let next = last + 1;
        self.overlay.versions.insert(key.to_string(), next);
        Ok(next)
    }

    fn upsert_current(&mut self, entity: &Entity) -> StoreResult<()> {
        self.overlay
            .current
            .insert(entity.key.clone(), Some(entity.clone()));
        Ok(())
    }

    fn remove_current(&mut self, key: &str) -> StoreResult<bool> {
        let existed = self.read_current(key)?.is_some();
        self.overlay.current.insert(key.to_string(), None);
        Ok(existed)
    }

    fn append_history(&mut self, entity: &Entity) -> StoreResult<()> {
        let committed = self
            .committed
            .history
            .get(&entity.key)
            .is_some_and(|records| records.contains_key(&entity.resource_version));
        let staged = self
            .overlay
            .history
            .iter()
            .any(|e| e.key == entity.key && e.resource_version == entity.resource_version);
        if committed || staged {
            return Err(StoreError::DuplicateHistory {
                key: entity.key.clone(),
                version: entity.resource_version,
            });
        }
        self.overlay.history.push(entity.clone());
        Ok(())
    }
}

impl EntityBackend for InMemoryEntityStore {
    fn write<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn EntityTxn) -> StoreResult<T>,
    {
        let mut guard = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut txn = MemoryTxn {
            committed: &guard,
            overlay: Overlay::default(),
        };
        let result = f(&mut txn);
        let overlay = txn.overlay;
        match result {
            Ok(value) => {
                guard.apply(overlay);
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "in-memory transaction rolled back");
                Err(e)
            }
        }
    }

    fn read_current(&self, key: &str) -> StoreResult<Option<Entity>> {
        Ok(self.read_state()?.current.get(key).cloned())
    }

    fn read_version(&self, key: &str, version: u64) -> StoreResult<Option<Entity>> {
        Ok(self
            .read_state()?
            .history
            .get(key)
            .and_then(|records| records.get(&version))
            .cloned())
    }

    fn history_page(
        &self,
        key: &str,
        after_version: u64,
        limit: usize,
    ) -> StoreResult<Vec<Entity>> {
        let state = self.read_state()?;
        let Some(records) = state.history.get(key) else {
            return Ok(vec![]);
        };
        Ok(records
            .range(after_version.saturating_add(1)..)
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn list_current(&self, query: &ListQuery) -> StoreResult<Vec<Entity>> {
        let state = self.read_state()?;
        Ok(state
            .current
            .values()
            .filter(|e| query.matches(e))
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let state = self.read_state()?;
        Ok(StoreStats {
            current_rows: state.current.len() as u64,
            history_rows: state.history.values().map(|r| r.len() as u64).sum(),
            label_rows: state.current.values().map(|e| e.labels.len() as u64).sum(),
            version_counters: state.versions.len() as u64,
        })
    }
}

impl std::fmt::Debug for InMemoryEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEntityStore")
            .field("current_rows", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use strata_types::ETag;

    use super::*;
    use crate::transition;

    const KEY: &str = "/apps/deployments/prod/web";

    fn entity(key: &str, tag: u8) -> Entity {
        let mut e = Entity::new(key, "alice");
        e.etag = ETag::from_hash([tag; 32]);
        e
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let store = InMemoryEntityStore::new();
        let err = store
            .write(|txn| {
                let mut e = entity(KEY, 1);
                e.resource_version = txn.allocate_version(KEY)?;
                txn.append_history(&e)?;
                txn.upsert_current(&e)?;
                Err::<(), _>(StoreError::Backend("injected".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.stats().unwrap(), StoreStats::default());

        // The rolled-back allocation is not consumed either.
        let created = store
            .write(|txn| transition::create(txn, entity(KEY, 1)))
            .unwrap();
        assert_eq!(created.resource_version, 1);
    }

    #[test]
    fn duplicate_history_pair_is_rejected() {
        let store = InMemoryEntityStore::new();
        let err = store
            .write(|txn| {
                let mut e = entity(KEY, 1);
                e.resource_version = 1;
                txn.append_history(&e)?;
                txn.append_history(&e)
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateHistory { version: 1, .. }));
        assert_eq!(store.stats().unwrap().history_rows, 0);
    }

    #[test]
    fn writes_inside_a_transaction_are_visible_to_it() {
        let store = InMemoryEntityStore::new();
        store
            .write(|txn| {
                let mut e = entity(KEY, 1);
                e.resource_version = txn.allocate_version(KEY)?;
                txn.upsert_current(&e)?;
                assert!(txn.read_current(KEY)?.is_some());
                assert!(txn.remove_current(KEY)?);
                assert!(!txn.remove_current(KEY)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn rolled_back_delete_keeps_the_current_row() {
        let store = InMemoryEntityStore::new();
        store
            .write(|txn| transition::create(txn, entity(KEY, 1)))
            .unwrap();
        let err = store
            .write(|txn| {
                transition::delete(txn, KEY, None, 5, "bob")?;
                assert!(txn.read_current(KEY)?.is_none());
                Err::<(), _>(StoreError::Backend("injected".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        let current = store.read_current(KEY).unwrap().unwrap();
        assert_eq!(current.resource_version, 1);
        let stats = store.stats().unwrap();
        assert_eq!(stats.current_rows, 1);
        assert_eq!(stats.history_rows, 1);
        // Versions allocated by the rolled-back delete are not consumed.
        let updated = store
            .write(|txn| transition::update(txn, entity(KEY, 2), None))
            .unwrap();
        assert_eq!(updated.entity().resource_version, 2);
    }

    #[test]
    fn commit_touches_only_written_keys() {
        let store = InMemoryEntityStore::new();
        for name in ["a", "b", "c"] {
            let key = format!("/apps/deployments/prod/{name}");
            store
                .write(|txn| transition::create(txn, entity(&key, 1)))
                .unwrap();
        }
        store
            .write(|txn| {
                transition::update(txn, entity("/apps/deployments/prod/b", 2), None)?;
                transition::delete(txn, "/apps/deployments/prod/c", None, 9, "")
            })
            .unwrap();

        let a = store.read_current("/apps/deployments/prod/a").unwrap().unwrap();
        assert_eq!(a.resource_version, 1);
        let b = store.read_current("/apps/deployments/prod/b").unwrap().unwrap();
        assert_eq!(b.resource_version, 2);
        assert!(store.read_current("/apps/deployments/prod/c").unwrap().is_none());
        assert_eq!(
            store.read_version("/apps/deployments/prod/c", 2).unwrap().unwrap().action,
            strata_types::Action::Deleted
        );
        let stats = store.stats().unwrap();
        assert_eq!(stats.current_rows, 2);
        assert_eq!(stats.history_rows, 5);
        assert_eq!(stats.version_counters, 3);
    }

    #[test]
    fn list_is_key_ordered_and_limited() {
        let store = InMemoryEntityStore::new();
        for name in ["c", "a", "b", "d"] {
            let key = format!("/apps/deployments/prod/{name}");
            store
                .write(|txn| transition::create(txn, entity(&key, 1)))
                .unwrap();
        }
        let page = store
            .list_current(&ListQuery {
                limit: 3,
                after_key: Some("/apps/deployments/prod/a".into()),
                ..Default::default()
            })
            .unwrap();
        let names: Vec<&str> = page.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "/apps/deployments/prod/b",
                "/apps/deployments/prod/c",
                "/apps/deployments/prod/d"
            ]
        );
    }

    #[test]
    fn concurrent_updates_get_distinct_increasing_versions() {
        let store = Arc::new(InMemoryEntityStore::new());
        store
            .write(|txn| transition::create(txn, entity(KEY, 0)))
            .unwrap();

        let handles: Vec<_> = (1..=8u8)
            .map(|tag| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .write(|txn| transition::update(txn, entity(KEY, tag), None))
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }

        let versions: Vec<u64> = store
            .history(KEY, 4)
            .map(|r| r.unwrap().resource_version)
            .collect();
        assert_eq!(versions, (1..=9).collect::<Vec<_>>());
        assert_eq!(store.read_current(KEY).unwrap().unwrap().resource_version, 9);
    }

    #[test]
    fn concurrent_updates_from_same_version_have_one_winner() {
        let store = Arc::new(InMemoryEntityStore::new());
        store
            .write(|txn| transition::create(txn, entity(KEY, 0)))
            .unwrap();

        let handles: Vec<_> = (1..=8u8)
            .map(|tag| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.write(|txn| transition::update(txn, entity(KEY, tag), Some(1)))
                })
            })
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::Conflict { .. })))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.stats().unwrap().history_rows, 2);
    }

    #[test]
    fn debug_format() {
        let store = InMemoryEntityStore::new();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryEntityStore"));
        assert!(debug.contains("current_rows"));
    }
}
