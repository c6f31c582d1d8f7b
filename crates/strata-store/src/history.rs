use std::collections::VecDeque;

use strata_types::Entity;

use crate::error::StoreResult;
use crate::traits::EntityBackend;

/// Lazy iterator over the history of one key, in ascending version order.
///
/// Records are fetched from the backend one page at a time, resuming after
/// the last version seen, so the cursor stays consistent while new revisions
/// are appended: it yields every record committed before it reaches the end.
/// The sequence is finite and [`restart`](Self::restart) rewinds it to the
/// first version.
///
/// A backend error is yielded once and ends the iteration.
pub struct HistoryCursor<'a, B: EntityBackend> {
    backend: &'a B,
    key: String,
    page_size: usize,
    after_version: u64,
    buffer: VecDeque<Entity>,
    exhausted: bool,
}

impl<'a, B: EntityBackend> HistoryCursor<'a, B> {
    /// Create a cursor positioned before the first record of `key`.
    ///
    /// A `page_size` of zero is treated as one.
    pub fn new(backend: &'a B, key: &str, page_size: usize) -> Self {
        Self {
            backend,
            key: key.to_string(),
            page_size: page_size.max(1),
            after_version: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The key whose history is being read.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Version of the last record yielded (0 before the first).
    pub fn position(&self) -> u64 {
        self.after_version
    }

    /// Rewind to the first record.
    pub fn restart(&mut self) {
        self.after_version = 0;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fill(&mut self) -> StoreResult<()> {
        let page = self
            .backend
            .history_page(&self.key, self.after_version, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<B: EntityBackend> Iterator for HistoryCursor<'_, B> {
    type Item = StoreResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let record = self.buffer.pop_front()?;
        self.after_version = record.resource_version;
        Some(Ok(record))
    }
}

#[cfg(test)]
mod tests {
    use strata_types::ETag;

    use super::*;
    use crate::memory::InMemoryEntityStore;
    use crate::transition;

    const KEY: &str = "/apps/deployments/prod/web";

    fn seeded(revisions: u8) -> InMemoryEntityStore {
        let store = InMemoryEntityStore::new();
        let mut entity = Entity::new(KEY, "alice");
        entity.etag = ETag::from_hash([1; 32]);
        store
            .write(|txn| transition::create(txn, entity.clone()))
            .unwrap();
        for i in 2..=revisions {
            let mut next = entity.clone();
            next.etag = ETag::from_hash([i; 32]);
            store
                .write(|txn| transition::update(txn, next, None))
                .unwrap();
        }
        store
    }

    #[test]
    fn yields_all_versions_in_order_across_pages() {
        let store = seeded(7);
        let versions: Vec<u64> = store
            .history(KEY, 3)
            .map(|r| r.unwrap().resource_version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn exact_page_multiple_terminates() {
        let store = seeded(4);
        let cursor = store.history(KEY, 2);
        assert_eq!(cursor.count(), 4);
    }

    #[test]
    fn unknown_key_is_empty() {
        let store = seeded(1);
        assert_eq!(store.history("/apps/deployments/prod/missing", 10).count(), 0);
    }

    #[test]
    fn restart_rewinds_to_first_record() {
        let store = seeded(3);
        let mut cursor = store.history(KEY, 2);
        assert_eq!(cursor.next().unwrap().unwrap().resource_version, 1);
        assert_eq!(cursor.next().unwrap().unwrap().resource_version, 2);
        assert_eq!(cursor.position(), 2);

        cursor.restart();
        assert_eq!(cursor.position(), 0);
        let versions: Vec<u64> = cursor.map(|r| r.unwrap().resource_version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn zero_page_size_still_progresses() {
        let store = seeded(2);
        assert_eq!(store.history(KEY, 0).count(), 2);
    }
}
