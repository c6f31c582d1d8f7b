//! State transitions applied inside a write transaction.
//!
//! Each function moves one key through its lifecycle
//! (`absent → current(v1) → … → current(vn) → deleted`) using only the
//! [`EntityTxn`] surface, so every backend shares the same rules. The caller
//! supplies an entity whose payload, `etag`, and provenance fields are
//! already populated; these functions decide versions, carry identity over
//! from the current row, and write the current-state and history tables.

use strata_types::{Action, Entity};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::EntityTxn;

/// Result of an update transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new revision was written.
    Written(Entity),
    /// The payload tag matched the current row; nothing was written.
    Unchanged(Entity),
}

impl WriteOutcome {
    pub fn entity(&self) -> &Entity {
        match self {
            Self::Written(e) | Self::Unchanged(e) => e,
        }
    }

    pub fn into_entity(self) -> Entity {
        match self {
            Self::Written(e) | Self::Unchanged(e) => e,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged(_))
    }
}

/// Create the first revision of a lineage.
///
/// Fails with [`StoreError::AlreadyExists`] if the key has a current row.
/// A key whose previous lineage was deleted continues its version sequence.
pub fn create(txn: &mut dyn EntityTxn, mut entity: Entity) -> StoreResult<Entity> {
    if let Some(existing) = txn.read_current(&entity.key)? {
        return Err(StoreError::AlreadyExists {
            key: entity.key,
            version: existing.resource_version,
        });
    }

    entity.resource_version = txn.allocate_version(&entity.key)?;
    entity.action = Action::Created;
    txn.append_history(&entity)?;
    txn.upsert_current(&entity)?;

    debug!(key = %entity.key, version = entity.resource_version, "created");
    Ok(entity)
}

/// Write a new revision over the current row.
///
/// Identity (`guid`, key components) and creation provenance are carried
/// over from the current row. If `expected_version` is set it must equal the
/// current version. When the new `etag` equals the current one no version is
/// allocated and the current row is returned as [`WriteOutcome::Unchanged`].
pub fn update(
    txn: &mut dyn EntityTxn,
    mut entity: Entity,
    expected_version: Option<u64>,
) -> StoreResult<WriteOutcome> {
    let current = txn
        .read_current(&entity.key)?
        .ok_or_else(|| StoreError::NotFound(entity.key.clone()))?;
    check_expected(&current, expected_version)?;

    if current.etag == entity.etag {
        debug!(key = %entity.key, version = current.resource_version, "unchanged");
        return Ok(WriteOutcome::Unchanged(current));
    }

    entity.guid = current.guid;
    entity.group = current.group;
    entity.resource = current.resource;
    entity.namespace = current.namespace;
    entity.name = current.name;
    entity.subresource = current.subresource;
    entity.created_at = current.created_at;
    entity.created_by = current.created_by;

    entity.resource_version = txn.allocate_version(&entity.key)?;
    entity.action = Action::Updated;
    txn.append_history(&entity)?;
    txn.upsert_current(&entity)?;

    debug!(key = %entity.key, version = entity.resource_version, "updated");
    Ok(WriteOutcome::Written(entity))
}

/// Remove the current row and append a tombstone revision.
///
/// The tombstone is a copy of the last current row with a fresh version,
/// `action = Deleted`, and the given deletion provenance. An empty
/// `deleted_by` keeps the last `updated_by`.
pub fn delete(
    txn: &mut dyn EntityTxn,
    key: &str,
    expected_version: Option<u64>,
    deleted_at: i64,
    deleted_by: &str,
) -> StoreResult<Entity> {
    let current = txn
        .read_current(key)?
        .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
    check_expected(&current, expected_version)?;

    let mut tombstone = current;
    tombstone.resource_version = txn.allocate_version(key)?;
    tombstone.action = Action::Deleted;
    tombstone.updated_at = deleted_at;
    if !deleted_by.is_empty() {
        tombstone.updated_by = deleted_by.to_string();
    }
    txn.append_history(&tombstone)?;
    txn.remove_current(key)?;

    debug!(key = %key, version = tombstone.resource_version, "deleted");
    Ok(tombstone)
}

fn check_expected(current: &Entity, expected_version: Option<u64>) -> StoreResult<()> {
    match expected_version {
        Some(expected) if expected != current.resource_version => Err(StoreError::Conflict {
            key: current.key.clone(),
            expected,
            actual: current.resource_version,
        }),
        _ => Ok(()),
    }
}
