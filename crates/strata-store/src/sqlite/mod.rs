//! SQLite-backed entity store.

mod columns;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use strata_types::Entity;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::{EntityBackend, EntityTxn, ListQuery, StoreStats};

use self::columns::{EncodedEntity, EntityRow, Table, COLUMNS};

pub use self::schema::SCHEMA_VERSION;

/// Connection settings for [`SqliteEntityStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    /// How long a writer waits for another connection's lock before the
    /// request fails with [`StoreError::Busy`].
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging (file databases only).
    pub wal: bool,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

/// Entity store persisted in a SQLite database.
///
/// One connection is shared behind a mutex. Write transactions start with
/// `BEGIN IMMEDIATE`, so they also serialize against other processes using
/// the same database file.
pub struct SqliteEntityStore {
    connection: Mutex<Connection>,
    path: Option<PathBuf>,
}

struct SqliteTxn<'c> {
    tx: &'c Transaction<'c>,
}

impl SqliteEntityStore {
    /// Open (creating if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, options: &SqliteOptions) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let connection = Connection::open(path).map_err(map_sqlite)?;
        if options.wal {
            connection
                .pragma_update(None, "journal_mode", "WAL")
                .map_err(map_sqlite)?;
        }
        Self::from_connection(connection, options, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let connection = Connection::open_in_memory().map_err(map_sqlite)?;
        Self::from_connection(connection, &SqliteOptions::default(), None)
    }

    fn from_connection(
        mut connection: Connection,
        options: &SqliteOptions,
        path: Option<PathBuf>,
    ) -> StoreResult<Self> {
        connection
            .busy_timeout(Duration::from_millis(options.busy_timeout_ms))
            .map_err(map_sqlite)?;
        schema::initialize(&mut connection)?;
        debug!(path = ?path, "opened sqlite entity store");
        Ok(Self {
            connection: Mutex::new(connection),
            path,
        })
    }

    /// Database file location, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.connection.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl EntityTxn for SqliteTxn<'_> {
    fn read_current(&mut self, key: &str) -> StoreResult<Option<Entity>> {
        select_one(
            self.tx,
            &format!("SELECT {COLUMNS} FROM entity WHERE key = ?1"),
            params![key],
        )
    }

    fn allocate_version(&mut self, key: &str) -> StoreResult<u64> {
        let version: i64 = self
            .tx
            .prepare_cached(
                "INSERT INTO resource_version (key, version) VALUES (?1, 1)
                 ON CONFLICT (key) DO UPDATE SET version = version + 1
                 RETURNING version",
            )
            .and_then(|mut stmt| stmt.query_row(params![key], |row| row.get(0)))
            .map_err(map_sqlite)?;
        u64::try_from(version).map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("negative version counter {version}"),
        })
    }

    fn upsert_current(&mut self, entity: &Entity) -> StoreResult<()> {
        let encoded = EncodedEntity::encode(entity)?;
        encoded
            .insert(self.tx, Table::Current)
            .map_err(map_sqlite)?;

        self.tx
            .prepare_cached("DELETE FROM entity_labels WHERE key = ?1")
            .and_then(|mut stmt| stmt.execute(params![entity.key]))
            .map_err(map_sqlite)?;
        let mut insert = self
            .tx
            .prepare_cached("INSERT INTO entity_labels (key, label, value) VALUES (?1, ?2, ?3)")
            .map_err(map_sqlite)?;
        for (label, value) in &entity.labels {
            insert
                .execute(params![entity.key, label, value])
                .map_err(map_sqlite)?;
        }
        Ok(())
    }

    fn remove_current(&mut self, key: &str) -> StoreResult<bool> {
        self.tx
            .prepare_cached("DELETE FROM entity_labels WHERE key = ?1")
            .and_then(|mut stmt| stmt.execute(params![key]))
            .map_err(map_sqlite)?;
        let removed = self
            .tx
            .prepare_cached("DELETE FROM entity WHERE key = ?1")
            .and_then(|mut stmt| stmt.execute(params![key]))
            .map_err(map_sqlite)?;
        Ok(removed > 0)
    }

    fn append_history(&mut self, entity: &Entity) -> StoreResult<()> {
        let encoded = EncodedEntity::encode(entity)?;
        match encoded.insert(self.tx, Table::History) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::DuplicateHistory {
                key: entity.key.clone(),
                version: entity.resource_version,
            }),
            Err(e) => Err(map_sqlite(e)),
        }
    }
}

impl EntityBackend for SqliteEntityStore {
    fn write<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn EntityTxn) -> StoreResult<T>,
    {
        let mut connection = self.lock()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqlite)?;
        let result = f(&mut SqliteTxn { tx: &tx });
        match result {
            Ok(value) => {
                tx.commit().map_err(map_sqlite)?;
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "sqlite transaction rolled back");
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    fn read_current(&self, key: &str) -> StoreResult<Option<Entity>> {
        let connection = self.lock()?;
        select_one(
            &connection,
            &format!("SELECT {COLUMNS} FROM entity WHERE key = ?1"),
            params![key],
        )
    }

    fn read_version(&self, key: &str, version: u64) -> StoreResult<Option<Entity>> {
        let Ok(version) = i64::try_from(version) else {
            return Ok(None);
        };
        let connection = self.lock()?;
        select_one(
            &connection,
            &format!(
                "SELECT {COLUMNS} FROM entity_history WHERE key = ?1 AND resource_version = ?2"
            ),
            params![key, version],
        )
    }

    fn history_page(
        &self,
        key: &str,
        after_version: u64,
        limit: usize,
    ) -> StoreResult<Vec<Entity>> {
        let after = i64::try_from(after_version).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let connection = self.lock()?;
        select_many(
            &connection,
            &format!(
                "SELECT {COLUMNS} FROM entity_history
                 WHERE key = ?1 AND resource_version > ?2
                 ORDER BY resource_version ASC LIMIT ?3"
            ),
            vec![
                SqlValue::Text(key.to_string()),
                SqlValue::Integer(after),
                SqlValue::Integer(limit),
            ],
        )
    }

    fn list_current(&self, query: &ListQuery) -> StoreResult<Vec<Entity>> {
        let (sql, args) = list_statement(query);
        let connection = self.lock()?;
        select_many(&connection, &sql, args)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let connection = self.lock()?;
        let count = |table: &str| -> StoreResult<u64> {
            let n: i64 = connection
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(map_sqlite)?;
            Ok(n.max(0) as u64)
        };
        Ok(StoreStats {
            current_rows: count("entity")?,
            history_rows: count("entity_history")?,
            label_rows: count("entity_labels")?,
            version_counters: count("resource_version")?,
        })
    }
}

impl std::fmt::Debug for SqliteEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEntityStore")
            .field("path", &self.path)
            .finish()
    }
}

/// Build the filtered, key-ordered list statement for `query`.
fn list_statement(query: &ListQuery) -> (String, Vec<SqlValue>) {
    let mut sql = format!("SELECT {COLUMNS} FROM entity WHERE 1 = 1");
    let mut args = Vec::new();

    if !query.key_prefixes.is_empty() {
        let clauses: Vec<String> = query
            .key_prefixes
            .iter()
            .map(|prefix| {
                args.push(SqlValue::Text(prefix.clone()));
                let n = args.len();
                // substr comparison avoids LIKE wildcard escaping.
                format!("substr(key, 1, length(?{n})) = ?{n}")
            })
            .collect();
        sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
    }

    if let Some(after) = &query.after_key {
        args.push(SqlValue::Text(after.clone()));
        sql.push_str(&format!(" AND key > ?{}", args.len()));
    }

    for (label, value) in &query.labels {
        args.push(SqlValue::Text(label.clone()));
        let label_n = args.len();
        args.push(SqlValue::Text(value.clone()));
        let value_n = args.len();
        sql.push_str(&format!(
            " AND key IN (SELECT key FROM entity_labels WHERE label = ?{label_n} AND value = ?{value_n})"
        ));
    }

    args.push(SqlValue::Integer(
        i64::try_from(query.limit).unwrap_or(i64::MAX),
    ));
    sql.push_str(&format!(" ORDER BY key ASC LIMIT ?{}", args.len()));
    (sql, args)
}

fn select_one(
    connection: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> StoreResult<Option<Entity>> {
    let row = connection
        .prepare_cached(sql)
        .and_then(|mut stmt| stmt.query_row(args, EntityRow::from_row).optional())
        .map_err(map_sqlite)?;
    row.map(EntityRow::into_entity).transpose()
}

fn select_many(connection: &Connection, sql: &str, args: Vec<SqlValue>) -> StoreResult<Vec<Entity>> {
    let mut stmt = connection.prepare_cached(sql).map_err(map_sqlite)?;
    let rows = stmt
        .query_map(params_from_iter(args), EntityRow::from_row)
        .map_err(map_sqlite)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(map_sqlite)?;
    rows.into_iter().map(EntityRow::into_entity).collect()
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Map a SQLite error onto the store taxonomy. Lock contention is reported
/// as [`StoreError::Busy`]; everything else as [`StoreError::Backend`].
pub(crate) fn map_sqlite(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::Busy(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}
