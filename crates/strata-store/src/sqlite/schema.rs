use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};

use super::map_sqlite;

/// Schema version recorded in `store_meta`.
pub const SCHEMA_VERSION: i64 = 1;

/// Column definitions shared by the current-state and history tables.
const ENTITY_COLUMNS: &str = "
    guid TEXT NOT NULL,
    resource_version INTEGER NOT NULL,
    key TEXT NOT NULL,
    \"group\" TEXT NOT NULL,
    resource TEXT NOT NULL,
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    subresource TEXT NOT NULL,
    group_version TEXT NOT NULL,
    origin TEXT,
    folder TEXT NOT NULL,
    meta BLOB NOT NULL,
    body BLOB NOT NULL,
    status BLOB NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    slug TEXT NOT NULL,
    message TEXT NOT NULL,
    labels TEXT NOT NULL,
    fields TEXT NOT NULL,
    errors TEXT NOT NULL,
    size INTEGER NOT NULL,
    etag TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    updated_by TEXT NOT NULL,
    action TEXT NOT NULL";

/// Create the schema on a fresh database or validate an existing one.
pub fn initialize(connection: &mut Connection) -> StoreResult<()> {
    let tx = connection.transaction().map_err(map_sqlite)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(map_sqlite)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| {
            row.get(0)
        })
        .optional()
        .map_err(map_sqlite)?;

    match version {
        None => {
            tx.execute(
                "INSERT INTO store_meta (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )
            .map_err(map_sqlite)?;
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS entity (
                    {ENTITY_COLUMNS},
                    PRIMARY KEY (key)
                );
                CREATE INDEX IF NOT EXISTS idx_entity_guid ON entity (guid);
                CREATE INDEX IF NOT EXISTS idx_entity_folder ON entity (folder);
                CREATE TABLE IF NOT EXISTS entity_history (
                    {ENTITY_COLUMNS},
                    PRIMARY KEY (key, resource_version)
                );
                CREATE INDEX IF NOT EXISTS idx_entity_history_guid ON entity_history (guid);
                CREATE TABLE IF NOT EXISTS entity_labels (
                    key TEXT NOT NULL,
                    label TEXT NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (key, label)
                );
                CREATE INDEX IF NOT EXISTS idx_entity_labels_label
                    ON entity_labels (label, value);
                CREATE TABLE IF NOT EXISTS resource_version (
                    key TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    PRIMARY KEY (key)
                );"
            ))
            .map_err(map_sqlite)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(StoreError::Backend(format!(
                "unsupported schema version: {value}"
            )));
        }
    }

    tx.commit().map_err(map_sqlite)?;
    Ok(())
}
