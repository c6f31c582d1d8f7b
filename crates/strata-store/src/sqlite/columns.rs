//! Explicit mapping between [`Entity`] fields and table columns.
//!
//! Both entity tables share one column layout. Structured fields (`origin`,
//! `labels`, `fields`, `errors`) are stored as JSON text; payload documents
//! as blobs; the ETag as hex.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, Row};
use strata_types::{Action, ETag, Entity, EntityErrorInfo, EntityOriginInfo, Guid};

use crate::error::{StoreError, StoreResult};

/// Column list in the order read by [`EntityRow::from_row`].
pub const COLUMNS: &str = "guid, resource_version, key, \"group\", resource, namespace, name, \
    subresource, group_version, origin, folder, meta, body, status, title, description, slug, \
    message, labels, fields, errors, size, etag, created_at, created_by, updated_at, updated_by, \
    action";

const PLACEHOLDERS: &str = "?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
    ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28";

/// The two tables sharing the entity layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Table {
    Current,
    History,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Self::Current => "entity",
            Self::History => "entity_history",
        }
    }
}

/// An entity with its structured fields pre-encoded for binding.
pub struct EncodedEntity<'a> {
    entity: &'a Entity,
    resource_version: i64,
    size: i64,
    origin: Option<String>,
    labels: String,
    fields: String,
    errors: String,
}

impl<'a> EncodedEntity<'a> {
    pub fn encode(entity: &'a Entity) -> StoreResult<Self> {
        let resource_version = to_i64(&entity.key, "resource_version", entity.resource_version)?;
        let size = to_i64(&entity.key, "size", entity.size)?;
        Ok(Self {
            entity,
            resource_version,
            size,
            origin: entity.origin.as_ref().map(to_json).transpose()?,
            labels: to_json(&entity.labels)?,
            fields: to_json(&entity.fields)?,
            errors: to_json(&entity.errors)?,
        })
    }

    /// Insert into `table`. For the current-state table an existing row for
    /// the key is replaced entirely.
    pub fn insert(&self, connection: &Connection, table: Table) -> rusqlite::Result<usize> {
        let verb = match table {
            Table::Current => "INSERT OR REPLACE",
            Table::History => "INSERT",
        };
        let sql = format!(
            "{verb} INTO {} ({COLUMNS}) VALUES ({PLACEHOLDERS})",
            table.name()
        );
        let e = self.entity;
        connection.prepare_cached(&sql)?.execute(params![
            e.guid.as_str(),
            self.resource_version,
            e.key,
            e.group,
            e.resource,
            e.namespace,
            e.name,
            e.subresource,
            e.group_version,
            self.origin,
            e.folder,
            e.meta,
            e.body,
            e.status,
            e.title,
            e.description,
            e.slug,
            e.message,
            self.labels,
            self.fields,
            self.errors,
            self.size,
            e.etag.to_hex(),
            e.created_at,
            e.created_by,
            e.updated_at,
            e.updated_by,
            e.action.as_str(),
        ])
    }
}

/// Raw column values of one entity row.
pub struct EntityRow {
    guid: String,
    resource_version: i64,
    key: String,
    group: String,
    resource: String,
    namespace: String,
    name: String,
    subresource: String,
    group_version: String,
    origin: Option<String>,
    folder: String,
    meta: Vec<u8>,
    body: Vec<u8>,
    status: Vec<u8>,
    title: String,
    description: String,
    slug: String,
    message: String,
    labels: String,
    fields: String,
    errors: String,
    size: i64,
    etag: String,
    created_at: i64,
    created_by: String,
    updated_at: i64,
    updated_by: String,
    action: String,
}

impl EntityRow {
    /// Read a row selected with [`COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            guid: row.get(0)?,
            resource_version: row.get(1)?,
            key: row.get(2)?,
            group: row.get(3)?,
            resource: row.get(4)?,
            namespace: row.get(5)?,
            name: row.get(6)?,
            subresource: row.get(7)?,
            group_version: row.get(8)?,
            origin: row.get(9)?,
            folder: row.get(10)?,
            meta: row.get(11)?,
            body: row.get(12)?,
            status: row.get(13)?,
            title: row.get(14)?,
            description: row.get(15)?,
            slug: row.get(16)?,
            message: row.get(17)?,
            labels: row.get(18)?,
            fields: row.get(19)?,
            errors: row.get(20)?,
            size: row.get(21)?,
            etag: row.get(22)?,
            created_at: row.get(23)?,
            created_by: row.get(24)?,
            updated_at: row.get(25)?,
            updated_by: row.get(26)?,
            action: row.get(27)?,
        })
    }

    /// Decode the structured columns into an [`Entity`].
    pub fn into_entity(self) -> StoreResult<Entity> {
        let key = self.key;
        let corrupt = |reason: String| StoreError::Corrupt {
            key: key.clone(),
            reason,
        };

        let resource_version = u64::try_from(self.resource_version)
            .map_err(|_| corrupt(format!("negative resource_version {}", self.resource_version)))?;
        let size = u64::try_from(self.size)
            .map_err(|_| corrupt(format!("negative size {}", self.size)))?;
        let etag = ETag::from_hex(&self.etag).map_err(|e| corrupt(format!("etag: {e}")))?;
        let action: Action = self
            .action
            .parse()
            .map_err(|e| corrupt(format!("action: {e}")))?;
        let origin: Option<EntityOriginInfo> = self
            .origin
            .as_deref()
            .map(|s| from_json(s, "origin"))
            .transpose()
            .map_err(&corrupt)?;
        let labels: BTreeMap<String, String> =
            from_json(&self.labels, "labels").map_err(&corrupt)?;
        let fields: BTreeMap<String, String> =
            from_json(&self.fields, "fields").map_err(&corrupt)?;
        let errors: Vec<EntityErrorInfo> =
            from_json(&self.errors, "errors").map_err(&corrupt)?;

        Ok(Entity {
            guid: Guid::from_string(self.guid),
            resource_version,
            key,
            group: self.group,
            resource: self.resource,
            namespace: self.namespace,
            name: self.name,
            subresource: self.subresource,
            group_version: self.group_version,
            origin,
            folder: self.folder,
            meta: self.meta,
            body: self.body,
            status: self.status,
            title: self.title,
            description: self.description,
            slug: self.slug,
            message: self.message,
            labels,
            fields,
            errors,
            size,
            etag,
            created_at: self.created_at,
            created_by: self.created_by,
            updated_at: self.updated_at,
            updated_by: self.updated_by,
            action,
        })
    }
}

fn to_i64(key: &str, column: &str, value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!(
        "{column} {value} of {key} exceeds the column range"
    )))
}

fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str, column: &str) -> Result<T, String> {
    serde_json::from_str(text).map_err(|e| format!("{column}: {e}"))
}
