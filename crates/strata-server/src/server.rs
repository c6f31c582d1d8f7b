use std::sync::Arc;

use async_trait::async_trait;
use strata_crypto::ContentHasher;
use strata_store::{transition, EntityBackend, ListQuery, StoreError, StoreResult, StoreStats};
use strata_types::{derive_fields, now_millis, Action, Entity, EntityKey, Guid};
use tracing::{debug, info, warn};

use crate::backend::ConfiguredBackend;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::request::{
    page_token, CreateEntityRequest, CreateEntityResponse, DeleteEntityRequest,
    DeleteEntityResponse, DeleteStatus, EntityHistoryRequest, EntityHistoryResponse,
    EntityListRequest, EntityListResponse, ReadEntityRequest, UpdateEntityRequest,
    UpdateEntityResponse, UpdateStatus,
};
use crate::validation::{validate_create, validate_key, validate_update};

/// Typed entity storage operations.
///
/// Transports that report failures in-band turn an `Err` into a response
/// with the `from_error` constructors of the response types.
#[async_trait]
pub trait EntityStoreService: Send + Sync {
    /// Create the first revision of a key.
    async fn create(&self, request: CreateEntityRequest) -> ServerResult<CreateEntityResponse>;

    /// Read the current revision, or the one at `request.resource_version`.
    async fn read(&self, request: ReadEntityRequest) -> ServerResult<Entity>;

    /// Read exactly the revision recorded at `version`.
    async fn read_at_version(&self, key: &str, version: u64) -> ServerResult<Entity>;

    /// Write a new revision over the current one.
    async fn update(&self, request: UpdateEntityRequest) -> ServerResult<UpdateEntityResponse>;

    /// Remove the current revision, recording a tombstone.
    async fn delete(&self, request: DeleteEntityRequest) -> ServerResult<DeleteEntityResponse>;

    /// List current entities by key prefix and labels.
    async fn list(&self, request: EntityListRequest) -> ServerResult<EntityListResponse>;

    /// Page through the recorded revisions of a key.
    async fn history(&self, request: EntityHistoryRequest) -> ServerResult<EntityHistoryResponse>;

    /// Row counts of the underlying tables.
    async fn stats(&self) -> ServerResult<StoreStats>;
}

/// Entity storage server over a transactional backend.
///
/// Validation and hashing happen on the calling task. Each storage phase runs
/// as one backend transaction on the blocking pool, so a dropped request
/// future never leaves a partial write behind.
pub struct EntityServer<B> {
    backend: Arc<B>,
    config: ServerConfig,
}

impl EntityServer<ConfiguredBackend> {
    /// Open the backend named in `config` and serve from it.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let backend = ConfiguredBackend::open(&config)?;
        Ok(Self::new(Arc::new(backend), config))
    }
}

impl<B: EntityBackend + 'static> EntityServer<B> {
    pub fn new(backend: Arc<B>, config: ServerConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    async fn blocking<T, F>(&self, f: F) -> ServerResult<T>
    where
        F: FnOnce(&B) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let result = tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(|e| ServerError::Internal(format!("storage task failed: {e}")))?;
        result.map_err(|e| {
            if matches!(e, StoreError::Conflict { .. }) {
                warn!(error = %e, "write conflict");
            }
            ServerError::from(e)
        })
    }
}

/// Fill the server-derived payload fields of an incoming entity.
fn prepare_payload(entity: &mut Entity, key: &EntityKey) {
    entity.set_key_components(key);
    entity.size = entity.body.len() as u64;
    entity.fields = derive_fields(&entity.body);
    entity.etag = ContentHasher::ETAG.entity_etag(entity);
}

fn project(mut entity: Entity, with_body: bool, with_status: bool) -> Entity {
    if !with_body {
        entity.body.clear();
    }
    if !with_status {
        entity.status.clear();
    }
    entity
}

#[async_trait]
impl<B: EntityBackend + 'static> EntityStoreService for EntityServer<B> {
    async fn create(&self, request: CreateEntityRequest) -> ServerResult<CreateEntityResponse> {
        let key = validate_create(&request.entity)?;

        let now = now_millis();
        let mut entity = request.entity;
        prepare_payload(&mut entity, &key);
        entity.guid = Guid::generate();
        entity.created_at = now;
        if entity.updated_at == 0 {
            entity.updated_at = now;
        }
        if entity.updated_by.trim().is_empty() {
            entity.updated_by = entity.created_by.clone();
        }
        entity.action = Action::Created;

        let created = self
            .blocking(move |backend| {
                let written = backend.write(|txn| transition::create(txn, entity))?;
                backend
                    .read_version(&written.key, written.resource_version)?
                    .ok_or(StoreError::NotFound(written.key))
            })
            .await?;

        info!(
            key = %created.key,
            version = created.resource_version,
            etag = %created.etag.short_hex(),
            "entity created"
        );
        Ok(CreateEntityResponse::created(created))
    }

    async fn read(&self, request: ReadEntityRequest) -> ServerResult<Entity> {
        validate_key(&request.key)?;
        let key = request.key;
        let version = request.resource_version;
        debug!(key = %key, version = ?version, "read");

        let found = self
            .blocking(move |backend| {
                let found = match version {
                    Some(v) => backend.read_version(&key, v)?,
                    None => backend.read_current(&key)?,
                };
                found.ok_or(StoreError::NotFound(key))
            })
            .await?;
        Ok(project(found, request.with_body, request.with_status))
    }

    async fn read_at_version(&self, key: &str, version: u64) -> ServerResult<Entity> {
        self.read(ReadEntityRequest::new(key).at_version(version))
            .await
    }

    async fn update(&self, request: UpdateEntityRequest) -> ServerResult<UpdateEntityResponse> {
        let key = validate_update(&request.entity)?;

        let mut entity = request.entity;
        prepare_payload(&mut entity, &key);
        entity.updated_at = now_millis();
        let expected = request.expected_version;

        let outcome = self
            .blocking(move |backend| backend.write(|txn| transition::update(txn, entity, expected)))
            .await?;

        let status = if outcome.is_unchanged() {
            debug!(key = %outcome.entity().key, "update left entity unchanged");
            UpdateStatus::Unchanged
        } else {
            info!(
                key = %outcome.entity().key,
                version = outcome.entity().resource_version,
                etag = %outcome.entity().etag.short_hex(),
                "entity updated"
            );
            UpdateStatus::Updated
        };
        Ok(UpdateEntityResponse {
            status,
            entity: Some(outcome.into_entity()),
            error: None,
        })
    }

    async fn delete(&self, request: DeleteEntityRequest) -> ServerResult<DeleteEntityResponse> {
        validate_key(&request.key)?;
        let DeleteEntityRequest {
            key,
            expected_version,
            deleted_by,
        } = request;
        let now = now_millis();

        let tombstone = self
            .blocking(move |backend| {
                backend.write(|txn| {
                    transition::delete(txn, &key, expected_version, now, &deleted_by)
                })
            })
            .await?;

        info!(
            key = %tombstone.key,
            version = tombstone.resource_version,
            "entity deleted"
        );
        Ok(DeleteEntityResponse {
            status: DeleteStatus::Deleted,
            entity: Some(tombstone),
            error: None,
        })
    }

    async fn list(&self, request: EntityListRequest) -> ServerResult<EntityListResponse> {
        let limit = self
            .config
            .page_limit(request.limit, self.config.default_list_limit);
        let query = ListQuery {
            key_prefixes: request.key_prefixes,
            labels: request.labels,
            after_key: page_token::decode_key(&request.next_page_token)?,
            limit: limit + 1,
        };
        debug!(prefixes = ?query.key_prefixes, limit, "list");

        let mut results = self
            .blocking(move |backend| backend.list_current(&query))
            .await?;

        let next_page_token = if results.len() > limit {
            results.truncate(limit);
            results
                .last()
                .map(|e| page_token::encode_key(&e.key))
                .unwrap_or_default()
        } else {
            String::new()
        };
        let results = results
            .into_iter()
            .map(|e| project(e, request.with_body, request.with_status))
            .collect();
        Ok(EntityListResponse {
            results,
            next_page_token,
        })
    }

    async fn history(&self, request: EntityHistoryRequest) -> ServerResult<EntityHistoryResponse> {
        validate_key(&request.key)?;
        let limit = self
            .config
            .page_limit(request.limit, self.config.history_page_size);
        let after = page_token::decode_version(&request.next_page_token)?;
        let key = request.key;
        debug!(key = %key, after, limit, "history");

        let lookup = key.clone();
        let mut versions = self
            .blocking(move |backend| backend.history_page(&lookup, after, limit + 1))
            .await?;

        let next_page_token = if versions.len() > limit {
            versions.truncate(limit);
            versions
                .last()
                .map(|e| page_token::encode_version(e.resource_version))
                .unwrap_or_default()
        } else {
            String::new()
        };
        Ok(EntityHistoryResponse {
            key,
            versions,
            next_page_token,
        })
    }

    async fn stats(&self) -> ServerResult<StoreStats> {
        self.blocking(|backend| backend.stats()).await
    }
}

impl<B> std::fmt::Debug for EntityServer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityServer")
            .field("config", &self.config)
            .finish()
    }
}
