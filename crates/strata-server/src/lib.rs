//! Entity storage server for Strata.
//!
//! [`EntityServer`] turns typed requests into validated, versioned writes
//! against a [`strata_store::EntityBackend`]:
//!
//! 1. **Validation** -- key shape, key/component agreement and provenance
//!    are checked before any storage work ([`validation`]).
//! 2. **Tagging** -- the ETag, size and derived fields are computed from the
//!    payload.
//! 3. **Transaction** -- version allocation, the history append and the
//!    current-state write commit together or not at all.
//!
//! Failures carry a [`StatusCode`] and a retryability flag; the response
//! types can also report them in-band.

pub mod backend;
pub mod config;
pub mod error;
pub mod request;
pub mod server;
pub mod validation;

pub use backend::ConfiguredBackend;
pub use config::{BackendConfig, ServerConfig};
pub use error::{ServerError, ServerResult, StatusCode};
pub use request::{
    CreateEntityRequest, CreateEntityResponse, CreateStatus, DeleteEntityRequest,
    DeleteEntityResponse, DeleteStatus, EntityHistoryRequest, EntityHistoryResponse,
    EntityListRequest, EntityListResponse, ErrorResult, ReadEntityRequest, UpdateEntityRequest,
    UpdateEntityResponse, UpdateStatus,
};
pub use server::{EntityServer, EntityStoreService};
pub use validation::{validate_create, validate_key, validate_update, ValidationError, Violation};
