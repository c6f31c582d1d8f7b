//! Foundation types for Strata.
//!
//! This crate provides the entity model shared by every other Strata crate:
//! the stored record itself, the hierarchical key that addresses it, and the
//! content tag computed over its payload.
//!
//! # Key Types
//!
//! - [`Entity`] -- A stored, versioned resource and every field persisted for it
//! - [`EntityKey`] -- Parsed `/{group}/{resource}/{namespace}/{name}[/{subresource}]` path
//! - [`ETag`] -- Content digest over body, meta and status
//! - [`Guid`] -- UUID v7 lineage identifier assigned on create
//! - [`Action`] -- The kind of write that produced a revision

pub mod document;
pub mod entity;
pub mod error;
pub mod etag;
pub mod key;
pub mod time;

pub use entity::{derive_fields, Action, Entity, EntityErrorInfo, EntityOriginInfo, Guid};
pub use error::TypeError;
pub use etag::ETag;
pub use key::EntityKey;
pub use time::now_millis;
