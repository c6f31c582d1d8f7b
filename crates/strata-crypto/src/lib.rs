//! Content hashing for Strata.
//!
//! Provides domain-separated BLAKE3 hashing and the ETag computation used to
//! tag every stored entity revision. The tag depends only on the entity's
//! body, meta and status documents, so any reader can re-derive it from those
//! three fields without consulting version metadata.
//!
//! All hashing wraps an established library; there is no custom cryptography.

pub mod hasher;

pub use hasher::{canonical_document, ContentHasher};
