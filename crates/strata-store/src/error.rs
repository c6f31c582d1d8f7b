/// Errors from entity store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No current row exists for the key.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// A create targeted a key that already has a current row.
    #[error("entity already exists: {key} (resource version {version})")]
    AlreadyExists { key: String, version: u64 },

    /// The caller's expected version no longer matches the current row.
    #[error("version conflict on {key}: expected {expected}, current {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// A history record already exists for this exact `(key, version)`.
    ///
    /// Indicates an allocator bug or a lost update, never a caller mistake.
    #[error("history record already exists for {key} at version {version}")]
    DuplicateHistory { key: String, version: u64 },

    /// The backend is locked by another writer and the wait timed out.
    #[error("store busy: {0}")]
    Busy(String),

    /// Any other failure reported by the backing database.
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization or deserialization of a stored column failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored row cannot be decoded into an entity.
    #[error("corrupt row for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// A lock guarding backend state was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// I/O error while preparing the storage location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` if retrying the same request may succeed.
    ///
    /// Conflicts are retryable after the caller re-reads; transient backend
    /// failures are retryable as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Busy(_) | Self::Backend(_) | Self::Io(_)
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StoreError::Busy("locked".into()).is_retryable());
        assert!(StoreError::Conflict {
            key: "/a/b/c/d".into(),
            expected: 1,
            actual: 2
        }
        .is_retryable());
        assert!(!StoreError::NotFound("/a/b/c/d".into()).is_retryable());
        assert!(!StoreError::DuplicateHistory {
            key: "/a/b/c/d".into(),
            version: 3
        }
        .is_retryable());
    }

    #[test]
    fn display_mentions_key() {
        let err = StoreError::AlreadyExists {
            key: "/a/b/c/d".into(),
            version: 4,
        };
        assert_eq!(
            err.to_string(),
            "entity already exists: /a/b/c/d (resource version 4)"
        );
    }
}
