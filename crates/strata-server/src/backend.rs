use strata_store::{
    EntityBackend, EntityTxn, InMemoryEntityStore, ListQuery, SqliteEntityStore, SqliteOptions,
    StoreResult, StoreStats,
};
use strata_types::Entity;
use tracing::info;

use crate::config::{BackendConfig, ServerConfig};
use crate::error::ServerResult;

/// The backend chosen by a [`ServerConfig`].
#[derive(Debug)]
pub enum ConfiguredBackend {
    Sqlite(SqliteEntityStore),
    Memory(InMemoryEntityStore),
}

impl ConfiguredBackend {
    /// Open the backend described by `config`.
    pub fn open(config: &ServerConfig) -> ServerResult<Self> {
        match &config.backend {
            BackendConfig::Sqlite { path } => {
                let options = SqliteOptions {
                    busy_timeout_ms: config.busy_timeout_ms,
                    ..Default::default()
                };
                let store = SqliteEntityStore::open(path, &options)?;
                info!(path = %path.display(), "opened sqlite backend");
                Ok(Self::Sqlite(store))
            }
            BackendConfig::Memory => {
                info!("using in-memory backend");
                Ok(Self::Memory(InMemoryEntityStore::new()))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Memory(_) => "memory",
        }
    }
}

impl EntityBackend for ConfiguredBackend {
    fn write<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn EntityTxn) -> StoreResult<T>,
    {
        match self {
            Self::Sqlite(s) => s.write(f),
            Self::Memory(m) => m.write(f),
        }
    }

    fn read_current(&self, key: &str) -> StoreResult<Option<Entity>> {
        match self {
            Self::Sqlite(s) => s.read_current(key),
            Self::Memory(m) => m.read_current(key),
        }
    }

    fn read_version(&self, key: &str, version: u64) -> StoreResult<Option<Entity>> {
        match self {
            Self::Sqlite(s) => s.read_version(key, version),
            Self::Memory(m) => m.read_version(key, version),
        }
    }

    fn history_page(
        &self,
        key: &str,
        after_version: u64,
        limit: usize,
    ) -> StoreResult<Vec<Entity>> {
        match self {
            Self::Sqlite(s) => s.history_page(key, after_version, limit),
            Self::Memory(m) => m.history_page(key, after_version, limit),
        }
    }

    fn list_current(&self, query: &ListQuery) -> StoreResult<Vec<Entity>> {
        match self {
            Self::Sqlite(s) => s.list_current(query),
            Self::Memory(m) => m.list_current(query),
        }
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        match self {
            Self::Sqlite(s) => s.stats(),
            Self::Memory(m) => m.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_memory_backend() {
        let backend = ConfiguredBackend::open(&ServerConfig::in_memory()).unwrap();
        assert_eq!(backend.kind(), "memory");
        assert_eq!(backend.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn opens_sqlite_backend_creating_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("strata.db");
        let config = ServerConfig {
            backend: BackendConfig::Sqlite { path: path.clone() },
            ..Default::default()
        };
        let backend = ConfiguredBackend::open(&config).unwrap();
        assert_eq!(backend.kind(), "sqlite");
        assert!(path.exists());
    }
}
