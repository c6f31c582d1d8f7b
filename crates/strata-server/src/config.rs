use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Storage backend selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// SQLite database file, created on first open.
    Sqlite { path: PathBuf },
    /// Process-local state, lost on exit.
    Memory,
}

/// Configuration for an [`EntityServer`](crate::EntityServer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Upper bound on waiting for another writer's database lock.
    pub busy_timeout_ms: u64,
    /// Page size used when a list request does not set a limit.
    pub default_list_limit: usize,
    /// Largest page a list or history request may ask for.
    pub max_list_limit: usize,
    /// Page size used when a history request does not set a limit.
    pub history_page_size: usize,
    pub backend: BackendConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            default_list_limit: 100,
            max_list_limit: 1_000,
            history_page_size: 100,
            backend: BackendConfig::Sqlite {
                path: PathBuf::from(".strata/strata.db"),
            },
        }
    }
}

impl ServerConfig {
    /// In-memory configuration, mostly for tests.
    pub fn in_memory() -> Self {
        Self {
            backend: BackendConfig::Memory,
            ..Default::default()
        }
    }

    /// Load a configuration from a TOML file. Missing keys take their
    /// default values.
    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> ServerResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Check internal consistency of the limits.
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_list_limit == 0 {
            return Err(ServerError::Config("max_list_limit must be positive".into()));
        }
        if self.default_list_limit == 0 || self.default_list_limit > self.max_list_limit {
            return Err(ServerError::Config(format!(
                "default_list_limit must be between 1 and {}",
                self.max_list_limit
            )));
        }
        if self.history_page_size == 0 || self.history_page_size > self.max_list_limit {
            return Err(ServerError::Config(format!(
                "history_page_size must be between 1 and {}",
                self.max_list_limit
            )));
        }
        Ok(())
    }

    /// Clamp a requested page size; zero selects `default`.
    pub(crate) fn page_limit(&self, requested: usize, default: usize) -> usize {
        match requested {
            0 => default,
            n => n.min(self.max_list_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(
            c.backend,
            BackendConfig::Sqlite {
                path: PathBuf::from(".strata/strata.db")
            }
        );
        assert_eq!(c.busy_timeout_ms, 5_000);
        assert_eq!(c.default_list_limit, 100);
        assert_eq!(c.max_list_limit, 1_000);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ServerConfig::from_toml(
            r#"
            busy_timeout_ms = 250

            [backend]
            kind = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(c.backend, BackendConfig::Memory);
        assert_eq!(c.busy_timeout_ms, 250);
        assert_eq!(c.max_list_limit, 1_000);
    }

    #[test]
    fn toml_round_trip() {
        let c = ServerConfig {
            backend: BackendConfig::Sqlite {
                path: "/var/lib/strata/db".into(),
            },
            max_list_limit: 50,
            default_list_limit: 20,
            history_page_size: 10,
            ..Default::default()
        };
        let text = c.to_toml().unwrap();
        assert_eq!(ServerConfig::from_toml(&text).unwrap(), c);
    }

    #[test]
    fn inconsistent_limits_are_rejected() {
        let err = ServerConfig::from_toml("default_list_limit = 5000").unwrap_err();
        assert!(matches!(err, ServerError::Config(msg) if msg.contains("default_list_limit")));
        assert!(ServerConfig::from_toml("max_list_limit = 0").is_err());
        assert!(ServerConfig::from_toml("history_page_size = 0").is_err());
    }

    #[test]
    fn unparsable_toml_is_config_error() {
        let err = ServerConfig::from_toml("busy_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "history_page_size = 7\n").unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap().history_page_size, 7);
        assert!(matches!(
            ServerConfig::load(dir.path().join("missing.toml")),
            Err(ServerError::Io(_))
        ));
    }

    #[test]
    fn page_limit_clamps() {
        let c = ServerConfig::default();
        assert_eq!(c.page_limit(0, 100), 100);
        assert_eq!(c.page_limit(5, 100), 5);
        assert_eq!(c.page_limit(50_000, 100), 1_000);
    }
}
