//! Store configuration.
//!
//! Every field has a default, so an empty YAML document is a valid config.
//!
//! ```yaml
//! storage:
//!   path: ./excel-files
//!   max_versions: 5
//! lock:
//!   kind: distributed
//!   redis_url: redis://cache:6379/
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `storage.path`.
pub const ENV_STORAGE_PATH: &str = "SHEETSTORE_STORAGE_PATH";
/// Environment variable overriding `lock.kind`.
pub const ENV_LOCK_KIND: &str = "SHEETSTORE_LOCK_KIND";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub storage: StorageConfig,
    pub lock: LockConfig,
    pub calculation: CalculationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for documents.
    pub path: PathBuf,
    /// Snapshot directory, relative to `path`.
    pub backup_dir: String,
    pub version_control: bool,
    /// Snapshots kept per document.
    pub max_versions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./excel-files"),
            backup_dir: "backups".to_string(),
            version_control: true,
            max_versions: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    #[default]
    Local,
    #[serde(alias = "redis")]
    Distributed,
}

impl std::str::FromStr for LockBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(LockBackend::Local),
            "distributed" | "redis" => Ok(LockBackend::Distributed),
            other => Err(ConfigError::Invalid {
                field: "lock.kind",
                reason: format!("unknown lock kind '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub kind: LockBackend,
    /// Wait budget for every acquisition.
    pub wait_time_ms: u64,
    /// Distributed only: how long a grant lives without release.
    pub lease_ms: u64,
    pub poll_interval_ms: u64,
    pub redis_url: String,
    /// Bounds connecting to Redis and each round trip.
    pub redis_timeout_ms: u64,
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            kind: LockBackend::Local,
            wait_time_ms: 10_000,
            lease_ms: 30_000,
            poll_interval_ms: 50,
            redis_url: "redis://127.0.0.1/".to_string(),
            redis_timeout_ms: 2_000,
            key_prefix: "sheetstore:lock".to_string(),
        }
    }
}

impl LockConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }
}

/// Advisory concurrency limits. Lock fairness enforces them; they are
/// validated and logged at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculationConfig {
    pub max_concurrent_reads: usize,
    pub max_concurrent_writes: usize,
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reads: 50,
            max_concurrent_writes: 1,
        }
    }
}

impl StoreConfig {
    /// Load from a YAML file (or defaults when `path` is `None`), apply
    /// environment overrides, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::parse_yaml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML. Environment overrides are not applied.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_yaml(text)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply overrides looked up through `var`.
    pub fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = var(ENV_STORAGE_PATH).filter(|p| !p.trim().is_empty()) {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(kind) = var(ENV_LOCK_KIND).filter(|k| !k.trim().is_empty()) {
            self.lock.kind = kind.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if self.storage.path.as_os_str().is_empty() {
            return Err(invalid("storage.path", "must not be empty"));
        }
        let backup_dir = Path::new(&self.storage.backup_dir);
        if self.storage.backup_dir.trim().is_empty()
            || !backup_dir
                .components()
                .all(|c| matches!(c, std::path::Component::Normal(_)))
        {
            return Err(invalid(
                "storage.backup_dir",
                "must be a relative directory inside storage.path",
            ));
        }
        if self.storage.version_control && self.storage.max_versions == 0 {
            return Err(invalid("storage.max_versions", "must be at least 1"));
        }
        if self.lock.poll_interval_ms == 0 {
            return Err(invalid("lock.poll_interval_ms", "must be at least 1"));
        }
        if self.lock.kind == LockBackend::Distributed {
            if self.lock.lease_ms == 0 {
                return Err(invalid("lock.lease_ms", "must be at least 1"));
            }
            if self.lock.redis_url.trim().is_empty() {
                return Err(invalid("lock.redis_url", "must not be empty"));
            }
            if self.lock.redis_timeout_ms == 0 {
                return Err(invalid("lock.redis_timeout_ms", "must be at least 1"));
            }
        }
        if self.calculation.max_concurrent_reads == 0 {
            return Err(invalid("calculation.max_concurrent_reads", "must be at least 1"));
        }
        if self.calculation.max_concurrent_writes == 0 {
            return Err(invalid("calculation.max_concurrent_writes", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.storage.path, PathBuf::from("./excel-files"));
        assert_eq!(config.storage.backup_dir, "backups");
        assert!(config.storage.version_control);
        assert_eq!(config.storage.max_versions, 10);
        assert_eq!(config.lock.kind, LockBackend::Local);
        assert_eq!(config.lock.wait_time(), Duration::from_secs(10));
        assert_eq!(config.lock.lease(), Duration::from_secs(30));
        assert_eq!(config.calculation.max_concurrent_reads, 50);
        assert_eq!(config.calculation.max_concurrent_writes, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(StoreConfig::from_yaml_str("").unwrap(), StoreConfig::default());
        assert_eq!(StoreConfig::from_yaml_str("{}").unwrap(), StoreConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let config = StoreConfig::from_yaml_str(
            "storage:\n  path: /srv/docs\n  max_versions: 3\nlock:\n  kind: redis\n  wait_time_ms: 500\n",
        )
        .unwrap();
        assert_eq!(config.storage.path, PathBuf::from("/srv/docs"));
        assert_eq!(config.storage.max_versions, 3);
        assert_eq!(config.storage.backup_dir, "backups");
        assert_eq!(config.lock.kind, LockBackend::Distributed);
        assert_eq!(config.lock.wait_time(), Duration::from_millis(500));
        assert_eq!(config.lock.key_prefix, "sheetstore:lock");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            StoreConfig::from_yaml_str("storage:\n  max_versions: 0\n"),
            Err(ConfigError::Invalid { field: "storage.max_versions", .. })
        ));
        assert!(matches!(
            StoreConfig::from_yaml_str("storage:\n  backup_dir: ../elsewhere\n"),
            Err(ConfigError::Invalid { field: "storage.backup_dir", .. })
        ));
        assert!(matches!(
            StoreConfig::from_yaml_str("lock:\n  kind: zookeeper\n"),
            Err(ConfigError::Parse(_))
        ));
        // Retention is irrelevant when version control is off.
        assert!(StoreConfig::from_yaml_str(
            "storage:\n  version_control: false\n  max_versions: 0\n"
        )
        .is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = StoreConfig::default();
        config
            .apply_env(|key| match key {
                ENV_STORAGE_PATH => Some("/data".to_string()),
                ENV_LOCK_KIND => Some("Distributed".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.storage.path, PathBuf::from("/data"));
        assert_eq!(config.lock.kind, LockBackend::Distributed);

        let err = config
            .apply_env(|key| (key == ENV_LOCK_KIND).then(|| "carrier-pigeon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "lock.kind", .. }));
    }
}
