//! Layered configuration.
//!
//! Values are merged in order, later sources winning:
//! 1. Built-in defaults.
//! 2. A TOML file (`rove.toml` in the platform config directory, or an
//!    explicit path).
//! 3. Environment variables prefixed with `ROVE_`, using `__` between
//!    section and key: `ROVE_DISCOVERY__MAX_DEPTH=5`.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const FILE_NAME: &str = "rove.toml";
const ENV_PREFIX: &str = "ROVE_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "rove", "rove")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding records, checkpoints and persistent cache entries.
    pub path: PathBuf,
    /// Ignore `path` and keep everything in memory.
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = project_dirs()
            .map(|dirs| dirs.data_dir().join("rove.db"))
            .unwrap_or_else(|| PathBuf::from("rove.db"));
        Self { path, in_memory: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_depth: u32,
    /// Listing calls in flight at once, shared by every library.
    pub concurrency: usize,
    pub page_size: u32,
    pub batch_size: usize,
    pub max_queue_depth: usize,
    pub library_concurrency: usize,
    pub checkpoint_every_items: u64,
    pub checkpoint_every_secs: u64,
    pub max_consecutive_batch_failures: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            concurrency: 50,
            page_size: 200,
            batch_size: 100,
            max_queue_depth: 10_000,
            library_concurrency: 4,
            checkpoint_every_items: 100,
            checkpoint_every_secs: 60,
            max_consecutive_batch_failures: 3,
        }
    }
}

impl DiscoveryConfig {
    pub fn checkpoint_every(&self) -> Duration {
        Duration::from_secs(self.checkpoint_every_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub flush_interval_secs: u64,
    pub batch_size: usize,
    pub retention_days: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { flush_interval_secs: 30, batch_size: 50, retention_days: 30 }
    }
}

impl CheckpointConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub namespace: String,
    pub max_size: usize,
    pub default_ttl_secs: u64,
    /// Back the in-process cache with the database.
    pub persistent: bool,
    /// Per-call limit for the slower (database-backed) tier.
    pub tier_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "rove".to_string(),
            max_size: 10_000,
            default_ttl_secs: 3600,
            persistent: true,
            tier_timeout_secs: 5,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn tier_timeout(&self) -> Duration {
        Duration::from_secs(self.tier_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub discovery: DiscoveryConfig,
    pub checkpoint: CheckpointConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// `rove.toml` in the platform config directory, if one can be determined.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(FILE_NAME))
    }

    /// The merged providers, before extraction.
    pub fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = match file {
            Some(file) => figment.merge(Toml::file(file)),
            None => figment,
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from the default file location (if it exists) and the environment.
    pub fn load() -> Result<Self> {
        let path = Self::default_path().filter(|path| path.is_file());
        Self::extract(path.as_deref())
    }

    /// Load from an explicit file, which must exist, and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.display().to_string()));
        }
        Self::extract(Some(path))
    }

    fn extract(file: Option<&Path>) -> Result<Self> {
        tracing::debug!(file = ?file, "loading configuration");
        let config: Config = Self::figment(file).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let discovery = &self.discovery;
        let checks: [(bool, &'static str); 14] = [
            (discovery.max_depth > 0, "discovery.max_depth"),
            (discovery.concurrency > 0, "discovery.concurrency"),
            (discovery.page_size > 0, "discovery.page_size"),
            (discovery.batch_size > 0, "discovery.batch_size"),
            (discovery.max_queue_depth > 0, "discovery.max_queue_depth"),
            (discovery.library_concurrency > 0, "discovery.library_concurrency"),
            (discovery.checkpoint_every_items > 0, "discovery.checkpoint_every_items"),
            (discovery.checkpoint_every_secs > 0, "discovery.checkpoint_every_secs"),
            (discovery.max_consecutive_batch_failures > 0, "discovery.max_consecutive_batch_failures"),
            (self.checkpoint.flush_interval_secs > 0, "checkpoint.flush_interval_secs"),
            (self.checkpoint.batch_size > 0, "checkpoint.batch_size"),
            (self.cache.max_size > 0, "cache.max_size"),
            (self.cache.default_ttl_secs > 0, "cache.default_ttl_secs"),
            (self.cache.tier_timeout_secs > 0, "cache.tier_timeout_secs"),
        ];
        if let Some((_, field)) = checks.iter().find(|(ok, _)| !ok) {
            exn::bail!(ErrorKind::Invalid(*field));
        }
        if self.cache.namespace.is_empty() {
            exn::bail!(ErrorKind::Invalid("cache.namespace"));
        }
        if self.checkpoint.retention_days == 0 {
            exn::bail!(ErrorKind::Invalid("checkpoint.retention_days"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.discovery.max_depth, 10);
        assert_eq!(config.discovery.batch_size, 100);
        assert_eq!(config.checkpoint.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.checkpoint.retention(), Duration::from_secs(30 * 86_400));
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("rove.toml", "[discovery]\nmax_depth = 4\n\n[cache]\npersistent = false")?;
            let config = Config::load_from("rove.toml").unwrap();
            assert_eq!(config.discovery.max_depth, 4);
            assert!(!config.cache.persistent);
            // Untouched keys keep their defaults.
            assert_eq!(config.discovery.concurrency, 50);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("rove.toml", "[discovery]\nmax_depth = 4\nconcurrency = 8")?;
            jail.set_env("ROVE_DISCOVERY__MAX_DEPTH", "6");
            jail.set_env("ROVE_CACHE__NAMESPACE", "tenant-a");
            let config = Config::load_from("rove.toml").unwrap();
            assert_eq!(config.discovery.max_depth, 6);
            assert_eq!(config.discovery.concurrency, 8);
            assert_eq!(config.cache.namespace, "tenant-a");
            Ok(())
        });
    }

    #[test]
    fn test_wrong_type_is_load_error() {
        Jail::expect_with(|jail| {
            jail.create_file("rove.toml", "[discovery]\nmax_depth = \"deep\"")?;
            let err = Config::load_from("rove.toml").unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }

    #[rstest]
    #[case::depth("[discovery]\nmax_depth = 0", "discovery.max_depth")]
    #[case::batch("[discovery]\nbatch_size = 0", "discovery.batch_size")]
    #[case::flush("[checkpoint]\nflush_interval_secs = 0", "checkpoint.flush_interval_secs")]
    #[case::cache("[cache]\nmax_size = 0", "cache.max_size")]
    #[case::namespace("[cache]\nnamespace = \"\"", "cache.namespace")]
    #[case::tier_timeout("[cache]\ntier_timeout_secs = 0", "cache.tier_timeout_secs")]
    fn test_zero_values_rejected(#[case] toml: &str, #[case] field: &str) {
        Jail::expect_with(|jail| {
            jail.create_file("rove.toml", toml)?;
            let err = Config::load_from("rove.toml").unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(name) if *name == field));
            Ok(())
        });
    }
}
