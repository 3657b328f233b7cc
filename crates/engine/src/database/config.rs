//! Facade configuration via `shapedb.toml`
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. `load_or_create` writes the commented default file into a
//! directory on first use; edit it and reopen the facade to change settings.

use serde::{Deserialize, Serialize};
use shapedb_core::{Error, Result};
use std::path::{Path, PathBuf};

/// Config file name placed in the configuration directory.
pub const CONFIG_FILE_NAME: &str = "shapedb.toml";

/// How transforms commit their writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformStrategy {
    /// Probe the deployment once and pick
    #[default]
    Auto,
    /// Always use a storage transaction
    Transactional,
    /// Always use conditional updates with retry
    Optimistic,
}

/// Backup settings, persisted under `[backup]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory receiving archives; backups are disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Number of newest archives to keep
    #[serde(default = "default_retain")]
    pub retain: usize,
    /// zstd compression level
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

fn default_retain() -> usize {
    7
}

fn default_compression_level() -> i32 {
    3
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: None,
            retain: default_retain(),
            compression_level: default_compression_level(),
        }
    }
}

/// Facade configuration loaded from `shapedb.toml`.
///
/// # Example
///
/// ```toml
/// strategy = "optimistic"
/// max_retries = 5
///
/// [backup]
/// directory = "/var/backups/shapedb"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeConfig {
    /// Transform commit strategy
    #[serde(default)]
    pub strategy: TransformStrategy,
    /// Total optimistic attempts per document
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Exclusive upper bound of the jittered backoff between attempts
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Create declared indexes when the facade opens
    #[serde(default = "default_create_indexes")]
    pub create_indexes: bool,
    /// Scratch collection used by the transaction probe
    #[serde(default = "default_probe_collection")]
    pub probe_collection: String,
    /// Backup settings
    #[serde(default)]
    pub backup: BackupConfig,
}

fn default_max_retries() -> usize {
    3
}

fn default_max_backoff_ms() -> u64 {
    10
}

fn default_create_indexes() -> bool {
    true
}

fn default_probe_collection() -> String {
    "_shapedb_probe".to_string()
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            strategy: TransformStrategy::default(),
            max_retries: default_max_retries(),
            max_backoff_ms: default_max_backoff_ms(),
            create_indexes: default_create_indexes(),
            probe_collection: default_probe_collection(),
            backup: BackupConfig::default(),
        }
    }
}

impl ShapeConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# shapedb configuration
#
# Transform commit strategy: "auto" (default), "transactional" or "optimistic"
#   "auto"          = probe the deployment once, use transactions when available
#   "transactional" = always commit inside a storage transaction
#   "optimistic"    = conditional update on the read snapshot, retry on conflict
strategy = "auto"

# Total optimistic attempts per document (default: 3)
max_retries = 3

# Random backoff between optimistic attempts is below this many ms (default: 10)
max_backoff_ms = 10

# Create declared indexes when the facade opens (default: true)
create_indexes = true

# Scratch collection for the transaction capability probe
probe_collection = "_shapedb_probe"

[backup]
# Archives are written here; backups are disabled when unset.
# directory = "/var/backups/shapedb"

# Number of newest archives to keep (default: 7)
retain = 7

# zstd compression level (default: 3)
compression_level = 3
"#
    }

    /// Parse and validate config text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ShapeConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Load `shapedb.toml` from a directory, writing the default file first
    /// if it does not exist.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            std::fs::write(&path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Self::load(&path)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        if self.max_backoff_ms == 0 {
            return Err(Error::Config("max_backoff_ms must be at least 1".to_string()));
        }
        if self.backup.retain == 0 {
            return Err(Error::Config("backup.retain must be at least 1".to_string()));
        }
        if self.probe_collection.is_empty() {
            return Err(Error::Config("probe_collection must not be empty".to_string()));
        }
        Ok(())
    }
}
