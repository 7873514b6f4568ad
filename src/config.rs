//! Configuration management for the message serializer
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry-serde.toml)
//! - Environment variables (REGISTRY_SERDE__*)
//!
//! ## Example config file (registry-serde.toml):
//! ```toml
//! [cache]
//! max_entries = 10000
//! time_to_idle_secs = 3600
//!
//! [decoder]
//! fast_path = true
//!
//! [subject]
//! strategy = "record_name"
//!
//! [reader]
//! value_schema = "schemas/User.avsc"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use apache_avro::Schema;
use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SerializerError};
use crate::schema::SubjectNameStrategy;

/// Main configuration for the serializer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerdeConfig {
    /// Writer/decoder cache bounds
    #[serde(default)]
    pub cache: CacheConfig,

    /// Decoding strategy settings
    #[serde(default)]
    pub decoder: DecoderConfig,

    /// Subject naming
    #[serde(default)]
    pub subject: SubjectConfig,

    /// Reader schemas for schema evolution
    #[serde(default)]
    pub reader: ReaderConfig,
}

/// Cache bounds. Leaving both unset keeps every entry for the process lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries per cache
    #[serde(default)]
    pub max_entries: Option<u64>,

    /// Evict entries not used for this many seconds
    #[serde(default)]
    pub time_to_idle_secs: Option<u64>,
}

/// Decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Probe the compiled decoder before falling back to the reference one
    #[serde(default = "default_true")]
    pub fast_path: bool,
}

/// Subject configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectConfig {
    #[serde(default)]
    pub strategy: SubjectNameStrategy,
}

/// Reader schema files (.avsc)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default)]
    pub key_schema: Option<PathBuf>,

    #[serde(default)]
    pub value_schema: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { fast_path: true }
    }
}

impl ReaderConfig {
    /// Parse the configured key and value reader schemas
    pub fn load_schemas(&self) -> Result<(Option<Schema>, Option<Schema>)> {
        let key = self.key_schema.as_deref().map(read_schema).transpose()?;
        let value = self.value_schema.as_deref().map(read_schema).transpose()?;
        Ok((key, value))
    }
}

fn read_schema(path: &Path) -> Result<Schema> {
    let content = fs::read_to_string(path)
        .map_err(|e| SerializerError::ReaderSchema(format!("{}: {}", path.display(), e)))?;
    Schema::parse_str(&content)
        .map_err(|e| SerializerError::ReaderSchema(format!("{}: {}", path.display(), e)))
}

impl SerdeConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "registry-serde.toml",
            ".registry-serde.toml",
            "config/registry-serde.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "registry-serde") {
            let xdg_config = config_dir.config_dir().join("registry-serde.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("REGISTRY_SERDE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
