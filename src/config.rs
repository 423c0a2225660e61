//! Registry configuration.
//!
//! Values normally come from the registry URL parameters
//! ([`RegistryConfig::from_url`]) but can be built or deserialized directly.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::endpoint::{Endpoint, DYNAMIC_KEY, FILE_KEY, SAVE_FILE_SYNC_KEY};

/// Where the disk cache lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "path")]
pub enum CacheLocation {
    /// `<home>/.grpc/grpc-registry-<host>-<millis>.cache`
    #[default]
    Default,
    Path(PathBuf),
    /// No file; the cache stays in memory only.
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Cache file location.
    /// Default: per-user file named after the registry host
    pub cache_file: CacheLocation,

    /// Write the cache on the notifying thread instead of the save worker.
    /// Default: false
    pub sync_save: bool,

    /// Treat registrations without a `dynamic` parameter as dynamic.
    /// Default: true
    pub dynamic_default: bool,

    /// Capacity of the save worker queue.
    /// Default: 1024
    pub save_queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_file: CacheLocation::Default,
            sync_save: false,
            dynamic_default: true,
            save_queue_capacity: 1024,
        }
    }
}

impl RegistryConfig {
    /// Reads `file`, `save.file` and `dynamic` from the registry url.
    /// An empty `file` parameter disables the disk cache.
    pub fn from_url(url: &Endpoint) -> Self {
        let defaults = Self::default();
        let cache_file = match url.parameter(FILE_KEY) {
            None => CacheLocation::Default,
            Some(path) if path.trim().is_empty() => CacheLocation::Disabled,
            Some(path) => CacheLocation::Path(PathBuf::from(path)),
        };
        Self {
            cache_file,
            sync_save: url.bool_parameter(SAVE_FILE_SYNC_KEY, defaults.sync_save),
            dynamic_default: url.bool_parameter(DYNAMIC_KEY, defaults.dynamic_default),
            ..defaults
        }
    }

    /// Resolves the cache path for a registry on `host`; `None` when disabled.
    pub fn resolve_cache_file(&self, host: &str) -> Option<PathBuf> {
        match &self.cache_file {
            CacheLocation::Disabled => None,
            CacheLocation::Path(path) => Some(path.clone()),
            CacheLocation::Default => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or(0);
                let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                Some(
                    home.join(".grpc")
                        .join(format!("grpc-registry-{host}-{millis}.cache")),
                )
            }
        }
    }
}
