//! MeshBase configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of a MeshBase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshBaseConfig {
    /// Maximum number of typed facades kept in the LRU cache.
    pub facade_cache_capacity: usize,
    /// How long `create_transaction_asap` waits for another thread's
    /// transaction; `None` waits indefinitely.
    pub transaction_wait_timeout_ms: Option<u64>,
}

impl Default for MeshBaseConfig {
    fn default() -> Self {
        Self {
            facade_cache_capacity: 1024,
            transaction_wait_timeout_ms: None,
        }
    }
}

impl MeshBaseConfig {
    /// Loads the configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MeshBaseConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MeshBaseConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// The transaction wait timeout as a Duration.
    pub fn transaction_wait_timeout(&self) -> Option<Duration> {
        self.transaction_wait_timeout_ms.map(Duration::from_millis)
    }
}
