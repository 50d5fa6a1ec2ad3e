//! NetMeshBase configuration.

use meshbase_core::MeshBaseConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of a NetMeshBase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetMeshBaseConfig {
    /// Settings of the underlying local store.
    #[serde(flatten)]
    pub base: MeshBaseConfig,
    /// How long `access_locally` waits for proxies; negative waits forever.
    pub access_locally_timeout_ms: i64,
    /// How long `try_to_obtain_lock` waits for the lock proxy.
    pub try_to_obtain_lock_timeout_ms: u64,
    /// Whether new replicas give up their lock when a peer asks.
    pub default_will_give_up_lock: bool,
    /// Whether new replicas give up home status when a peer asks.
    pub default_will_give_up_home_replica: bool,
    /// Serve replicas as if this node were their home, whatever their actual home.
    pub points_replicas_to_itself: bool,
    /// Never give up any lock, regardless of per-object settings.
    pub refuse_to_give_up_lock: bool,
}

impl Default for NetMeshBaseConfig {
    fn default() -> Self {
        Self {
            base: MeshBaseConfig::default(),
            access_locally_timeout_ms: 10_000,
            try_to_obtain_lock_timeout_ms: 2_000,
            default_will_give_up_lock: true,
            default_will_give_up_home_replica: true,
            points_replicas_to_itself: false,
            refuse_to_give_up_lock: false,
        }
    }
}

impl NetMeshBaseConfig {
    /// Loads the configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: NetMeshBaseConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: NetMeshBaseConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// The `access_locally` timeout; `None` waits forever.
    pub fn access_locally_timeout(&self) -> Option<Duration> {
        u64::try_from(self.access_locally_timeout_ms)
            .ok()
            .map(Duration::from_millis)
    }

    /// The lock acquisition timeout.
    pub fn try_to_obtain_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.try_to_obtain_lock_timeout_ms)
    }
}
