//! Configuration for the governance core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level governance configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Ledger connection
    pub ledger: LedgerConfig,
    /// Call policy for ledger and store access
    pub calls: CallConfig,
    /// Membership workflow
    pub membership: MembershipConfig,
    /// Metadata store backend
    pub metastore: MetastoreConfig,
}

impl GovernanceConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Ledger connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// Per-request HTTP timeout (ms)
    pub request_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl LedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Timeouts, retries and fan-out limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// How long to wait for a write to be confirmed (ms)
    pub write_timeout_ms: u64,
    /// Retries for transiently failing reads
    pub read_retry_count: u32,
    /// Base retry delay (ms); attempt n waits n times this
    pub read_retry_delay_ms: u64,
    /// Maximum concurrent reads in a listing
    pub max_concurrent_reads: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 60_000,
            read_retry_count: 3,
            read_retry_delay_ms: 500,
            max_concurrent_reads: 8,
        }
    }
}

/// Membership workflow configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Addresses allowed to review requests besides the ledger owner
    pub admins: Vec<String>,
}

/// Which metadata store to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetastoreBackend {
    #[default]
    Memory,
    Mongo,
}

/// Metadata store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetastoreConfig {
    pub backend: MetastoreBackend,
    /// MongoDB connection string
    pub mongodb_uri: String,
    /// MongoDB database name
    pub mongodb_db: String,
}

impl Default for MetastoreConfig {
    fn default() -> Self {
        Self {
            backend: MetastoreBackend::Memory,
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_db: "peerstake".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
calls:
  write_timeout_ms: 1500
membership:
  admins: ["0x00000000000000000000000000000000000000aa"]
"#;
        let config = GovernanceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.calls.write_timeout_ms, 1500);
        assert_eq!(config.calls.read_retry_count, 3);
        assert_eq!(config.membership.admins.len(), 1);
        assert_eq!(config.metastore.backend, MetastoreBackend::Memory);
        assert_eq!(config.ledger.rpc_url, "http://127.0.0.1:8545");
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = GovernanceConfig::default();
        config.metastore.backend = MetastoreBackend::Mongo;
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("backend: mongo"));
        assert_eq!(GovernanceConfig::from_yaml(&yaml).unwrap(), config);
    }
}
