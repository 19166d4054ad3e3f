//! Command-line arguments and environment handling.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use governance::config::MetastoreBackend;
use governance::GovernanceConfig;
use ledger::Address;

use crate::commands::Commands;

/// Metadata store selection on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreChoice {
    Memory,
    Mongo,
}

impl From<StoreChoice> for MetastoreBackend {
    fn from(choice: StoreChoice) -> Self {
        match choice {
            StoreChoice::Memory => MetastoreBackend::Memory,
            StoreChoice::Mongo => MetastoreBackend::Mongo,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "peerstake")]
#[command(about = "Stake-backed paper verification by committee vote")]
pub struct Args {
    /// Ledger JSON-RPC endpoint (overrides the config file)
    #[arg(long, env = "PEERSTAKE_RPC_URL", global = true)]
    pub rpc_url: Option<String>,

    /// Account the command acts as
    #[arg(long, env = "PEERSTAKE_CALLER", global = true)]
    pub caller: Option<Address>,

    /// YAML configuration file
    #[arg(long, env = "PEERSTAKE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Metadata store backend (overrides the config file).
    /// `memory` keeps nothing between invocations.
    #[arg(long, env = "PEERSTAKE_METASTORE", value_enum, global = true)]
    pub metastore: Option<StoreChoice>,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", global = true)]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", global = true)]
    pub mongodb_db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn governance_config(&self) -> anyhow::Result<GovernanceConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                GovernanceConfig::from_yaml(&yaml)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => GovernanceConfig::default(),
        };

        if let Some(url) = &self.rpc_url {
            config.ledger.rpc_url = url.clone();
        }
        if let Some(choice) = self.metastore {
            config.metastore.backend = choice.into();
        }
        if let Some(uri) = &self.mongodb_uri {
            config.metastore.mongodb_uri = uri.clone();
        }
        if let Some(db) = &self.mongodb_db {
            config.metastore.mongodb_db = db.clone();
        }
        Ok(config)
    }

    /// Caller for commands that act on someone's behalf.
    pub fn require_caller(&self) -> anyhow::Result<Address> {
        self.caller
            .clone()
            .context("this command needs --caller (or PEERSTAKE_CALLER)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "peerstake",
            "--rpc-url",
            "http://ledger:8545",
            "--metastore",
            "mongo",
            "--mongodb-db",
            "papers",
            "papers",
        ]);
        let config = args.governance_config().unwrap();
        assert_eq!(config.ledger.rpc_url, "http://ledger:8545");
        assert_eq!(config.metastore.backend, MetastoreBackend::Mongo);
        assert_eq!(config.metastore.mongodb_db, "papers");
        assert_eq!(config.metastore.mongodb_uri, "mongodb://localhost:27017");
    }

    #[test]
    fn test_caller_is_parsed_as_address() {
        let args = Args::parse_from([
            "peerstake",
            "--caller",
            "0x00000000000000000000000000000000000000aa",
            "members",
        ]);
        assert!(args.require_caller().is_ok());

        let bad = Args::try_parse_from(["peerstake", "--caller", "alice", "members"]);
        assert!(bad.is_err());
    }
}
