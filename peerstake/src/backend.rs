//! Backend construction from configuration.

use std::sync::Arc;

use tracing::info;

use governance::config::MetastoreBackend;
use governance::{GovernanceConfig, GovernanceService};
use ledger::{LedgerGateway, RpcLedger};
use metastore::{InMemoryMetadataStore, InMemoryRequestStore, MembershipRequestStore, MetadataStore};

type Stores = (Arc<dyn MetadataStore>, Arc<dyn MembershipRequestStore>);

/// Metadata and request stores for the configured backend.
pub async fn stores(config: &GovernanceConfig) -> anyhow::Result<Stores> {
    match config.metastore.backend {
        MetastoreBackend::Memory => {
            info!("Using in-memory metadata store");
            Ok((
                Arc::new(InMemoryMetadataStore::new()),
                Arc::new(InMemoryRequestStore::new()),
            ))
        }
        MetastoreBackend::Mongo => mongo_stores(config).await,
    }
}

#[cfg(feature = "mongo")]
async fn mongo_stores(config: &GovernanceConfig) -> anyhow::Result<Stores> {
    let mongo = metastore::MongoStores::connect(&config.metastore.mongodb_uri, &config.metastore.mongodb_db).await?;
    Ok((
        Arc::new(mongo.metadata_store().await?),
        Arc::new(mongo.request_store().await?),
    ))
}

#[cfg(not(feature = "mongo"))]
async fn mongo_stores(_config: &GovernanceConfig) -> anyhow::Result<Stores> {
    anyhow::bail!("this build has no MongoDB support; rebuild with --features mongo")
}

/// Service over the JSON-RPC ledger and the configured stores.
pub async fn service(config: &GovernanceConfig) -> anyhow::Result<GovernanceService> {
    let ledger: Arc<dyn LedgerGateway> = Arc::new(RpcLedger::new(
        config.ledger.rpc_url.clone(),
        config.ledger.request_timeout(),
    )?);
    info!(ledger = ledger.id(), "Using JSON-RPC ledger");
    let (metadata, requests) = stores(config).await?;
    Ok(GovernanceService::new(ledger, metadata, requests, config))
}
