//! Store traits.

use async_trait::async_trait;

use crate::types::*;

/// Error types for store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store is not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// No record with this id
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Backend reported an error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Paper metadata store.
///
/// Eventually consistent; no transaction spans this store and the ledger.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Exact-match query. Results are in insertion (document) order.
    async fn query(&self, field: MetadataField, value: &str) -> Result<Vec<MetadataRecord>, StoreError>;

    /// All records, in insertion order.
    async fn all(&self) -> Result<Vec<MetadataRecord>, StoreError>;

    /// Create a record; the store assigns the id.
    async fn create(&self, draft: MetadataDraft) -> Result<MetadataRecord, StoreError>;

    /// Update a record by id.
    async fn update(&self, id: &str, update: MetadataUpdate) -> Result<MetadataRecord, StoreError>;
}

/// Membership request persistence.
#[async_trait]
pub trait MembershipRequestStore: Send + Sync {
    /// Create a pending request; the store assigns the id.
    async fn create(&self, request: NewMembershipRequest) -> Result<MembershipRequest, StoreError>;

    /// Fetch one request.
    async fn get(&self, id: &str) -> Result<Option<MembershipRequest>, StoreError>;

    /// Requests with a status, oldest first.
    async fn by_status(&self, status: RequestStatus) -> Result<Vec<MembershipRequest>, StoreError>;

    /// Requests for a wallet, oldest first.
    async fn by_wallet(&self, wallet: &str) -> Result<Vec<MembershipRequest>, StoreError>;

    /// Set the review status.
    async fn update_status(
        &self,
        id: &str,
        status: RequestStatus,
        reviewed_by: &str,
    ) -> Result<MembershipRequest, StoreError>;
}
