//! In-memory stores for development and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::*;
use crate::types::*;

fn unavailable() -> StoreError {
    StoreError::Unavailable("In-memory store disabled".to_string())
}

/// In-memory metadata store.
///
/// Keeps records in a vector so query results follow insertion order.
pub struct InMemoryMetadataStore {
    records: RwLock<Vec<MetadataRecord>>,
    available: AtomicBool,
    failing_writes: AtomicU32,
}

impl InMemoryMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            failing_writes: AtomicU32::new(0),
        }
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `count` create/update calls.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable())
        }
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check()?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("Injected write failure".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn query(&self, field: MetadataField, value: &str) -> Result<Vec<MetadataRecord>, StoreError> {
        self.check()?;
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| match field {
                MetadataField::Fingerprint => r.fingerprint == value,
                MetadataField::AuthorAddress => r.author_address.eq_ignore_ascii_case(value),
            })
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        self.check()?;
        Ok(self.records.read().await.clone())
    }

    async fn create(&self, draft: MetadataDraft) -> Result<MetadataRecord, StoreError> {
        self.check_write()?;
        let record = MetadataRecord::from_draft(uuid::Uuid::new_v4().to_string(), draft);
        debug!(id = %record.id, fingerprint = %record.fingerprint, "Metadata record created");
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, update: MetadataUpdate) -> Result<MetadataRecord, StoreError> {
        self.check_write()?;
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.apply(update);
        Ok(record.clone())
    }
}

/// In-memory membership request store.
pub struct InMemoryRequestStore {
    requests: DashMap<String, MembershipRequest>,
    available: AtomicBool,
    failing_writes: AtomicU32,
}

impl InMemoryRequestStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            available: AtomicBool::new(true),
            failing_writes: AtomicU32::new(0),
        }
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `count` create/update calls.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable())
        }
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check()?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("Injected write failure".to_string()));
        }
        Ok(())
    }

    fn collect_sorted(&self, keep: impl Fn(&MembershipRequest) -> bool) -> Vec<MembershipRequest> {
        let mut found: Vec<MembershipRequest> = self
            .requests
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }
}

impl Default for InMemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipRequestStore for InMemoryRequestStore {
    async fn create(&self, request: NewMembershipRequest) -> Result<MembershipRequest, StoreError> {
        self.check_write()?;
        let stored = MembershipRequest::pending(uuid::Uuid::new_v4().to_string(), request);
        self.requests.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Option<MembershipRequest>, StoreError> {
        self.check()?;
        Ok(self.requests.get(id).map(|r| r.value().clone()))
    }

    async fn by_status(&self, status: RequestStatus) -> Result<Vec<MembershipRequest>, StoreError> {
        self.check()?;
        Ok(self.collect_sorted(|r| r.status == status))
    }

    async fn by_wallet(&self, wallet: &str) -> Result<Vec<MembershipRequest>, StoreError> {
        self.check()?;
        Ok(self.collect_sorted(|r| r.wallet.eq_ignore_ascii_case(wallet)))
    }

    async fn update_status(
        &self,
        id: &str,
        status: RequestStatus,
        reviewed_by: &str,
    ) -> Result<MembershipRequest, StoreError> {
        self.check_write()?;
        let mut entry = self
            .requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.status = status;
        entry.reviewed_by = Some(reviewed_by.to_string());
        entry.updated_at = chrono::Utc::now();
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(fingerprint: &str, author: &str, title: &str) -> MetadataDraft {
        MetadataDraft {
            fingerprint: fingerprint.into(),
            author_address: author.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_query_preserves_insertion_order() {
        let store = InMemoryMetadataStore::new();
        store.create(draft("H1", "0xaa", "First")).await.unwrap();
        store.create(draft("H2", "0xAA", "Second")).await.unwrap();
        store.create(draft("H3", "0xbb", "Other")).await.unwrap();

        let by_author = store.query(MetadataField::AuthorAddress, "0xaa").await.unwrap();
        let titles: Vec<_> = by_author.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);

        let by_fp = store.query(MetadataField::Fingerprint, "H3").await.unwrap();
        assert_eq!(by_fp.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_and_injected_failures() {
        let store = InMemoryMetadataStore::new();
        store.fail_next_writes(1);
        assert!(store.create(draft("H1", "0xaa", "T")).await.is_err());
        assert!(store.create(draft("H1", "0xaa", "T")).await.is_ok());

        store.set_available(false);
        assert!(matches!(
            store.query(MetadataField::Fingerprint, "H1").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryMetadataStore::new();
        let result = store.update("nope", MetadataUpdate::default()).await;
        assert_eq!(result, Err(StoreError::NotFound("nope".into())));
    }

    #[tokio::test]
    async fn test_request_lifecycle() {
        let store = InMemoryRequestStore::new();
        let created = store
            .create(NewMembershipRequest {
                requester_id: "user-1".into(),
                requester_name: "Ada".into(),
                wallet: "0xABCD".into(),
                justification: "I review papers".into(),
            })
            .await
            .unwrap();
        assert_eq!(created.status, RequestStatus::Pending);
        assert_eq!(created.wallet, "0xabcd");

        assert_eq!(store.by_status(RequestStatus::Pending).await.unwrap().len(), 1);
        assert_eq!(store.by_wallet("0xabcd").await.unwrap().len(), 1);

        let updated = store
            .update_status(&created.id, RequestStatus::Approved, "admin")
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Approved);
        assert_eq!(updated.reviewed_by.as_deref(), Some("admin"));
        assert!(store.by_status(RequestStatus::Pending).await.unwrap().is_empty());
    }
}
