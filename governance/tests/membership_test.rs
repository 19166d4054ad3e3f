//! Membership approvals: ledger-first ordering, idempotence and healing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use governance::config::{CallConfig, MembershipConfig};
use governance::engine::{GovernanceEngine, PendingWrite, WriteStatus};
use governance::{ErrorKind, MembershipWorkflow, Violation};
use ledger::{Address, ExternalTx, InMemoryLedger, LedgerGateway};
use metastore::{
    InMemoryRequestStore, MembershipRequest, MembershipRequestStore, NewMembershipRequest, RequestStatus, StoreError,
};

const OWNER: u64 = 100;

fn addr(n: u64) -> Address {
    Address::from_low_u64(n)
}

fn calls() -> CallConfig {
    CallConfig {
        write_timeout_ms: 200,
        read_retry_count: 1,
        read_retry_delay_ms: 1,
        max_concurrent_reads: 4,
    }
}

struct Fixture {
    ledger: Arc<InMemoryLedger>,
    store: Arc<InMemoryRequestStore>,
    flow: Arc<MembershipWorkflow>,
}

fn fixture() -> Fixture {
    let ledger = Arc::new(InMemoryLedger::new(addr(OWNER)).with_members([addr(10)]));
    let store = Arc::new(InMemoryRequestStore::new());
    let flow = Arc::new(MembershipWorkflow::new(
        ledger.clone(),
        store.clone(),
        calls(),
        &MembershipConfig::default(),
    ));
    Fixture { ledger, store, flow }
}

async fn file_request(fx: &Fixture, wallet: u64) -> String {
    fx.flow
        .request_membership(&addr(wallet), &format!("user-{wallet}"), "Reviewer", "I review ML papers")
        .await
        .unwrap()
        .id
}

async fn status_of(fx: &Fixture, id: &str) -> RequestStatus {
    fx.store.get(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_approval_adds_member_then_marks_request() {
    let fx = fixture();
    let id = file_request(&fx, 1).await;

    let approval = fx.flow.approve(&addr(OWNER), &id).await.unwrap();
    assert!(approval.request_synced);
    assert_eq!(approval.member, addr(1));
    assert_eq!(status_of(&fx, &id).await, RequestStatus::Approved);
    assert_eq!(fx.flow.members().await.unwrap(), vec![addr(10), addr(1)]);
}

#[tokio::test]
async fn test_concurrent_approvals_add_once() {
    let fx = fixture();
    let id = file_request(&fx, 1).await;

    let owner = addr(OWNER);
    let (a, b) = tokio::join!(fx.flow.approve(&owner, &id), fx.flow.approve(&owner, &id));

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(failure.violation_code(), Some(Violation::AlreadyMember));

    assert_eq!(fx.ledger.add_member_calls(), 1);
    assert_eq!(status_of(&fx, &id).await, RequestStatus::Approved);
}

#[tokio::test]
async fn test_repeat_approval_does_not_write_again() {
    let fx = fixture();
    let id = file_request(&fx, 1).await;
    fx.flow.approve(&addr(OWNER), &id).await.unwrap();

    let err = fx.flow.approve(&addr(OWNER), &id).await.unwrap_err();
    assert_eq!(err.violation_code(), Some(Violation::AlreadyMember));
    assert_eq!(fx.ledger.add_member_calls(), 1);
}

#[tokio::test]
async fn test_member_added_elsewhere_is_race_lost_and_healed() {
    let fx = fixture();
    let id = file_request(&fx, 1).await;

    fx.ledger
        .front_run_next_write(ExternalTx::AddMember { member: addr(1) })
        .await;

    let err = fx.flow.approve(&addr(OWNER), &id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RaceLost);
    assert_eq!(err.violation_code(), Some(Violation::AlreadyMember));
    assert_eq!(status_of(&fx, &id).await, RequestStatus::Approved);
}

#[tokio::test]
async fn test_request_store_failure_after_ledger_write() {
    let fx = fixture();
    let id = file_request(&fx, 1).await;

    fx.store.fail_next_writes(1);
    let approval = fx.flow.approve(&addr(OWNER), &id).await.unwrap();
    assert!(!approval.request_synced);
    assert!(fx.ledger.is_member(&addr(1)).await.unwrap());
    assert_eq!(status_of(&fx, &id).await, RequestStatus::Pending);

    let report = fx.flow.reconcile_requests().await.unwrap();
    assert_eq!(report.healed, vec![id.clone()]);
    assert_eq!(report.still_pending, 0);
    assert_eq!(status_of(&fx, &id).await, RequestStatus::Approved);
}

#[tokio::test]
async fn test_unconfirmed_add_member_then_checked() {
    let fx = fixture();
    let id = file_request(&fx, 1).await;

    fx.ledger.set_response_delay(Duration::from_millis(1_000));
    let err = fx.flow.approve(&addr(OWNER), &id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unconfirmed);
    fx.ledger.set_response_delay(Duration::ZERO);

    let engine = GovernanceEngine::new(fx.ledger.clone(), calls());
    let landed = engine
        .check_write(&PendingWrite::AddMember { member: addr(1) })
        .await
        .unwrap();
    assert_eq!(landed, WriteStatus::Landed { paper_id: None });

    // Retrying the approval now heals instead of writing twice.
    let err = fx.flow.approve(&addr(OWNER), &id).await.unwrap_err();
    assert_eq!(err.violation_code(), Some(Violation::AlreadyMember));
    assert_eq!(fx.ledger.add_member_calls(), 1);
    assert_eq!(status_of(&fx, &id).await, RequestStatus::Approved);
}

#[tokio::test]
async fn test_only_reviewers_approve() {
    let fx = fixture();
    let id = file_request(&fx, 1).await;

    let err = fx.flow.approve(&addr(10), &id).await.unwrap_err();
    assert_eq!(err.violation_code(), Some(Violation::NotAuthorized));
    assert_eq!(fx.ledger.add_member_calls(), 0);
}

#[tokio::test]
async fn test_reconcile_leaves_unresolved_requests_pending() {
    let fx = fixture();
    let first = file_request(&fx, 1).await;
    let second = file_request(&fx, 2).await;

    fx.ledger
        .front_run_next_write(ExternalTx::AddMember { member: addr(2) })
        .await;
    // Any write drains the queued transaction; use an unrelated approval.
    fx.flow.approve(&addr(OWNER), &first).await.unwrap();

    let report = fx.flow.reconcile_requests().await.unwrap();
    assert_eq!(report.healed, vec![second.clone()]);
    assert_eq!(report.still_pending, 0);

    let third = file_request(&fx, 3).await;
    let report = fx.flow.reconcile_requests().await.unwrap();
    assert!(report.healed.is_empty());
    assert_eq!(report.still_pending, 1);
    assert_eq!(status_of(&fx, &third).await, RequestStatus::Pending);
}

/// Request store that yields to the scheduler before every call.
struct Yielding(Arc<InMemoryRequestStore>);

#[async_trait]
impl MembershipRequestStore for Yielding {
    async fn create(&self, request: NewMembershipRequest) -> Result<MembershipRequest, StoreError> {
        tokio::task::yield_now().await;
        self.0.create(request).await
    }

    async fn get(&self, id: &str) -> Result<Option<MembershipRequest>, StoreError> {
        tokio::task::yield_now().await;
        self.0.get(id).await
    }

    async fn by_status(&self, status: RequestStatus) -> Result<Vec<MembershipRequest>, StoreError> {
        tokio::task::yield_now().await;
        self.0.by_status(status).await
    }

    async fn by_wallet(&self, wallet: &str) -> Result<Vec<MembershipRequest>, StoreError> {
        tokio::task::yield_now().await;
        self.0.by_wallet(wallet).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: RequestStatus,
        reviewed_by: &str,
    ) -> Result<MembershipRequest, StoreError> {
        tokio::task::yield_now().await;
        self.0.update_status(id, status, reviewed_by).await
    }
}

#[tokio::test]
async fn test_concurrent_requests_leave_one_pending() {
    let ledger = Arc::new(InMemoryLedger::new(addr(OWNER)));
    let store = Arc::new(InMemoryRequestStore::new());
    let flow = MembershipWorkflow::new(
        ledger,
        Arc::new(Yielding(store.clone())),
        calls(),
        &MembershipConfig::default(),
    );

    let wallet = addr(1);
    let (a, b) = tokio::join!(
        flow.request_membership(&wallet, "user-1", "Ada", "I review ML papers"),
        flow.request_membership(&wallet, "user-1", "Ada", "I review ML papers")
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(failure.violation_code(), Some(Violation::DuplicatePendingRequest));

    let pending = store.by_wallet(wallet.as_str()).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, RequestStatus::Pending);
}
