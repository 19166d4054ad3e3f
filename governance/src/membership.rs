//! Membership workflow.
//!
//! Prospective reviewers file a request off-ledger; an owner or admin
//! approves it, which adds the wallet on the ledger first and marks the
//! request second. The ledger is the source of truth for membership: a
//! request whose wallet is already a member is healed to approved rather
//! than added twice.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ledger::{Address, LedgerGateway};
use metastore::{MembershipRequest, MembershipRequestStore, NewMembershipRequest, RequestStatus};

use crate::calls::CallPolicy;
use crate::config::{CallConfig, MembershipConfig};
use crate::error::{GovernanceError, Result, Violation};

/// Outcome of an approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub request_id: String,
    pub member: Address,
    pub tx_hash: String,
    /// False when the ledger write landed but the request record could
    /// not be updated; `reconcile_requests` repairs it later
    pub request_synced: bool,
}

/// Outcome of a request reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestReconciliation {
    /// Requests marked approved because their wallet is already a member
    pub healed: Vec<String>,
    /// Requests still awaiting review
    pub still_pending: usize,
}

/// Off-ledger request handling plus ledger-side member management.
pub struct MembershipWorkflow {
    ledger: Arc<dyn LedgerGateway>,
    requests: Arc<dyn MembershipRequestStore>,
    policy: CallPolicy,
    admins: Vec<Address>,
    /// One approval or rejection at a time per request
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// One new request at a time per wallet
    wallet_locks: DashMap<String, Arc<Mutex<()>>>,
}

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Run `work` holding the lock for `key`.
///
/// The entry is dropped afterwards unless another task is waiting on it.
async fn serialised<T>(locks: &LockMap, key: &str, work: impl Future<Output = T>) -> T {
    let lock = locks.entry(key.to_string()).or_default().clone();
    let out = {
        let _guard = lock.lock().await;
        work.await
    };
    drop(lock);
    locks.remove_if(key, |_, held| Arc::strong_count(held) == 1);
    out
}

impl MembershipWorkflow {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        requests: Arc<dyn MembershipRequestStore>,
        calls: CallConfig,
        membership: &MembershipConfig,
    ) -> Self {
        let admins = membership
            .admins
            .iter()
            .filter_map(|raw| match Address::parse(raw) {
                Ok(address) => Some(address),
                Err(e) => {
                    warn!(admin = %raw, error = %e, "Ignoring invalid admin address");
                    None
                }
            })
            .collect();

        Self {
            ledger,
            requests,
            policy: CallPolicy::new(calls),
            admins,
            locks: DashMap::new(),
            wallet_locks: DashMap::new(),
        }
    }

    async fn is_member(&self, who: &Address) -> Result<bool> {
        let ledger = &self.ledger;
        self.policy.ledger_read("members", || ledger.is_member(who)).await
    }

    /// Whether `who` may review membership requests.
    pub async fn is_reviewer(&self, who: &Address) -> Result<bool> {
        if self.admins.contains(who) {
            return Ok(true);
        }
        let ledger = &self.ledger;
        let owner = self.policy.ledger_read("owner", || ledger.owner()).await?;
        Ok(&owner == who)
    }

    async fn require_reviewer(&self, who: &Address) -> Result<()> {
        if self.is_reviewer(who).await? {
            Ok(())
        } else {
            Err(GovernanceError::violation(Violation::NotAuthorized))
        }
    }

    async fn load(&self, request_id: &str) -> Result<MembershipRequest> {
        let requests = &self.requests;
        self.policy
            .read("requests.get", || requests.get(request_id))
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("membership request {request_id}")))
    }

    /// Mark a request approved after the ledger already shows membership.
    async fn heal(&self, request: &MembershipRequest, reviewer: &str) {
        if request.status != RequestStatus::Pending {
            return;
        }
        match self
            .requests
            .update_status(&request.id, RequestStatus::Approved, reviewer)
            .await
        {
            Ok(_) => info!(request_id = %request.id, wallet = %request.wallet, "Request healed to approved"),
            Err(e) => warn!(request_id = %request.id, error = %e, "Failed to heal request"),
        }
    }

    /// File a membership request for `wallet`.
    ///
    /// Requests for the same wallet are serialised so at most one is
    /// pending at any time.
    pub async fn request_membership(
        &self,
        wallet: &Address,
        requester_id: &str,
        requester_name: &str,
        justification: &str,
    ) -> Result<MembershipRequest> {
        serialised(
            &self.wallet_locks,
            wallet.as_str(),
            self.file_request(wallet, requester_id, requester_name, justification),
        )
        .await
    }

    async fn file_request(
        &self,
        wallet: &Address,
        requester_id: &str,
        requester_name: &str,
        justification: &str,
    ) -> Result<MembershipRequest> {
        if requester_id.trim().is_empty() || justification.trim().is_empty() {
            return Err(GovernanceError::violation_with(
                Violation::InvalidInput,
                "requester id and justification are required",
            ));
        }
        if self.is_member(wallet).await? {
            return Err(GovernanceError::violation(Violation::AlreadyMember));
        }

        let requests = &self.requests;
        let existing = self
            .policy
            .read("requests.by_wallet", || requests.by_wallet(wallet.as_str()))
            .await?;
        if existing.iter().any(|r| r.status == RequestStatus::Pending) {
            return Err(GovernanceError::violation(Violation::DuplicatePendingRequest));
        }

        let created = self
            .requests
            .create(NewMembershipRequest {
                requester_id: requester_id.to_string(),
                requester_name: requester_name.to_string(),
                wallet: wallet.to_string(),
                justification: justification.to_string(),
            })
            .await?;
        info!(request_id = %created.id, wallet = %wallet, "Membership requested");
        Ok(created)
    }

    /// Approve a request: add the wallet on the ledger, then mark the
    /// request approved.
    ///
    /// Approvals of the same request are serialised, and the ledger is
    /// consulted before writing, so the wallet is added at most once.
    pub async fn approve(&self, approver: &Address, request_id: &str) -> Result<Approval> {
        self.require_reviewer(approver).await?;
        serialised(&self.locks, request_id, self.approve_request(approver, request_id)).await
    }

    async fn approve_request(&self, approver: &Address, request_id: &str) -> Result<Approval> {
        let request = self.load(request_id).await?;
        if request.status == RequestStatus::Rejected {
            return Err(GovernanceError::violation_with(
                Violation::RequestNotPending,
                "request was rejected",
            ));
        }
        let wallet = Address::parse(&request.wallet).map_err(|e| {
            GovernanceError::violation_with(Violation::InvalidInput, format!("request wallet: {e}"))
        })?;

        if self.is_member(&wallet).await? {
            self.heal(&request, approver.as_str()).await;
            return Err(GovernanceError::violation(Violation::AlreadyMember));
        }
        if request.status == RequestStatus::Approved {
            warn!(request_id, wallet = %wallet, "Request marked approved but wallet is not a member");
            return Err(GovernanceError::violation_with(
                Violation::RequestNotPending,
                "request already approved",
            ));
        }

        let receipt = match self
            .policy
            .write("addMember", self.ledger.add_member(approver, &wallet))
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                if e.violation_code() == Some(Violation::AlreadyMember) {
                    self.heal(&request, approver.as_str()).await;
                }
                return Err(e);
            }
        };

        let request_synced = match self
            .requests
            .update_status(&request.id, RequestStatus::Approved, approver.as_str())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    request_id,
                    wallet = %wallet,
                    error = %e,
                    "Member added on ledger but request update failed"
                );
                false
            }
        };

        info!(request_id, member = %wallet, tx = %receipt.tx_hash, "Membership approved");
        Ok(Approval {
            request_id: request.id,
            member: wallet,
            tx_hash: receipt.tx_hash,
            request_synced,
        })
    }

    /// Reject a pending request.
    pub async fn reject(&self, reviewer: &Address, request_id: &str) -> Result<MembershipRequest> {
        self.require_reviewer(reviewer).await?;
        serialised(&self.locks, request_id, self.reject_request(reviewer, request_id)).await
    }

    async fn reject_request(&self, reviewer: &Address, request_id: &str) -> Result<MembershipRequest> {
        let request = self.load(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(GovernanceError::violation(Violation::RequestNotPending));
        }
        if let Ok(wallet) = Address::parse(&request.wallet) {
            if self.is_member(&wallet).await? {
                self.heal(&request, reviewer.as_str()).await;
                return Err(GovernanceError::violation(Violation::AlreadyMember));
            }
        }

        let updated = self
            .requests
            .update_status(&request.id, RequestStatus::Rejected, reviewer.as_str())
            .await?;
        info!(request_id, reviewer = %reviewer, "Membership request rejected");
        Ok(updated)
    }

    /// Mark approved every pending request whose wallet is already a member.
    pub async fn reconcile_requests(&self) -> Result<RequestReconciliation> {
        let pending = self.pending_requests().await?;

        let ledger = &self.ledger;
        let policy = &self.policy;
        let checks: Vec<Result<bool>> = self
            .policy
            .fan_out(pending.iter(), |request| async move {
                match Address::parse(&request.wallet) {
                    Ok(wallet) => policy.ledger_read("members", || ledger.is_member(&wallet)).await,
                    Err(_) => Ok(false),
                }
            })
            .await;

        let mut report = RequestReconciliation::default();
        for (request, is_member) in pending.iter().zip(checks) {
            if is_member? {
                let healed = serialised(&self.locks, &request.id, self.heal_pending(&request.id)).await?;
                report.healed.extend(healed);
            } else {
                report.still_pending += 1;
            }
        }

        debug!(healed = report.healed.len(), pending = report.still_pending, "Requests reconciled");
        Ok(report)
    }

    /// Re-read under the lock; an approval may have just finished.
    async fn heal_pending(&self, request_id: &str) -> Result<Option<String>> {
        let current = self.load(request_id).await?;
        if current.status != RequestStatus::Pending {
            return Ok(None);
        }
        self.requests
            .update_status(&current.id, RequestStatus::Approved, "ledger")
            .await?;
        Ok(Some(current.id))
    }

    /// Requests awaiting review, oldest first.
    pub async fn pending_requests(&self) -> Result<Vec<MembershipRequest>> {
        let requests = &self.requests;
        Ok(self
            .policy
            .read("requests.by_status", || requests.by_status(RequestStatus::Pending))
            .await?)
    }

    /// Requests filed for a wallet, oldest first.
    pub async fn requests_for(&self, wallet: &Address) -> Result<Vec<MembershipRequest>> {
        let requests = &self.requests;
        Ok(self
            .policy
            .read("requests.by_wallet", || requests.by_wallet(wallet.as_str()))
            .await?)
    }

    /// Current members, in ledger index order.
    pub async fn members(&self) -> Result<Vec<Address>> {
        let ledger = &self.ledger;
        let total = self
            .policy
            .ledger_read("totalMembers", || ledger.total_members())
            .await?;
        let policy = &self.policy;
        let listed: Vec<Address> = self
            .policy
            .fan_out(0..total, |index| async move {
                policy
                    .ledger_read("getMemberByIndex", || ledger.get_member_by_index(index))
                    .await
            })
            .await
            .into_iter()
            .collect::<Result<_>>()?;

        let mut members = Vec::with_capacity(listed.len());
        for address in listed {
            if !members.contains(&address) {
                members.push(address);
            }
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::InMemoryLedger;
    use metastore::InMemoryRequestStore;

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    fn workflow(ledger: Arc<InMemoryLedger>, store: Arc<InMemoryRequestStore>) -> MembershipWorkflow {
        MembershipWorkflow::new(
            ledger,
            store,
            CallConfig::default(),
            &MembershipConfig {
                admins: vec![addr(50).to_string(), "not-an-address".into()],
            },
        )
    }

    #[tokio::test]
    async fn test_request_rules() {
        let ledger = Arc::new(InMemoryLedger::new(addr(100)).with_members([addr(10)]));
        let store = Arc::new(InMemoryRequestStore::new());
        let flow = workflow(ledger, store);

        let err = flow.request_membership(&addr(10), "u10", "Member", "again").await.unwrap_err();
        assert_eq!(err.violation_code(), Some(Violation::AlreadyMember));

        flow.request_membership(&addr(1), "u1", "Ada", "I review").await.unwrap();
        let err = flow.request_membership(&addr(1), "u1", "Ada", "twice").await.unwrap_err();
        assert_eq!(err.violation_code(), Some(Violation::DuplicatePendingRequest));

        let err = flow.request_membership(&addr(2), "u2", "Bob", " ").await.unwrap_err();
        assert_eq!(err.violation_code(), Some(Violation::InvalidInput));
    }

    #[tokio::test]
    async fn test_reviewers() {
        let ledger = Arc::new(InMemoryLedger::new(addr(100)));
        let flow = workflow(ledger, Arc::new(InMemoryRequestStore::new()));
        assert!(flow.is_reviewer(&addr(100)).await.unwrap());
        assert!(flow.is_reviewer(&addr(50)).await.unwrap());
        assert!(!flow.is_reviewer(&addr(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_reject_then_approve_refused() {
        let ledger = Arc::new(InMemoryLedger::new(addr(100)));
        let store = Arc::new(InMemoryRequestStore::new());
        let flow = workflow(ledger.clone(), store);

        let request = flow.request_membership(&addr(1), "u1", "Ada", "I review").await.unwrap();
        let rejected = flow.reject(&addr(100), &request.id).await.unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);

        let err = flow.approve(&addr(100), &request.id).await.unwrap_err();
        assert_eq!(err.violation_code(), Some(Violation::RequestNotPending));
        assert_eq!(ledger.add_member_calls(), 0);
    }

    #[tokio::test]
    async fn test_members_listing() {
        let ledger = Arc::new(InMemoryLedger::new(addr(100)).with_members([addr(10), addr(11)]));
        let flow = workflow(ledger, Arc::new(InMemoryRequestStore::new()));
        assert_eq!(flow.members().await.unwrap(), vec![addr(10), addr(11)]);
    }

    #[tokio::test]
    async fn test_lock_entries_released() {
        let ledger = Arc::new(InMemoryLedger::new(addr(100)));
        let flow = workflow(ledger, Arc::new(InMemoryRequestStore::new()));

        let first = flow.request_membership(&addr(1), "u1", "Ada", "I review").await.unwrap();
        let second = flow.request_membership(&addr(2), "u2", "Bob", "I review").await.unwrap();
        flow.approve(&addr(100), &first.id).await.unwrap();
        flow.reject(&addr(100), &second.id).await.unwrap();
        let _ = flow.approve(&addr(100), &first.id).await;

        assert!(flow.locks.is_empty());
        assert!(flow.wallet_locks.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let ledger = Arc::new(InMemoryLedger::new(addr(100)));
        let flow = workflow(ledger, Arc::new(InMemoryRequestStore::new()));
        let err = flow.approve(&addr(100), "missing").await.unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound(_)));
    }
}
