//! Revision chains read back from a ledger that answers inconsistently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use governance::config::CallConfig;
use governance::engine::{GovernanceEngine, PendingWrite, WriteStatus};
use governance::{ErrorKind, GovernanceError};
use ledger::{
    Address, Amount, Fingerprint, InMemoryLedger, LedgerError, LedgerGateway, NewPaper, PaperDetails, PaperId,
    PaperStatus, TxReceipt,
};

const OWNER: u64 = 100;
const AUTHOR: u64 = 1;

fn addr(n: u64) -> Address {
    Address::from_low_u64(n)
}

/// Delegates to an in-memory ledger but lets a test override chain reads.
struct Tampered {
    inner: Arc<InMemoryLedger>,
    history: Mutex<HashMap<PaperId, Vec<PaperId>>>,
    latest: Mutex<HashMap<PaperId, PaperId>>,
    back_pointers: Mutex<HashMap<PaperId, Option<PaperId>>>,
}

impl Tampered {
    fn new(inner: Arc<InMemoryLedger>) -> Self {
        Self {
            inner,
            history: Mutex::new(HashMap::new()),
            latest: Mutex::new(HashMap::new()),
            back_pointers: Mutex::new(HashMap::new()),
        }
    }

    fn history_of(&self, id: u64, history: &[u64]) {
        self.history
            .lock()
            .unwrap()
            .insert(PaperId(id), history.iter().copied().map(PaperId).collect());
    }

    fn latest_of(&self, id: u64, latest: u64) {
        self.latest.lock().unwrap().insert(PaperId(id), PaperId(latest));
    }

    fn back_pointer_of(&self, id: u64, previous: Option<u64>) {
        self.back_pointers
            .lock()
            .unwrap()
            .insert(PaperId(id), previous.map(PaperId));
    }
}

#[async_trait]
impl LedgerGateway for Tampered {
    fn id(&self) -> &str {
        "tampered"
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn submit_paper(&self, caller: &Address, paper: NewPaper, stake: Amount) -> Result<TxReceipt, LedgerError> {
        self.inner.submit_paper(caller, paper, stake).await
    }

    async fn vote_on_paper(
        &self,
        caller: &Address,
        paper_id: PaperId,
        approve: bool,
        comment: &str,
    ) -> Result<TxReceipt, LedgerError> {
        self.inner.vote_on_paper(caller, paper_id, approve, comment).await
    }

    async fn resubmit_paper(
        &self,
        caller: &Address,
        previous: PaperId,
        paper: NewPaper,
        stake: Amount,
    ) -> Result<TxReceipt, LedgerError> {
        self.inner.resubmit_paper(caller, previous, paper, stake).await
    }

    async fn claim_stake(&self, caller: &Address, paper_id: PaperId) -> Result<TxReceipt, LedgerError> {
        self.inner.claim_stake(caller, paper_id).await
    }

    async fn add_member(&self, caller: &Address, member: &Address) -> Result<TxReceipt, LedgerError> {
        self.inner.add_member(caller, member).await
    }

    async fn get_paper_details(&self, paper_id: PaperId) -> Result<PaperDetails, LedgerError> {
        let mut details = self.inner.get_paper_details(paper_id).await?;
        if let Some(previous) = self.back_pointers.lock().unwrap().get(&paper_id) {
            details.previous_version = *previous;
            details.is_revision = previous.is_some();
        }
        Ok(details)
    }

    async fn get_paper_status(&self, paper_id: PaperId) -> Result<PaperStatus, LedgerError> {
        self.inner.get_paper_status(paper_id).await
    }

    async fn get_paper_voters(&self, paper_id: PaperId) -> Result<Vec<Address>, LedgerError> {
        self.inner.get_paper_voters(paper_id).await
    }

    async fn get_paper_comment(&self, paper_id: PaperId, voter: &Address) -> Result<String, LedgerError> {
        self.inner.get_paper_comment(paper_id, voter).await
    }

    async fn get_paper_revision_history(&self, paper_id: PaperId) -> Result<Vec<PaperId>, LedgerError> {
        let forced = self.history.lock().unwrap().get(&paper_id).cloned();
        match forced {
            Some(history) => Ok(history),
            None => self.inner.get_paper_revision_history(paper_id).await,
        }
    }

    async fn get_latest_revision(&self, paper_id: PaperId) -> Result<PaperId, LedgerError> {
        let forced = self.latest.lock().unwrap().get(&paper_id).copied();
        match forced {
            Some(latest) => Ok(latest),
            None => self.inner.get_latest_revision(paper_id).await,
        }
    }

    async fn is_member(&self, who: &Address) -> Result<bool, LedgerError> {
        self.inner.is_member(who).await
    }

    async fn total_members(&self) -> Result<u64, LedgerError> {
        self.inner.total_members().await
    }

    async fn get_member_by_index(&self, index: u64) -> Result<Address, LedgerError> {
        self.inner.get_member_by_index(index).await
    }

    async fn min_required_votes(&self) -> Result<u32, LedgerError> {
        self.inner.min_required_votes().await
    }

    async fn staking_amount(&self) -> Result<Amount, LedgerError> {
        self.inner.staking_amount().await
    }

    async fn paper_count(&self) -> Result<u64, LedgerError> {
        self.inner.paper_count().await
    }

    async fn owner(&self) -> Result<Address, LedgerError> {
        self.inner.owner().await
    }
}

fn calls() -> CallConfig {
    CallConfig {
        write_timeout_ms: 500,
        read_retry_count: 1,
        read_retry_delay_ms: 1,
        max_concurrent_reads: 4,
    }
}

/// Three papers: 1 rejected and revised by 2, plus an unrelated 3.
async fn chained() -> (Arc<Tampered>, GovernanceEngine) {
    let inner = Arc::new(
        InMemoryLedger::new(addr(OWNER))
            .with_min_required_votes(1)
            .with_members([addr(10)]),
    );
    let ledger = Arc::new(Tampered::new(inner));
    let engine = GovernanceEngine::new(ledger.clone(), calls());
    let stake = engine.staking_amount().await.unwrap();
    let author = addr(AUTHOR);

    let first = engine
        .submit_paper(&author, NewPaper::new("v1", Fingerprint::new("H1"), Amount::ZERO), stake)
        .await
        .unwrap()
        .paper_id;
    engine.cast_vote(&addr(10), first, false, "weak").await.unwrap();
    engine
        .resubmit(&author, first, NewPaper::new("v2", Fingerprint::new("H2"), Amount::ZERO), stake)
        .await
        .unwrap();
    engine
        .submit_paper(&author, NewPaper::new("other", Fingerprint::new("H3"), Amount::ZERO), stake)
        .await
        .unwrap();
    (ledger, engine)
}

fn assert_malformed(err: GovernanceError) {
    assert_eq!(err.kind(), ErrorKind::MalformedChain, "unexpected error: {err}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_consistent_chain_is_accepted() {
    let (_, engine) = chained().await;
    let (history, latest) = engine.revision_chain(PaperId(1)).await.unwrap();
    assert_eq!(history, vec![PaperId(1), PaperId(2)]);
    assert_eq!(latest, PaperId(2));
    assert_eq!(engine.latest_revision(PaperId(3)).await.unwrap(), PaperId(3));
}

#[tokio::test]
async fn test_history_out_of_order() {
    let (ledger, engine) = chained().await;
    ledger.history_of(1, &[2, 1]);
    assert_malformed(engine.revision_history(PaperId(1)).await.unwrap_err());
}

#[tokio::test]
async fn test_history_beyond_paper_count() {
    let (ledger, engine) = chained().await;
    ledger.history_of(1, &[1, 7]);
    assert_malformed(engine.revision_history(PaperId(1)).await.unwrap_err());
}

#[tokio::test]
async fn test_history_missing_requested_paper() {
    let (ledger, engine) = chained().await;
    ledger.history_of(3, &[1, 2]);
    assert_malformed(engine.revision_history(PaperId(3)).await.unwrap_err());
}

#[tokio::test]
async fn test_empty_history() {
    let (ledger, engine) = chained().await;
    ledger.history_of(3, &[]);
    assert_malformed(engine.revision_history(PaperId(3)).await.unwrap_err());
}

#[tokio::test]
async fn test_back_pointer_disagrees_with_history() {
    let (ledger, engine) = chained().await;
    // Paper 3 claims to revise paper 1 while the history says 2 does.
    ledger.history_of(1, &[1, 3]);
    ledger.back_pointer_of(3, None);
    assert_malformed(engine.revision_history(PaperId(1)).await.unwrap_err());

    ledger.history_of(1, &[1, 2]);
    ledger.back_pointer_of(2, Some(2));
    assert_malformed(engine.revision_history(PaperId(1)).await.unwrap_err());
}

#[tokio::test]
async fn test_latest_not_at_end_of_history() {
    let (ledger, engine) = chained().await;
    ledger.latest_of(1, 3);
    assert_malformed(engine.revision_chain(PaperId(1)).await.unwrap_err());
}

#[tokio::test]
async fn test_arena_rejects_self_loop_and_forward_pointer() {
    let (ledger, engine) = chained().await;
    ledger.back_pointer_of(3, Some(3));
    let arena = engine.revision_arena().await.unwrap();
    assert_malformed(arena.history(PaperId(3)).unwrap_err());
    assert_eq!(arena.history(PaperId(2)).unwrap(), vec![PaperId(1), PaperId(2)]);

    ledger.back_pointer_of(3, None);
    ledger.back_pointer_of(1, Some(2));
    let arena = engine.revision_arena().await.unwrap();
    assert_malformed(arena.root(PaperId(1)).unwrap_err());
    assert_malformed(arena.latest(PaperId(1)).unwrap_err());
    assert_eq!(arena.latest(PaperId(3)).unwrap(), PaperId(3));
}

#[tokio::test]
async fn test_check_write_on_broken_chain() {
    let (ledger, engine) = chained().await;
    ledger.latest_of(1, 3);
    let err = engine
        .check_write(&PendingWrite::Resubmit {
            author: addr(AUTHOR),
            previous: PaperId(1),
        })
        .await
        .unwrap_err();
    assert_malformed(err);

    ledger.latest.lock().unwrap().clear();
    let status = engine
        .check_write(&PendingWrite::Resubmit {
            author: addr(AUTHOR),
            previous: PaperId(1),
        })
        .await
        .unwrap();
    assert_eq!(status, WriteStatus::Landed { paper_id: Some(PaperId(2)) });
}
