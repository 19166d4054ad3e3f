//! In-memory reference ledger.
//!
//! Enforces the same rules as the deployed contract so the governance core
//! can be exercised without a network. A single write lock serialises all
//! transactions, which makes this ledger the arbiter of vote ordering just
//! like the real one.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::traits::*;
use crate::types::*;

/// Default quorum for a fresh ledger.
pub const DEFAULT_MIN_REQUIRED_VOTES: u32 = 3;

/// A transaction from another client, mined ahead of the next write.
#[derive(Debug, Clone)]
pub enum ExternalTx {
    /// Another member's vote
    Vote {
        voter: Address,
        paper_id: PaperId,
        approve: bool,
        comment: String,
    },
    /// Another admin adding a member
    AddMember { member: Address },
}

#[derive(Debug, Clone)]
struct PaperEntry {
    details: PaperDetails,
    status: PaperStatus,
    voters: Vec<Address>,
    comments: HashMap<Address, String>,
    successor: Option<PaperId>,
}

#[derive(Debug)]
struct LedgerState {
    owner: Address,
    min_required_votes: u32,
    staking_amount: Amount,
    papers: Vec<PaperEntry>,
    members: HashMap<Address, bool>,
    member_index: Vec<Address>,
    locked: Amount,
    forfeited: Amount,
    payouts: HashMap<Address, Amount>,
    tx_counter: u64,
    front_run: Vec<ExternalTx>,
}

impl LedgerState {
    fn paper(&self, id: PaperId) -> Result<&PaperEntry, LedgerError> {
        id.get()
            .checked_sub(1)
            .and_then(|idx| self.papers.get(idx as usize))
            .ok_or(LedgerError::PaperNotFound(id))
    }

    fn paper_mut(&mut self, id: PaperId) -> Result<&mut PaperEntry, LedgerError> {
        id.get()
            .checked_sub(1)
            .and_then(|idx| self.papers.get_mut(idx as usize))
            .ok_or(LedgerError::PaperNotFound(id))
    }

    fn receipt(&mut self, paper_id: Option<PaperId>) -> TxReceipt {
        self.tx_counter += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.tx_counter.to_be_bytes());
        TxReceipt {
            tx_hash: format!("0x{}", hex::encode(hasher.finalize())),
            paper_id,
        }
    }

    fn create_paper(
        &mut self,
        author: &Address,
        paper: NewPaper,
        stake: Amount,
        previous: Option<PaperId>,
    ) -> PaperId {
        let id = PaperId(self.papers.len() as u64 + 1);
        self.papers.push(PaperEntry {
            details: PaperDetails {
                id,
                author: author.clone(),
                title: paper.title,
                fingerprint: paper.fingerprint,
                price: paper.price,
                team_members: paper.team_members,
                research_field: paper.research_field,
                is_approved: false,
                is_revision: previous.is_some(),
                previous_version: previous,
            },
            status: PaperStatus {
                stake: StakeInfo {
                    amount: stake,
                    ..Default::default()
                },
                ..Default::default()
            },
            voters: Vec::new(),
            comments: HashMap::new(),
            successor: None,
        });
        self.locked = self.locked.checked_add(stake).unwrap_or(self.locked);
        id
    }

    fn apply_vote(
        &mut self,
        caller: &Address,
        paper_id: PaperId,
        approve: bool,
        comment: &str,
    ) -> Result<(), LedgerError> {
        let quorum = self.min_required_votes;
        let is_member = self.members.get(caller).copied().unwrap_or(false);
        let entry = self.paper_mut(paper_id)?;

        if !is_member {
            return Err(LedgerError::Rejected(Rejection::NotMember));
        }
        if entry.status.is_decided {
            return Err(LedgerError::Rejected(Rejection::AlreadyDecided));
        }
        if entry.voters.contains(caller) {
            return Err(LedgerError::Rejected(Rejection::AlreadyVoted));
        }
        if comment.trim().is_empty() {
            return Err(LedgerError::Rejected(Rejection::EmptyComment));
        }

        entry.voters.push(caller.clone());
        entry.comments.insert(caller.clone(), comment.to_string());
        if approve {
            entry.status.approval_count += 1;
        } else {
            entry.status.rejection_count += 1;
        }

        // Quorum is only ever evaluated here, inside the vote itself.
        if entry.status.total_votes() >= quorum {
            let approved = entry.status.approval_count > entry.status.rejection_count;
            entry.status.is_decided = true;
            entry.status.is_approved = approved;
            entry.details.is_approved = approved;
            info!(
                paper_id = %paper_id,
                approvals = entry.status.approval_count,
                rejections = entry.status.rejection_count,
                approved,
                "Paper decided"
            );
        }

        Ok(())
    }

    fn apply_add_member(&mut self, member: &Address) -> Result<(), LedgerError> {
        if self.members.get(member).copied().unwrap_or(false) {
            return Err(LedgerError::Rejected(Rejection::AlreadyMember));
        }
        self.members.insert(member.clone(), true);
        self.member_index.push(member.clone());
        Ok(())
    }

    fn drain_front_run(&mut self) {
        for tx in std::mem::take(&mut self.front_run) {
            let result = match &tx {
                ExternalTx::Vote {
                    voter,
                    paper_id,
                    approve,
                    comment,
                } => self.apply_vote(voter, *paper_id, *approve, comment),
                ExternalTx::AddMember { member } => self.apply_add_member(member),
            };
            debug!(tx = ?tx, ok = result.is_ok(), "Mined external transaction");
        }
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    submit: AtomicU32,
    vote: AtomicU32,
    resubmit: AtomicU32,
    claim: AtomicU32,
    add_member: AtomicU32,
}

/// In-memory ledger for development and tests.
///
/// Configurable failure behaviour mirrors what a remote ledger client can
/// do: go away entirely, drop reads transiently, or confirm a write late.
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
    available: AtomicBool,
    failing_reads: AtomicU32,
    response_delay_ms: AtomicU64,
    calls: CallCounters,
}

impl InMemoryLedger {
    /// Create a ledger owned by `owner`.
    pub fn new(owner: Address) -> Self {
        Self {
            state: RwLock::new(LedgerState {
                owner,
                min_required_votes: DEFAULT_MIN_REQUIRED_VOTES,
                staking_amount: Amount::from_base_units(10_000_000_000_000_000),
                papers: Vec::new(),
                members: HashMap::new(),
                member_index: Vec::new(),
                locked: Amount::ZERO,
                forfeited: Amount::ZERO,
                payouts: HashMap::new(),
                tx_counter: 0,
                front_run: Vec::new(),
            }),
            available: AtomicBool::new(true),
            failing_reads: AtomicU32::new(0),
            response_delay_ms: AtomicU64::new(0),
            calls: CallCounters::default(),
        }
    }

    /// Set the quorum.
    pub fn with_min_required_votes(mut self, votes: u32) -> Self {
        self.state.get_mut().min_required_votes = votes;
        self
    }

    /// Set the required stake.
    pub fn with_staking_amount(mut self, amount: Amount) -> Self {
        self.state.get_mut().staking_amount = amount;
        self
    }

    /// Seed committee members.
    pub fn with_members(mut self, members: impl IntoIterator<Item = Address>) -> Self {
        let state = self.state.get_mut();
        for member in members {
            let _ = state.apply_add_member(&member);
        }
        self
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `count` view calls with a network error.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Apply writes immediately but answer only after `delay`.
    pub fn set_response_delay(&self, delay: Duration) {
        self.response_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Mine `tx` just before the next write is applied.
    pub async fn front_run_next_write(&self, tx: ExternalTx) {
        self.state.write().await.front_run.push(tx);
    }

    /// Number of `addMember` calls received (accepted or not).
    pub fn add_member_calls(&self) -> u32 {
        self.calls.add_member.load(Ordering::SeqCst)
    }

    /// Number of `voteOnPaper` calls received.
    pub fn vote_calls(&self) -> u32 {
        self.calls.vote.load(Ordering::SeqCst)
    }

    /// Number of `claimStake` calls received.
    pub fn claim_calls(&self) -> u32 {
        self.calls.claim.load(Ordering::SeqCst)
    }

    /// Number of `submitPaper` plus `resubmitPaper` calls received.
    pub fn submission_calls(&self) -> u32 {
        self.calls.submit.load(Ordering::SeqCst) + self.calls.resubmit.load(Ordering::SeqCst)
    }

    /// Total stake paid out to `who`.
    pub async fn paid_out_to(&self, who: &Address) -> Amount {
        self.state
            .read()
            .await
            .payouts
            .get(who)
            .copied()
            .unwrap_or_default()
    }

    /// Total stake forfeited.
    pub async fn forfeited_total(&self) -> Amount {
        self.state.read().await.forfeited
    }

    /// Stake currently locked.
    pub async fn locked_total(&self) -> Amount {
        self.state.read().await.locked
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::Unavailable("In-memory ledger disabled".to_string()))
        }
    }

    fn check_read(&self) -> Result<(), LedgerError> {
        self.check_available()?;
        let injected = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LedgerError::Network("Injected read failure".to_string()));
        }
        Ok(())
    }

    async fn respond<T>(&self, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
        let delay = self.response_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        result
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    fn id(&self) -> &str {
        "in-memory"
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn submit_paper(
        &self,
        caller: &Address,
        paper: NewPaper,
        stake: Amount,
    ) -> Result<TxReceipt, LedgerError> {
        self.calls.submit.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let result = {
            let mut state = self.state.write().await;
            state.drain_front_run();
            if stake != state.staking_amount {
                Err(LedgerError::Rejected(Rejection::IncorrectStake))
            } else {
                let id = state.create_paper(caller, paper, stake, None);
                debug!(paper_id = %id, author = %caller, "Paper submitted");
                Ok(state.receipt(Some(id)))
            }
        };

        self.respond(result).await
    }

    async fn vote_on_paper(
        &self,
        caller: &Address,
        paper_id: PaperId,
        approve: bool,
        comment: &str,
    ) -> Result<TxReceipt, LedgerError> {
        self.calls.vote.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let result = {
            let mut state = self.state.write().await;
            state.drain_front_run();
            state
                .apply_vote(caller, paper_id, approve, comment)
                .map(|_| state.receipt(None))
        };

        self.respond(result).await
    }

    async fn resubmit_paper(
        &self,
        caller: &Address,
        previous: PaperId,
        paper: NewPaper,
        stake: Amount,
    ) -> Result<TxReceipt, LedgerError> {
        self.calls.resubmit.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let result = {
            let mut state = self.state.write().await;
            state.drain_front_run();
            let staking_amount = state.staking_amount;
            let checked = state.paper(previous).and_then(|entry| {
                if !entry.status.is_decided || entry.status.is_approved {
                    Err(LedgerError::Rejected(Rejection::NotRejected))
                } else if entry.details.author != *caller {
                    Err(LedgerError::Rejected(Rejection::NotAuthor))
                } else if entry.successor.is_some() {
                    Err(LedgerError::Rejected(Rejection::AlreadyRevised))
                } else if stake != staking_amount {
                    Err(LedgerError::Rejected(Rejection::IncorrectStake))
                } else {
                    Ok(())
                }
            });

            match checked {
                Ok(()) => {
                    let id = state.create_paper(caller, paper, stake, Some(previous));
                    state.paper_mut(previous)?.successor = Some(id);
                    debug!(paper_id = %id, previous = %previous, "Paper resubmitted");
                    Ok(state.receipt(Some(id)))
                }
                Err(e) => Err(e),
            }
        };

        self.respond(result).await
    }

    async fn claim_stake(&self, caller: &Address, paper_id: PaperId) -> Result<TxReceipt, LedgerError> {
        self.calls.claim.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let result = {
            let mut state = self.state.write().await;
            state.drain_front_run();
            let owner = state.owner.clone();
            let entry = state.paper(paper_id)?;
            let status = entry.status;
            let author = entry.details.author.clone();

            if !status.is_decided {
                Err(LedgerError::Rejected(Rejection::NotDecided))
            } else if status.stake.is_settled() {
                Err(LedgerError::Rejected(Rejection::StakeAlreadySettled))
            } else if status.is_approved && *caller != author {
                Err(LedgerError::Rejected(Rejection::NotAuthor))
            } else if !status.is_approved && *caller != owner {
                Err(LedgerError::Rejected(Rejection::NotOwner))
            } else {
                let amount = status.stake.amount;
                state.locked = state.locked.saturating_sub(amount);
                if status.is_approved {
                    let paid = state.payouts.entry(author.clone()).or_default();
                    *paid = paid.checked_add(amount).unwrap_or(*paid);
                    state.paper_mut(paper_id)?.status.stake.stake_returned = true;
                    info!(paper_id = %paper_id, author = %author, amount = %amount, "Stake returned");
                } else {
                    state.forfeited = state.forfeited.checked_add(amount).unwrap_or(state.forfeited);
                    state.paper_mut(paper_id)?.status.stake.forfeited = true;
                    info!(paper_id = %paper_id, amount = %amount, "Stake forfeited");
                }
                Ok(state.receipt(None))
            }
        };

        self.respond(result).await
    }

    async fn add_member(&self, caller: &Address, member: &Address) -> Result<TxReceipt, LedgerError> {
        self.calls.add_member.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let result = {
            let mut state = self.state.write().await;
            state.drain_front_run();
            if *caller != state.owner {
                Err(LedgerError::Rejected(Rejection::NotOwner))
            } else {
                state.apply_add_member(member).map(|_| state.receipt(None))
            }
        };

        self.respond(result).await
    }

    async fn get_paper_details(&self, paper_id: PaperId) -> Result<PaperDetails, LedgerError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state.paper(paper_id)?.details.clone())
    }

    async fn get_paper_status(&self, paper_id: PaperId) -> Result<PaperStatus, LedgerError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state.paper(paper_id)?.status)
    }

    async fn get_paper_voters(&self, paper_id: PaperId) -> Result<Vec<Address>, LedgerError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state.paper(paper_id)?.voters.clone())
    }

    async fn get_paper_comment(&self, paper_id: PaperId, voter: &Address) -> Result<String, LedgerError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state
            .paper(paper_id)?
            .comments
            .get(voter)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_paper_revision_history(&self, paper_id: PaperId) -> Result<Vec<PaperId>, LedgerError> {
        self.check_read()?;
        let state = self.state.read().await;
        let bound = state.papers.len();

        let mut root = state.paper(paper_id)?;
        let mut steps = 0;
        while let Some(prev) = root.details.previous_version {
            root = state.paper(prev)?;
            steps += 1;
            if steps > bound {
                return Err(LedgerError::Parse(format!("revision chain of {} does not terminate", paper_id)));
            }
        }

        let mut history = vec![root.details.id];
        let mut current = root;
        while let Some(next) = current.successor {
            current = state.paper(next)?;
            history.push(next);
            if history.len() > bound {
                return Err(LedgerError::Parse(format!("revision chain of {} does not terminate", paper_id)));
            }
        }

        Ok(history)
    }

    async fn get_latest_revision(&self, paper_id: PaperId) -> Result<PaperId, LedgerError> {
        let history = self.get_paper_revision_history(paper_id).await?;
        Ok(history.last().copied().unwrap_or(paper_id))
    }

    async fn is_member(&self, who: &Address) -> Result<bool, LedgerError> {
        self.check_read()?;
        Ok(self.state.read().await.members.get(who).copied().unwrap_or(false))
    }

    async fn total_members(&self) -> Result<u64, LedgerError> {
        self.check_read()?;
        Ok(self.state.read().await.member_index.len() as u64)
    }

    async fn get_member_by_index(&self, index: u64) -> Result<Address, LedgerError> {
        self.check_read()?;
        self.state
            .read()
            .await
            .member_index
            .get(index as usize)
            .cloned()
            .ok_or(LedgerError::MemberIndexOutOfRange(index))
    }

    async fn min_required_votes(&self) -> Result<u32, LedgerError> {
        self.check_read()?;
        Ok(self.state.read().await.min_required_votes)
    }

    async fn staking_amount(&self) -> Result<Amount, LedgerError> {
        self.check_read()?;
        Ok(self.state.read().await.staking_amount)
    }

    async fn paper_count(&self) -> Result<u64, LedgerError> {
        self.check_read()?;
        Ok(self.state.read().await.papers.len() as u64)
    }

    async fn owner(&self) -> Result<Address, LedgerError> {
        self.check_read()?;
        Ok(self.state.read().await.owner.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    async fn ledger_with_paper(quorum: u32) -> (InMemoryLedger, PaperId) {
        let ledger = InMemoryLedger::new(addr(1))
            .with_min_required_votes(quorum)
            .with_members((10..15).map(addr));
        let stake = ledger.staking_amount().await.unwrap();
        let receipt = ledger
            .submit_paper(&addr(2), NewPaper::new("Paper", Fingerprint::new("H1"), Amount::ZERO), stake)
            .await
            .unwrap();
        (ledger, receipt.paper_id.unwrap())
    }

    #[tokio::test]
    async fn test_submit_requires_exact_stake() {
        let ledger = InMemoryLedger::new(addr(1));
        let result = ledger
            .submit_paper(&addr(2), NewPaper::new("P", Fingerprint::new("H"), Amount::ZERO), Amount::from_whole(1))
            .await;
        assert_eq!(result, Err(LedgerError::Rejected(Rejection::IncorrectStake)));
        assert_eq!(ledger.paper_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_quorum_tie_is_not_approved() {
        let (ledger, id) = ledger_with_paper(4).await;
        for (voter, approve) in [(10, true), (11, true), (12, false), (13, false)] {
            ledger.vote_on_paper(&addr(voter), id, approve, "ok").await.unwrap();
        }
        let status = ledger.get_paper_status(id).await.unwrap();
        assert!(status.is_decided);
        assert!(!status.is_approved);
        assert_eq!(status.approval_count, 2);
        assert_eq!(status.rejection_count, 2);
    }

    #[tokio::test]
    async fn test_vote_rules() {
        let (ledger, id) = ledger_with_paper(3).await;

        assert_eq!(
            ledger.vote_on_paper(&addr(99), id, true, "hi").await,
            Err(LedgerError::Rejected(Rejection::NotMember))
        );
        assert_eq!(
            ledger.vote_on_paper(&addr(10), id, true, "  ").await,
            Err(LedgerError::Rejected(Rejection::EmptyComment))
        );
        ledger.vote_on_paper(&addr(10), id, true, "good").await.unwrap();
        assert_eq!(
            ledger.vote_on_paper(&addr(10), id, false, "again").await,
            Err(LedgerError::Rejected(Rejection::AlreadyVoted))
        );
        assert_eq!(ledger.get_paper_voters(id).await.unwrap(), vec![addr(10)]);
        assert_eq!(ledger.get_paper_comment(id, &addr(10)).await.unwrap(), "good");
    }

    #[tokio::test]
    async fn test_claim_is_single_shot() {
        let (ledger, id) = ledger_with_paper(1).await;
        ledger.vote_on_paper(&addr(10), id, true, "fine").await.unwrap();

        let stake = ledger.staking_amount().await.unwrap();
        ledger.claim_stake(&addr(2), id).await.unwrap();
        assert_eq!(
            ledger.claim_stake(&addr(2), id).await,
            Err(LedgerError::Rejected(Rejection::StakeAlreadySettled))
        );
        assert_eq!(ledger.paid_out_to(&addr(2)).await, stake);
        assert_eq!(ledger.locked_total().await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_revision_chain_views() {
        let (ledger, first) = ledger_with_paper(1).await;
        let stake = ledger.staking_amount().await.unwrap();
        ledger.vote_on_paper(&addr(10), first, false, "no").await.unwrap();

        let second = ledger
            .resubmit_paper(&addr(2), first, NewPaper::new("Paper v2", Fingerprint::new("H2"), Amount::ZERO), stake)
            .await
            .unwrap()
            .paper_id
            .unwrap();

        assert_eq!(
            ledger
                .resubmit_paper(&addr(2), first, NewPaper::new("v2b", Fingerprint::new("H3"), Amount::ZERO), stake)
                .await,
            Err(LedgerError::Rejected(Rejection::AlreadyRevised))
        );

        let details = ledger.get_paper_details(second).await.unwrap();
        assert!(details.is_revision);
        assert_eq!(details.previous_version, Some(first));
        assert!(ledger.get_paper_voters(second).await.unwrap().is_empty());

        assert_eq!(ledger.get_paper_revision_history(second).await.unwrap(), vec![first, second]);
        assert_eq!(ledger.get_latest_revision(first).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_front_run_and_unavailable() {
        let (ledger, id) = ledger_with_paper(3).await;
        ledger
            .front_run_next_write(ExternalTx::Vote {
                voter: addr(10),
                paper_id: id,
                approve: true,
                comment: "first".into(),
            })
            .await;
        assert_eq!(
            ledger.vote_on_paper(&addr(10), id, true, "second").await,
            Err(LedgerError::Rejected(Rejection::AlreadyVoted))
        );

        ledger.set_available(false);
        assert!(matches!(ledger.paper_count().await, Err(LedgerError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_injected_read_failures_are_consumed() {
        let ledger = InMemoryLedger::new(addr(1));
        ledger.fail_next_reads(2);
        assert!(ledger.paper_count().await.is_err());
        assert!(ledger.paper_count().await.is_err());
        assert_eq!(ledger.paper_count().await.unwrap(), 0);
    }
}
