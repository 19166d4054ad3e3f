//! Governance engine: the paper state machine over the ledger.
//!
//! Every write is preceded by the same invariant checks the ledger applies,
//! so an ordinary failure is reported before a transaction is sent. The
//! ledger stays the arbiter: when another client changes state between the
//! check and the write, the ledger's refusal comes back as a lost race.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ledger::{Address, Amount, Fingerprint, LedgerGateway, NewPaper, PaperDetails, PaperId, PaperStatus};

use crate::calls::CallPolicy;
use crate::chain::{validate_history, RevisionArena};
use crate::config::CallConfig;
use crate::error::{GovernanceError, Result, Violation};
use crate::state::{self, PaperState, Settlement};

/// A confirmed submission or resubmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub paper_id: PaperId,
    pub tx_hash: String,
}

/// A confirmed vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub paper_id: PaperId,
    pub tx_hash: String,
    /// State after the vote; absent if the follow-up read failed
    pub state: Option<PaperState>,
}

/// A confirmed settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub paper_id: PaperId,
    pub tx_hash: String,
    pub settlement: Settlement,
    pub amount: Amount,
}

/// Ledger details and status of one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperSnapshot {
    pub details: PaperDetails,
    pub status: PaperStatus,
    pub state: PaperState,
}

impl PaperSnapshot {
    fn new(details: PaperDetails, status: PaperStatus) -> Self {
        Self {
            state: PaperState::from_status(&status),
            details,
            status,
        }
    }
}

/// One recorded vote with its comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEntry {
    pub voter: Address,
    pub comment: String,
}

/// Committee-wide parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeInfo {
    pub owner: Address,
    pub min_required_votes: u32,
    pub staking_amount: Amount,
    pub total_members: u64,
    pub paper_count: u64,
}

/// A write whose outcome is unknown, described by what it would change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "write", rename_all = "snake_case")]
pub enum PendingWrite {
    /// `papers_before` is the paper count read before the write was sent
    Submit {
        author: Address,
        fingerprint: Fingerprint,
        papers_before: u64,
    },
    Resubmit { author: Address, previous: PaperId },
    Vote { paper_id: PaperId, voter: Address },
    Settle { paper_id: PaperId },
    AddMember { member: Address },
}

/// Whether a pending write is visible on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteStatus {
    Landed { paper_id: Option<PaperId> },
    NotLanded,
}

fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GovernanceError::violation_with(
            Violation::InvalidInput,
            format!("{field} must not be empty"),
        ));
    }
    Ok(())
}

/// Paper state machine over a ledger.
pub struct GovernanceEngine {
    ledger: Arc<dyn LedgerGateway>,
    policy: CallPolicy,
}

impl GovernanceEngine {
    pub fn new(ledger: Arc<dyn LedgerGateway>, config: CallConfig) -> Self {
        Self {
            ledger,
            policy: CallPolicy::new(config),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerGateway> {
        &self.ledger
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    // ---- reads ----

    pub async fn details(&self, paper_id: PaperId) -> Result<PaperDetails> {
        let ledger = &self.ledger;
        self.policy
            .ledger_read("getPaperDetails", || ledger.get_paper_details(paper_id))
            .await
    }

    pub async fn status(&self, paper_id: PaperId) -> Result<PaperStatus> {
        let ledger = &self.ledger;
        self.policy
            .ledger_read("getPaperStatus", || ledger.get_paper_status(paper_id))
            .await
    }

    pub async fn voters(&self, paper_id: PaperId) -> Result<Vec<Address>> {
        let ledger = &self.ledger;
        self.policy
            .ledger_read("getPaperVoters", || ledger.get_paper_voters(paper_id))
            .await
    }

    pub async fn is_member(&self, who: &Address) -> Result<bool> {
        let ledger = &self.ledger;
        self.policy.ledger_read("members", || ledger.is_member(who)).await
    }

    pub async fn owner(&self) -> Result<Address> {
        let ledger = &self.ledger;
        self.policy.ledger_read("owner", || ledger.owner()).await
    }

    pub async fn staking_amount(&self) -> Result<Amount> {
        let ledger = &self.ledger;
        self.policy
            .ledger_read("stakingAmount", || ledger.staking_amount())
            .await
    }

    pub async fn paper_count(&self) -> Result<u64> {
        let ledger = &self.ledger;
        self.policy.ledger_read("paperCount", || ledger.paper_count()).await
    }

    /// Current lifecycle state.
    pub async fn paper_state(&self, paper_id: PaperId) -> Result<PaperState> {
        Ok(PaperState::from_status(&self.status(paper_id).await?))
    }

    /// Details and status of one paper.
    pub async fn snapshot(&self, paper_id: PaperId) -> Result<PaperSnapshot> {
        let (details, status) = tokio::try_join!(self.details(paper_id), self.status(paper_id))?;
        Ok(PaperSnapshot::new(details, status))
    }

    /// Every paper on the ledger, oldest first.
    pub async fn snapshots(&self) -> Result<Vec<PaperSnapshot>> {
        let count = self.paper_count().await?;
        self.policy
            .fan_out((1..=count).map(PaperId), |id| self.snapshot(id))
            .await
            .into_iter()
            .collect()
    }

    /// Voters of a paper with their comments, in vote order.
    pub async fn reviews(&self, paper_id: PaperId) -> Result<Vec<ReviewEntry>> {
        let (voters, status, quorum) = tokio::try_join!(
            self.voters(paper_id),
            self.status(paper_id),
            self.min_required_votes()
        )?;
        if let Some(anomaly) = state::status_anomaly(&status, voters.len(), quorum) {
            warn!(paper_id = %paper_id, anomaly = %anomaly, "Ledger status inconsistent");
        }

        let ledger = &self.ledger;
        let policy = &self.policy;
        self.policy
            .fan_out(voters, |voter| async move {
                let comment = policy
                    .ledger_read("getPaperComment", || ledger.get_paper_comment(paper_id, &voter))
                    .await?;
                Ok::<_, GovernanceError>(ReviewEntry { voter, comment })
            })
            .await
            .into_iter()
            .collect()
    }

    pub async fn min_required_votes(&self) -> Result<u32> {
        let ledger = &self.ledger;
        self.policy
            .ledger_read("minRequiredVotes", || ledger.min_required_votes())
            .await
    }

    /// Committee-wide parameters.
    pub async fn committee(&self) -> Result<CommitteeInfo> {
        let ledger = &self.ledger;
        let total_members = self
            .policy
            .ledger_read("totalMembers", || ledger.total_members());
        let (owner, min_required_votes, staking_amount, total_members, paper_count) = tokio::try_join!(
            self.owner(),
            self.min_required_votes(),
            self.staking_amount(),
            total_members,
            self.paper_count()
        )?;
        Ok(CommitteeInfo {
            owner,
            min_required_votes,
            staking_amount,
            total_members,
            paper_count,
        })
    }

    // ---- revision chain ----

    /// Full revision chain containing `paper_id`, oldest first.
    ///
    /// The ledger's answer is checked for ordering and bounds, then each
    /// link is checked against the papers' own back-pointers.
    pub async fn revision_history(&self, paper_id: PaperId) -> Result<Vec<PaperId>> {
        let ledger = &self.ledger;
        let history = self
            .policy
            .ledger_read("getPaperRevisionHistory", || ledger.get_paper_revision_history(paper_id));
        let (history, count) = tokio::try_join!(history, self.paper_count())?;
        validate_history(&history, paper_id, count)?;

        let details: Vec<PaperDetails> = self
            .policy
            .fan_out(history.iter().copied(), |id| self.details(id))
            .await
            .into_iter()
            .collect::<Result<_>>()?;

        let mut expected_previous = None;
        for paper in &details {
            if paper.previous_version != expected_previous {
                return Err(GovernanceError::malformed(
                    paper.id,
                    format!(
                        "back-pointer {:?} disagrees with history predecessor {:?}",
                        paper.previous_version.map(PaperId::get),
                        expected_previous.map(PaperId::get)
                    ),
                ));
            }
            expected_previous = Some(paper.id);
        }
        Ok(history)
    }

    /// Validated history of `paper_id` together with its newest revision.
    pub async fn revision_chain(&self, paper_id: PaperId) -> Result<(Vec<PaperId>, PaperId)> {
        let ledger = &self.ledger;
        let latest = self
            .policy
            .ledger_read("getLatestRevision", || ledger.get_latest_revision(paper_id));
        let (latest, history) = tokio::try_join!(latest, self.revision_history(paper_id))?;
        match history.last() {
            Some(last) if *last == latest => Ok((history, latest)),
            _ => Err(GovernanceError::malformed(
                paper_id,
                format!("latest revision {latest} is not the end of its history"),
            )),
        }
    }

    /// Newest revision descending from `paper_id`.
    pub async fn latest_revision(&self, paper_id: PaperId) -> Result<PaperId> {
        Ok(self.revision_chain(paper_id).await?.1)
    }

    /// Arena over every paper on the ledger.
    pub async fn revision_arena(&self) -> Result<RevisionArena> {
        let snapshots = self.snapshots().await?;
        Ok(RevisionArena::from_records(
            snapshots.iter().map(|s| (&s.details, &s.status)),
        ))
    }

    // ---- writes ----

    async fn check_stake(&self, stake: Amount) -> Result<()> {
        let required = self.staking_amount().await?;
        if stake != required {
            return Err(GovernanceError::stake_mismatch(required, stake));
        }
        Ok(())
    }

    /// Submit a new paper with its stake.
    pub async fn submit_paper(&self, caller: &Address, paper: NewPaper, stake: Amount) -> Result<Submission> {
        require_non_empty(&paper.title, "title")?;
        require_non_empty(paper.fingerprint.as_str(), "fingerprint")?;
        self.check_stake(stake).await?;

        let receipt = self
            .policy
            .write("submitPaper", self.ledger.submit_paper(caller, paper, stake))
            .await?;
        let paper_id = receipt
            .paper_id
            .ok_or_else(|| GovernanceError::LedgerProtocol("submitPaper receipt has no paper id".into()))?;

        info!(paper_id = %paper_id, author = %caller, tx = %receipt.tx_hash, "Paper submitted");
        Ok(Submission {
            paper_id,
            tx_hash: receipt.tx_hash,
        })
    }

    /// Cast a vote. The vote that completes the quorum decides the paper.
    pub async fn cast_vote(
        &self,
        caller: &Address,
        paper_id: PaperId,
        approve: bool,
        comment: &str,
    ) -> Result<VoteReceipt> {
        let (is_member, status, voters) = tokio::try_join!(
            self.is_member(caller),
            self.status(paper_id),
            self.voters(paper_id)
        )?;
        state::check_vote(&status, &voters, caller, is_member, comment)?;

        let receipt = self
            .policy
            .write(
                "voteOnPaper",
                self.ledger.vote_on_paper(caller, paper_id, approve, comment),
            )
            .await?;

        let after = match self.paper_state(paper_id).await {
            Ok(after) => Some(after),
            Err(e) => {
                warn!(paper_id = %paper_id, error = %e, "Vote landed but state read failed");
                None
            }
        };
        if let Some(outcome) = after.and_then(|s| s.outcome()) {
            info!(paper_id = %paper_id, outcome = ?outcome, "Paper decided");
        }
        debug!(paper_id = %paper_id, voter = %caller, approve, "Vote cast");

        Ok(VoteReceipt {
            paper_id,
            tx_hash: receipt.tx_hash,
            state: after,
        })
    }

    /// Settle the stake of a decided paper.
    ///
    /// Approved papers return the stake to the author, who must be the
    /// caller. Rejected papers forfeit it; only the ledger owner may settle
    /// those. Settlement happens at most once.
    pub async fn resolve_and_settle(&self, caller: &Address, paper_id: PaperId) -> Result<SettlementReceipt> {
        let (details, status, owner) =
            tokio::try_join!(self.details(paper_id), self.status(paper_id), self.owner())?;
        let settlement = state::check_settle(&details, &status, &owner, caller)?;

        let receipt = self
            .policy
            .write("claimStake", self.ledger.claim_stake(caller, paper_id))
            .await?;

        info!(
            paper_id = %paper_id,
            settlement = ?settlement,
            amount = %status.stake.amount,
            "Stake settled"
        );
        Ok(SettlementReceipt {
            paper_id,
            tx_hash: receipt.tx_hash,
            settlement,
            amount: status.stake.amount,
        })
    }

    /// Submit a revision of a rejected paper.
    pub async fn resubmit(
        &self,
        caller: &Address,
        rejected: PaperId,
        paper: NewPaper,
        stake: Amount,
    ) -> Result<Submission> {
        require_non_empty(&paper.title, "title")?;
        require_non_empty(paper.fingerprint.as_str(), "fingerprint")?;

        let ledger = &self.ledger;
        let latest = self
            .policy
            .ledger_read("getLatestRevision", || ledger.get_latest_revision(rejected));
        let (details, status, latest) =
            tokio::try_join!(self.details(rejected), self.status(rejected), latest)?;
        state::check_resubmit(&details, &status, latest, caller)?;
        self.check_stake(stake).await?;

        let receipt = self
            .policy
            .write(
                "resubmitPaper",
                self.ledger.resubmit_paper(caller, rejected, paper, stake),
            )
            .await?;
        let paper_id = receipt
            .paper_id
            .ok_or_else(|| GovernanceError::LedgerProtocol("resubmitPaper receipt has no paper id".into()))?;

        info!(paper_id = %paper_id, previous = %rejected, author = %caller, "Paper resubmitted");
        Ok(Submission {
            paper_id,
            tx_hash: receipt.tx_hash,
        })
    }

    /// Look for the effect of a write that was not confirmed in time.
    pub async fn check_write(&self, pending: &PendingWrite) -> Result<WriteStatus> {
        let status = match pending {
            PendingWrite::Submit {
                author,
                fingerprint,
                papers_before,
            } => {
                let count = self.paper_count().await?;
                let details: Vec<PaperDetails> = self
                    .policy
                    .fan_out((papers_before + 1..=count).map(PaperId), |id| self.details(id))
                    .await
                    .into_iter()
                    .collect::<Result<_>>()?;
                details
                    .iter()
                    .find(|d| !d.is_revision && d.author == *author && d.fingerprint == *fingerprint)
                    .map_or(WriteStatus::NotLanded, |d| WriteStatus::Landed {
                        paper_id: Some(d.id),
                    })
            }
            PendingWrite::Resubmit { author, previous } => {
                let (history, latest) = self.revision_chain(*previous).await?;
                if latest == *previous {
                    WriteStatus::NotLanded
                } else {
                    let successor = history
                        .iter()
                        .position(|id| id == previous)
                        .and_then(|i| history.get(i + 1))
                        .copied();
                    match successor {
                        Some(id) if self.details(id).await?.author == *author => WriteStatus::Landed {
                            paper_id: Some(id),
                        },
                        _ => WriteStatus::NotLanded,
                    }
                }
            }
            PendingWrite::Vote { paper_id, voter } => {
                if self.voters(*paper_id).await?.contains(voter) {
                    WriteStatus::Landed { paper_id: Some(*paper_id) }
                } else {
                    WriteStatus::NotLanded
                }
            }
            PendingWrite::Settle { paper_id } => {
                if self.status(*paper_id).await?.stake.is_settled() {
                    WriteStatus::Landed { paper_id: Some(*paper_id) }
                } else {
                    WriteStatus::NotLanded
                }
            }
            PendingWrite::AddMember { member } => {
                if self.is_member(member).await? {
                    WriteStatus::Landed { paper_id: None }
                } else {
                    WriteStatus::NotLanded
                }
            }
        };
        debug!(pending = ?pending, status = ?status, "Checked pending write");
        Ok(status)
    }
}
