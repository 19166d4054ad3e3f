//! Paper lifecycle derived from ledger status.
//!
//! ```text
//!   Submitted ──vote──▶ Voting ──quorum──▶ Decided(outcome) ──claim──▶ Settled
//!       └────────────────quorum of one──────────▲
//! ```
//!
//! The ledger is authoritative; nothing here mutates anything. The pre-check
//! functions mirror the ledger's own refusal order so a failed pre-check
//! names the same invariant the ledger would have.

use ledger::{Address, PaperDetails, PaperStatus};
use serde::{Deserialize, Serialize};

use crate::error::{GovernanceError, Result, Violation};

/// Decision outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    Rejected,
}

/// How a decided paper's stake was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    /// Approved paper; stake went back to the author
    StakeReturned,
    /// Rejected paper; stake went to the treasury
    StakeForfeited,
}

/// Lifecycle state of one paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaperState {
    /// No votes yet
    Submitted,
    /// Votes cast, quorum not reached
    Voting { approvals: u32, rejections: u32 },
    /// Quorum reached, stake not settled
    Decided { outcome: Outcome },
    /// Decided and settled
    Settled { outcome: Outcome, settlement: Settlement },
}

impl PaperState {
    /// Derive the state from a status record.
    pub fn from_status(status: &PaperStatus) -> Self {
        if status.is_decided {
            let outcome = if status.is_approved {
                Outcome::Approved
            } else {
                Outcome::Rejected
            };
            if status.stake.stake_returned {
                PaperState::Settled {
                    outcome,
                    settlement: Settlement::StakeReturned,
                }
            } else if status.stake.forfeited {
                PaperState::Settled {
                    outcome,
                    settlement: Settlement::StakeForfeited,
                }
            } else {
                PaperState::Decided { outcome }
            }
        } else if status.total_votes() == 0 {
            PaperState::Submitted
        } else {
            PaperState::Voting {
                approvals: status.approval_count,
                rejections: status.rejection_count,
            }
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            PaperState::Decided { outcome } | PaperState::Settled { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.outcome().is_some()
    }

    /// Short label for listings.
    pub fn label(&self) -> &'static str {
        match self {
            PaperState::Submitted => "submitted",
            PaperState::Voting { .. } => "voting",
            PaperState::Decided { outcome: Outcome::Approved } => "approved",
            PaperState::Decided { outcome: Outcome::Rejected } => "rejected",
            PaperState::Settled { settlement: Settlement::StakeReturned, .. } => "stake_returned",
            PaperState::Settled { settlement: Settlement::StakeForfeited, .. } => "stake_forfeited",
        }
    }
}

/// Outcome once `approvals + rejections` reaches `quorum`.
///
/// A tie is not a majority and resolves to rejection.
pub fn quorum_outcome(approvals: u32, rejections: u32, quorum: u32) -> Option<Outcome> {
    if approvals + rejections < quorum {
        None
    } else if approvals > rejections {
        Some(Outcome::Approved)
    } else {
        Some(Outcome::Rejected)
    }
}

/// Structural sanity of a status record against the current quorum.
///
/// Returns a description of the first inconsistency found.
pub fn status_anomaly(status: &PaperStatus, voter_count: usize, quorum: u32) -> Option<String> {
    if status.total_votes() as usize != voter_count {
        return Some(format!(
            "{} votes counted but {} voters recorded",
            status.total_votes(),
            voter_count
        ));
    }
    if !status.is_decided && status.stake.is_settled() {
        return Some("stake settled on an undecided paper".to_string());
    }
    if status.is_decided {
        if let Some(outcome) = quorum_outcome(status.approval_count, status.rejection_count, quorum) {
            let recorded = if status.is_approved {
                Outcome::Approved
            } else {
                Outcome::Rejected
            };
            if outcome != recorded {
                return Some(format!("recorded {recorded:?} but counts give {outcome:?}"));
            }
        }
    }
    None
}

/// Pre-check for `castVote`.
pub fn check_vote(
    status: &PaperStatus,
    voters: &[Address],
    caller: &Address,
    caller_is_member: bool,
    comment: &str,
) -> Result<()> {
    if !caller_is_member {
        return Err(GovernanceError::violation(Violation::NotMember));
    }
    if status.is_decided {
        return Err(GovernanceError::violation(Violation::AlreadyDecided));
    }
    if voters.contains(caller) {
        return Err(GovernanceError::violation(Violation::AlreadyVoted));
    }
    if comment.trim().is_empty() {
        return Err(GovernanceError::violation(Violation::EmptyComment));
    }
    Ok(())
}

/// Pre-check for settlement; returns the settlement that will happen.
pub fn check_settle(
    details: &PaperDetails,
    status: &PaperStatus,
    owner: &Address,
    caller: &Address,
) -> Result<Settlement> {
    if !status.is_decided {
        return Err(GovernanceError::violation(Violation::NotDecided));
    }
    if status.stake.is_settled() {
        return Err(GovernanceError::violation(Violation::AlreadySettled));
    }
    if status.is_approved {
        if caller != &details.author {
            return Err(GovernanceError::violation_with(
                Violation::NotAuthor,
                "only the author reclaims an approved stake",
            ));
        }
        Ok(Settlement::StakeReturned)
    } else {
        if caller != owner {
            return Err(GovernanceError::violation_with(
                Violation::NotAuthorized,
                "only the ledger owner settles a rejected stake",
            ));
        }
        Ok(Settlement::StakeForfeited)
    }
}

/// Pre-check for resubmission of `details`.
///
/// `latest` is the newest revision reachable from `details.id`.
pub fn check_resubmit(
    details: &PaperDetails,
    status: &PaperStatus,
    latest: ledger::PaperId,
    caller: &Address,
) -> Result<()> {
    if !status.is_decided || status.is_approved {
        return Err(GovernanceError::violation(Violation::NotRejected));
    }
    if caller != &details.author {
        return Err(GovernanceError::violation(Violation::NotAuthor));
    }
    if latest != details.id {
        return Err(GovernanceError::violation_with(
            Violation::AlreadyRevised,
            format!("newest revision is paper {latest}"),
        ));
    }
    Ok(())
}
