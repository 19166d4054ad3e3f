//! Core trait for the ledger contract surface.
//!
//! This module defines the `LedgerGateway` trait - the fixed, versioned
//! set of calls the governance core relies on - and the error type every
//! implementation reports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Refusal reasons the ledger itself enforces.
///
/// These surface when a write reaches the ledger and is reverted. The
/// governance core pre-checks most of them, so a `Rejection` coming back
/// from a write usually means another client got there first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    NotMember,
    AlreadyVoted,
    AlreadyDecided,
    EmptyComment,
    IncorrectStake,
    NotRejected,
    AlreadyRevised,
    NotDecided,
    StakeAlreadySettled,
    NotAuthor,
    NotOwner,
    AlreadyMember,
}

impl Rejection {
    const ALL: [Rejection; 12] = [
        Rejection::NotMember,
        Rejection::AlreadyVoted,
        Rejection::AlreadyDecided,
        Rejection::EmptyComment,
        Rejection::IncorrectStake,
        Rejection::NotRejected,
        Rejection::AlreadyRevised,
        Rejection::NotDecided,
        Rejection::StakeAlreadySettled,
        Rejection::NotAuthor,
        Rejection::NotOwner,
        Rejection::AlreadyMember,
    ];

    /// Revert reason string the ledger emits for this refusal.
    pub fn reason(self) -> &'static str {
        match self {
            Rejection::NotMember => "Only members can vote",
            Rejection::AlreadyVoted => "Already voted",
            Rejection::AlreadyDecided => "Paper already decided",
            Rejection::EmptyComment => "Comment required",
            Rejection::IncorrectStake => "Incorrect staking amount",
            Rejection::NotRejected => "Only rejected papers can be resubmitted",
            Rejection::AlreadyRevised => "Paper already has a revision",
            Rejection::NotDecided => "Paper not yet decided",
            Rejection::StakeAlreadySettled => "Stake already claimed",
            Rejection::NotAuthor => "Only the author can do this",
            Rejection::NotOwner => "Only owner",
            Rejection::AlreadyMember => "Already a member",
        }
    }

    /// Classify a revert message.
    ///
    /// Matching is case-insensitive and tolerates the `execution reverted: `
    /// prefix node clients add.
    pub fn from_reason(message: &str) -> Option<Self> {
        let lowered = message.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|r| lowered.contains(&r.reason().to_ascii_lowercase()))
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Error types for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Ledger client is not available
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Network error talking to the ledger
    #[error("Network error: {0}")]
    Network(String),

    /// The node answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Response could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// No paper with this id
    #[error("Paper {0} not found")]
    PaperNotFound(PaperId),

    /// Member index beyond `totalMembers`
    #[error("Member index {0} out of range")]
    MemberIndexOutOfRange(u64),

    /// The ledger refused the call
    #[error("Rejected by ledger: {0}")]
    Rejected(Rejection),

    /// Any other RPC-level error
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl LedgerError {
    /// Whether retrying the same read may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Unavailable(_) | LedgerError::Network(_) => true,
            LedgerError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the request reached the node, so a write may have been
    /// accepted even though no receipt came back.
    pub fn may_have_landed(&self) -> bool {
        match self {
            LedgerError::Network(_) => true,
            LedgerError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The ledger's refusal reason, if this is one.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            LedgerError::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}

/// Core trait for ledger access.
///
/// Write calls take the signing identity explicitly; there is no ambient
/// "current wallet". Every call is a suspension point against an external
/// system and may fail independently.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Identifier for logs (endpoint or "in-memory").
    fn id(&self) -> &str;

    /// Check if the ledger client is currently reachable.
    async fn is_available(&self) -> bool;

    // ---- writes ----

    /// `submitPaper`: create a paper and lock `stake`.
    async fn submit_paper(
        &self,
        caller: &Address,
        paper: NewPaper,
        stake: Amount,
    ) -> Result<TxReceipt, LedgerError>;

    /// `voteOnPaper`: append a vote and evaluate quorum.
    async fn vote_on_paper(
        &self,
        caller: &Address,
        paper_id: PaperId,
        approve: bool,
        comment: &str,
    ) -> Result<TxReceipt, LedgerError>;

    /// `resubmitPaper`: create a revision of a rejected paper.
    async fn resubmit_paper(
        &self,
        caller: &Address,
        previous: PaperId,
        paper: NewPaper,
        stake: Amount,
    ) -> Result<TxReceipt, LedgerError>;

    /// `claimStake`: settle the stake of a decided paper.
    async fn claim_stake(&self, caller: &Address, paper_id: PaperId) -> Result<TxReceipt, LedgerError>;

    /// `addMember`: add a committee member (owner only).
    async fn add_member(&self, caller: &Address, member: &Address) -> Result<TxReceipt, LedgerError>;

    // ---- views ----

    /// `getPaperDetails`
    async fn get_paper_details(&self, paper_id: PaperId) -> Result<PaperDetails, LedgerError>;

    /// `getPaperStatus`
    async fn get_paper_status(&self, paper_id: PaperId) -> Result<PaperStatus, LedgerError>;

    /// `getPaperVoters`, in vote order.
    async fn get_paper_voters(&self, paper_id: PaperId) -> Result<Vec<Address>, LedgerError>;

    /// `getPaperComment` for one voter.
    async fn get_paper_comment(&self, paper_id: PaperId, voter: &Address) -> Result<String, LedgerError>;

    /// `getPaperRevisionHistory`: the full chain containing `paper_id`,
    /// oldest first.
    async fn get_paper_revision_history(&self, paper_id: PaperId) -> Result<Vec<PaperId>, LedgerError>;

    /// `getLatestRevision`: newest descendant of `paper_id` (itself if none).
    async fn get_latest_revision(&self, paper_id: PaperId) -> Result<PaperId, LedgerError>;

    /// `members(address)`
    async fn is_member(&self, who: &Address) -> Result<bool, LedgerError>;

    /// `totalMembers`
    async fn total_members(&self) -> Result<u64, LedgerError>;

    /// `getMemberByIndex`
    async fn get_member_by_index(&self, index: u64) -> Result<Address, LedgerError>;

    /// `minRequiredVotes`
    async fn min_required_votes(&self) -> Result<u32, LedgerError>;

    /// `stakingAmount`
    async fn staking_amount(&self) -> Result<Amount, LedgerError>;

    /// `paperCount`; ids run from 1 to this value.
    async fn paper_count(&self) -> Result<u64, LedgerError>;

    /// `owner`
    async fn owner(&self) -> Result<Address, LedgerError>;
}
