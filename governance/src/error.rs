//! Error types for governance operations.
//!
//! Every failure reaching a caller falls into one of a small set of kinds.
//! Invariant violations stay distinct from each other so a UI can say
//! exactly what went wrong; infrastructure failures say which system was
//! unreachable.

use ledger::{Amount, LedgerError, PaperId, Rejection};
use metastore::StoreError;
use serde::{Deserialize, Serialize};

/// Result alias for governance operations.
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// A broken precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    NotMember,
    AlreadyVoted,
    AlreadyDecided,
    EmptyComment,
    StakeMismatch,
    NotRejected,
    AlreadyRevised,
    NotDecided,
    AlreadySettled,
    NotAuthor,
    /// Caller lacks owner or admin authority
    NotAuthorized,
    AlreadyMember,
    RequestNotPending,
    DuplicatePendingRequest,
    /// A required input is empty or malformed
    InvalidInput,
}

impl Violation {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Violation::NotMember => "not_member",
            Violation::AlreadyVoted => "already_voted",
            Violation::AlreadyDecided => "already_decided",
            Violation::EmptyComment => "empty_comment",
            Violation::StakeMismatch => "stake_mismatch",
            Violation::NotRejected => "not_rejected",
            Violation::AlreadyRevised => "already_revised",
            Violation::NotDecided => "not_decided",
            Violation::AlreadySettled => "already_settled",
            Violation::NotAuthor => "not_author",
            Violation::NotAuthorized => "not_authorized",
            Violation::AlreadyMember => "already_member",
            Violation::RequestNotPending => "request_not_pending",
            Violation::DuplicatePendingRequest => "duplicate_pending_request",
            Violation::InvalidInput => "invalid_input",
        }
    }

    /// Violations another client can cause between our pre-check and our
    /// write landing.
    pub fn is_race_prone(self) -> bool {
        matches!(
            self,
            Violation::AlreadyVoted
                | Violation::AlreadyDecided
                | Violation::AlreadyRevised
                | Violation::AlreadySettled
                | Violation::AlreadyMember
        )
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Violation::NotMember => "caller is not a committee member",
            Violation::AlreadyVoted => "caller already voted on this paper",
            Violation::AlreadyDecided => "paper is already decided",
            Violation::EmptyComment => "a review comment is required",
            Violation::StakeMismatch => "stake does not equal the required staking amount",
            Violation::NotRejected => "only rejected papers can be resubmitted",
            Violation::AlreadyRevised => "paper already has a revision",
            Violation::NotDecided => "paper is not decided yet",
            Violation::AlreadySettled => "stake is already settled",
            Violation::NotAuthor => "caller is not the paper's author",
            Violation::NotAuthorized => "caller lacks owner or admin authority",
            Violation::AlreadyMember => "address is already a committee member",
            Violation::RequestNotPending => "membership request is not pending",
            Violation::DuplicatePendingRequest => "a pending request already exists for this wallet",
            Violation::InvalidInput => "invalid input",
        };
        f.write_str(text)
    }
}

impl From<Rejection> for Violation {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::NotMember => Violation::NotMember,
            Rejection::AlreadyVoted => Violation::AlreadyVoted,
            Rejection::AlreadyDecided => Violation::AlreadyDecided,
            Rejection::EmptyComment => Violation::EmptyComment,
            Rejection::IncorrectStake => Violation::StakeMismatch,
            Rejection::NotRejected => Violation::NotRejected,
            Rejection::AlreadyRevised => Violation::AlreadyRevised,
            Rejection::NotDecided => Violation::NotDecided,
            Rejection::StakeAlreadySettled => Violation::AlreadySettled,
            Rejection::NotAuthor => Violation::NotAuthor,
            Rejection::NotOwner => Violation::NotAuthorized,
            Rejection::AlreadyMember => Violation::AlreadyMember,
        }
    }
}

/// Coarse error classification for the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Precondition,
    RaceLost,
    Unconfirmed,
    LedgerUnavailable,
    LedgerProtocol,
    MetadataUnavailable,
    MetadataStore,
    MalformedChain,
    NotFound,
}

/// Error types for governance operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GovernanceError {
    /// Pre-check failed; nothing was written
    #[error("{violation}{}", fmt_detail(detail))]
    Precondition { violation: Violation, detail: String },

    /// Pre-check passed but the ledger refused the write because another
    /// client changed state first
    #[error("Lost a race: {violation}{}", fmt_detail(detail))]
    RaceLost { violation: Violation, detail: String },

    /// The write was submitted but not confirmed in time; it may or may
    /// not have landed
    #[error("{operation} not confirmed within {timeout_ms}ms; check ledger state before retrying")]
    Unconfirmed { operation: String, timeout_ms: u64 },

    /// Ledger unreachable
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Ledger answered with something unusable
    #[error("Ledger protocol error: {0}")]
    LedgerProtocol(String),

    /// Metadata store unreachable
    #[error("Metadata store unavailable: {0}")]
    MetadataUnavailable(String),

    /// Metadata store failed otherwise
    #[error("Metadata store error: {0}")]
    MetadataStore(String),

    /// A revision chain does not satisfy its structural invariants
    #[error("Malformed revision chain at paper {paper_id}: {reason}")]
    MalformedChain { paper_id: PaperId, reason: String },

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

fn fmt_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({detail})")
    }
}

impl GovernanceError {
    /// Precondition failure without detail.
    pub fn violation(violation: Violation) -> Self {
        GovernanceError::Precondition {
            violation,
            detail: String::new(),
        }
    }

    /// Precondition failure with detail.
    pub fn violation_with(violation: Violation, detail: impl Into<String>) -> Self {
        GovernanceError::Precondition {
            violation,
            detail: detail.into(),
        }
    }

    /// Stake precondition failure naming both amounts.
    pub fn stake_mismatch(expected: Amount, actual: Amount) -> Self {
        Self::violation_with(
            Violation::StakeMismatch,
            format!("expected {expected}, got {actual}"),
        )
    }

    /// Malformed chain at `paper_id`.
    pub fn malformed(paper_id: PaperId, reason: impl Into<String>) -> Self {
        GovernanceError::MalformedChain {
            paper_id,
            reason: reason.into(),
        }
    }

    /// Classification for the envelope.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GovernanceError::Precondition { .. } => ErrorKind::Precondition,
            GovernanceError::RaceLost { .. } => ErrorKind::RaceLost,
            GovernanceError::Unconfirmed { .. } => ErrorKind::Unconfirmed,
            GovernanceError::LedgerUnavailable(_) => ErrorKind::LedgerUnavailable,
            GovernanceError::LedgerProtocol(_) => ErrorKind::LedgerProtocol,
            GovernanceError::MetadataUnavailable(_) => ErrorKind::MetadataUnavailable,
            GovernanceError::MetadataStore(_) => ErrorKind::MetadataStore,
            GovernanceError::MalformedChain { .. } => ErrorKind::MalformedChain,
            GovernanceError::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// The violated invariant, for precondition and race failures.
    pub fn violation_code(&self) -> Option<Violation> {
        match self {
            GovernanceError::Precondition { violation, .. }
            | GovernanceError::RaceLost { violation, .. } => Some(*violation),
            _ => None,
        }
    }

    /// Whether the caller may retry the same request as-is.
    ///
    /// Unconfirmed writes are not retryable until the ledger has been
    /// checked; a blind retry could double-submit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GovernanceError::RaceLost { .. }
                | GovernanceError::LedgerUnavailable(_)
                | GovernanceError::MetadataUnavailable(_)
        )
    }

    /// Map a ledger error from a read.
    pub fn from_read(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(msg) | LedgerError::Network(msg) => {
                GovernanceError::LedgerUnavailable(msg)
            }
            LedgerError::PaperNotFound(id) => GovernanceError::NotFound(format!("paper {id}")),
            LedgerError::MemberIndexOutOfRange(i) => {
                GovernanceError::NotFound(format!("member index {i}"))
            }
            LedgerError::Rejected(r) => GovernanceError::violation(r.into()),
            LedgerError::Http { status, message } if status >= 500 || status == 429 => {
                GovernanceError::LedgerUnavailable(format!("HTTP {status}: {message}"))
            }
            LedgerError::Http { status, message } => {
                GovernanceError::LedgerProtocol(format!("HTTP {status}: {message}"))
            }
            LedgerError::Parse(msg) => GovernanceError::LedgerProtocol(msg),
            LedgerError::Rpc { code, message } => {
                GovernanceError::LedgerProtocol(format!("{code}: {message}"))
            }
        }
    }

    /// Map a ledger error from a write whose pre-checks passed.
    pub fn from_write(operation: &str, timeout_ms: u64, err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(r) => {
                let violation = Violation::from(r);
                let detail = format!("ledger refused {operation}");
                if violation.is_race_prone() {
                    GovernanceError::RaceLost { violation, detail }
                } else {
                    GovernanceError::Precondition { violation, detail }
                }
            }
            // Reached the node without a receipt: the transaction may still be mined.
            err if err.may_have_landed() => GovernanceError::Unconfirmed {
                operation: operation.to_string(),
                timeout_ms,
            },
            other => Self::from_read(other),
        }
    }
}

impl From<StoreError> for GovernanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => GovernanceError::MetadataUnavailable(msg),
            StoreError::NotFound(id) => GovernanceError::NotFound(format!("record {id}")),
            other => GovernanceError::MetadataStore(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_rejection_classification() {
        let raced = GovernanceError::from_write(
            "voteOnPaper",
            1000,
            LedgerError::Rejected(Rejection::AlreadyDecided),
        );
        assert_eq!(raced.kind(), ErrorKind::RaceLost);
        assert!(raced.is_retryable());
        assert_eq!(raced.violation_code(), Some(Violation::AlreadyDecided));

        let refused = GovernanceError::from_write(
            "addMember",
            1000,
            LedgerError::Rejected(Rejection::NotOwner),
        );
        assert_eq!(refused.kind(), ErrorKind::Precondition);
        assert!(!refused.is_retryable());
    }

    #[test]
    fn test_dropped_write_is_unconfirmed() {
        let err = GovernanceError::from_write("claimStake", 500, LedgerError::Network("reset".into()));
        assert_eq!(err.kind(), ErrorKind::Unconfirmed);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_gateway_error_on_write_is_unconfirmed() {
        let gateway = LedgerError::Http {
            status: 504,
            message: "gateway timeout".into(),
        };
        let err = GovernanceError::from_write("submitPaper", 500, gateway.clone());
        assert_eq!(err.kind(), ErrorKind::Unconfirmed);
        assert!(!err.is_retryable());

        // The same status on a read is safe to retry.
        assert_eq!(GovernanceError::from_read(gateway).kind(), ErrorKind::LedgerUnavailable);
    }

    #[test]
    fn test_unsent_write_stays_retryable() {
        let refused = GovernanceError::from_write(
            "submitPaper",
            500,
            LedgerError::Unavailable("connection refused".into()),
        );
        assert_eq!(refused.kind(), ErrorKind::LedgerUnavailable);
        assert!(refused.is_retryable());

        let throttled = GovernanceError::from_write(
            "voteOnPaper",
            500,
            LedgerError::Http {
                status: 429,
                message: String::new(),
            },
        );
        assert_eq!(throttled.kind(), ErrorKind::LedgerUnavailable);

        let bad_request = GovernanceError::from_write(
            "voteOnPaper",
            500,
            LedgerError::Http {
                status: 400,
                message: "bad params".into(),
            },
        );
        assert_eq!(bad_request.kind(), ErrorKind::LedgerProtocol);
    }

    #[test]
    fn test_display_carries_detail() {
        let err = GovernanceError::stake_mismatch(Amount::from_whole(1), Amount::ZERO);
        assert_eq!(
            err.to_string(),
            "stake does not equal the required staking amount (expected 1, got 0)"
        );
        assert_eq!(
            GovernanceError::violation(Violation::AlreadyVoted).to_string(),
            "caller already voted on this paper"
        );
    }

    #[test]
    fn test_store_error_mapping() {
        let err: GovernanceError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.kind(), ErrorKind::MetadataUnavailable);
        assert!(err.is_retryable());
    }
}
