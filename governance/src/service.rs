//! Request/response surface.
//!
//! Every user action is a [`Command`] executed on behalf of an explicit
//! caller address. Results come back in an [`Envelope`] whose error body
//! carries the error kind, the violated invariant, and whether a retry
//! makes sense.
//!
//! Metadata writes that accompany a ledger write are best-effort: the
//! ledger write goes first, and a metadata failure afterwards is logged and
//! reported in the outcome, never turned into an error.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ledger::{Address, Amount, Fingerprint, LedgerGateway, NewPaper, PaperDetails, PaperId};
use metastore::{
    CommentEntry, MembershipRequest, MembershipRequestStore, MetadataDraft, MetadataField, MetadataRecord,
    MetadataStore, MetadataUpdate, PlagiarismVerdict,
};

use crate::chain::RevisionArena;
use crate::config::GovernanceConfig;
use crate::engine::{
    CommitteeInfo, GovernanceEngine, PendingWrite, ReviewEntry, SettlementReceipt, Submission, VoteReceipt,
    WriteStatus,
};
use crate::error::{ErrorKind, GovernanceError, Result, Violation};
use crate::membership::{Approval, MembershipWorkflow, RequestReconciliation};
use crate::reconcile::{PaperView, Reconciler};
use crate::state::{Outcome, PaperState};

/// Off-ledger content supplied with a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmissionMetadata {
    pub abstract_text: String,
    pub file_ref: String,
    pub file_name: String,
    pub file_size: u64,
    pub author_name: String,
    pub author_email: String,
}

/// A user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SubmitPaper {
        paper: NewPaper,
        stake: Amount,
        #[serde(default)]
        metadata: SubmissionMetadata,
    },
    CastVote {
        paper_id: PaperId,
        approve: bool,
        comment: String,
    },
    Settle {
        paper_id: PaperId,
    },
    Resubmit {
        previous: PaperId,
        paper: NewPaper,
        stake: Amount,
        #[serde(default)]
        metadata: SubmissionMetadata,
    },
    CheckWrite {
        pending: PendingWrite,
    },
    RequestMembership {
        requester_id: String,
        requester_name: String,
        justification: String,
    },
    ApproveMembership {
        request_id: String,
    },
    RejectMembership {
        request_id: String,
    },
    ReconcileRequests,
    AttachPlagiarism {
        fingerprint: Fingerprint,
        verdict: PlagiarismVerdict,
    },
    ListPapers,
    GetPaper {
        paper_id: PaperId,
    },
    RevisionHistory {
        paper_id: PaperId,
    },
    AuthorDashboard {
        #[serde(default)]
        author: Option<Address>,
    },
    ReviewQueue,
    ListMembers,
    PendingRequests,
    Stats,
    Orphans,
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SubmitPaper { .. } => "submit_paper",
            Command::CastVote { .. } => "cast_vote",
            Command::Settle { .. } => "settle",
            Command::Resubmit { .. } => "resubmit",
            Command::CheckWrite { .. } => "check_write",
            Command::RequestMembership { .. } => "request_membership",
            Command::ApproveMembership { .. } => "approve_membership",
            Command::RejectMembership { .. } => "reject_membership",
            Command::ReconcileRequests => "reconcile_requests",
            Command::AttachPlagiarism { .. } => "attach_plagiarism",
            Command::ListPapers => "list_papers",
            Command::GetPaper { .. } => "get_paper",
            Command::RevisionHistory { .. } => "revision_history",
            Command::AuthorDashboard { .. } => "author_dashboard",
            Command::ReviewQueue => "review_queue",
            Command::ListMembers => "list_members",
            Command::PendingRequests => "pending_requests",
            Command::Stats => "stats",
            Command::Orphans => "orphans",
        }
    }
}

/// Submission result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    #[serde(flatten)]
    pub submission: Submission,
    /// Id of the metadata record, if it was written
    pub metadata_record: Option<String>,
}

/// Vote result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    #[serde(flatten)]
    pub receipt: VoteReceipt,
    /// Whether the comment was mirrored to the metadata record
    pub comment_mirrored: bool,
}

/// Full view of one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperDetailView {
    #[serde(flatten)]
    pub view: PaperView,
    pub reviews: Vec<ReviewEntry>,
    pub history: Vec<PaperId>,
    pub latest_revision: PaperId,
}

/// Revision chain of a paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    pub paper_id: PaperId,
    pub history: Vec<PaperId>,
    pub latest_revision: PaperId,
}

/// An author's papers and what they can do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDashboard {
    pub author: Address,
    pub papers: Vec<PaperView>,
    /// Stake locked in papers not yet settled
    pub staked: Amount,
    /// Approved papers whose stake can be reclaimed
    pub claimable: Vec<PaperId>,
    /// Rejected papers that can still be revised
    pub revisable: Vec<PaperId>,
}

/// Committee-wide counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeStats {
    #[serde(flatten)]
    pub committee: CommitteeInfo,
    pub submitted: u64,
    pub voting: u64,
    pub approved: u64,
    pub rejected: u64,
    pub settled: u64,
    pub pending_requests: u64,
}

/// Successful command result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Submitted(SubmitOutcome),
    Voted(VoteOutcome),
    Settled(SettlementReceipt),
    WriteChecked(WriteStatus),
    MembershipRequested(MembershipRequest),
    MembershipApproved(Approval),
    MembershipRejected(MembershipRequest),
    RequestsReconciled(RequestReconciliation),
    PlagiarismAttached(MetadataRecord),
    Papers(Vec<PaperView>),
    Paper(Box<PaperDetailView>),
    History(HistoryView),
    Dashboard(AuthorDashboard),
    ReviewQueue(Vec<PaperView>),
    Members(Vec<Address>),
    Requests(Vec<MembershipRequest>),
    Stats(CommitteeStats),
    Orphans(Vec<MetadataRecord>),
}

/// Error body of a failed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<Violation>,
    pub message: String,
    pub retryable: bool,
}

impl From<&GovernanceError> for ErrorBody {
    fn from(err: &GovernanceError) -> Self {
        Self {
            kind: err.kind(),
            violation: err.violation_code(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CommandOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn from_result(result: Result<CommandOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                ok: true,
                data: Some(outcome),
                error: None,
            },
            Err(err) => Self {
                ok: false,
                data: None,
                error: Some(ErrorBody::from(&err)),
            },
        }
    }
}

/// Governance service: engine, membership and reconciliation behind one
/// command surface.
pub struct GovernanceService {
    engine: GovernanceEngine,
    membership: MembershipWorkflow,
    reconciler: Reconciler,
}

impl GovernanceService {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        metadata: Arc<dyn MetadataStore>,
        requests: Arc<dyn MembershipRequestStore>,
        config: &GovernanceConfig,
    ) -> Self {
        let engine = GovernanceEngine::new(ledger.clone(), config.calls.clone());
        let membership = MembershipWorkflow::new(ledger, requests, config.calls.clone(), &config.membership);
        let reconciler = Reconciler::new(metadata, engine.policy().clone());
        Self {
            engine,
            membership,
            reconciler,
        }
    }

    pub fn engine(&self) -> &GovernanceEngine {
        &self.engine
    }

    pub fn membership(&self) -> &MembershipWorkflow {
        &self.membership
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Execute a command and wrap the result.
    pub async fn dispatch(&self, caller: &Address, command: Command) -> Envelope {
        let name = command.name();
        let result = self.execute(caller, command).await;
        if let Err(e) = &result {
            warn!(command = name, caller = %caller, kind = ?e.kind(), error = %e, "Command failed");
        }
        Envelope::from_result(result)
    }

    /// Execute a command.
    pub async fn execute(&self, caller: &Address, command: Command) -> Result<CommandOutcome> {
        let outcome = match command {
            Command::SubmitPaper { paper, stake, metadata } => {
                CommandOutcome::Submitted(self.submit(caller, paper, stake, metadata).await?)
            }
            Command::CastVote {
                paper_id,
                approve,
                comment,
            } => CommandOutcome::Voted(self.vote(caller, paper_id, approve, &comment).await?),
            Command::Settle { paper_id } => {
                CommandOutcome::Settled(self.engine.resolve_and_settle(caller, paper_id).await?)
            }
            Command::Resubmit {
                previous,
                paper,
                stake,
                metadata,
            } => CommandOutcome::Submitted(self.resubmit(caller, previous, paper, stake, metadata).await?),
            Command::CheckWrite { pending } => CommandOutcome::WriteChecked(self.engine.check_write(&pending).await?),
            Command::RequestMembership {
                requester_id,
                requester_name,
                justification,
            } => CommandOutcome::MembershipRequested(
                self.membership
                    .request_membership(caller, &requester_id, &requester_name, &justification)
                    .await?,
            ),
            Command::ApproveMembership { request_id } => {
                CommandOutcome::MembershipApproved(self.membership.approve(caller, &request_id).await?)
            }
            Command::RejectMembership { request_id } => {
                CommandOutcome::MembershipRejected(self.membership.reject(caller, &request_id).await?)
            }
            Command::ReconcileRequests => {
                if !self.membership.is_reviewer(caller).await? {
                    return Err(GovernanceError::violation(Violation::NotAuthorized));
                }
                CommandOutcome::RequestsReconciled(self.membership.reconcile_requests().await?)
            }
            Command::AttachPlagiarism { fingerprint, verdict } => {
                CommandOutcome::PlagiarismAttached(self.attach_plagiarism(&fingerprint, verdict).await?)
            }
            Command::ListPapers => CommandOutcome::Papers(self.list_papers().await?),
            Command::GetPaper { paper_id } => CommandOutcome::Paper(Box::new(self.paper_detail(paper_id).await?)),
            Command::RevisionHistory { paper_id } => CommandOutcome::History(self.history(paper_id).await?),
            Command::AuthorDashboard { author } => {
                let author = author.unwrap_or_else(|| caller.clone());
                CommandOutcome::Dashboard(self.author_dashboard(&author).await?)
            }
            Command::ReviewQueue => CommandOutcome::ReviewQueue(self.review_queue(caller).await?),
            Command::ListMembers => CommandOutcome::Members(self.membership.members().await?),
            Command::PendingRequests => CommandOutcome::Requests(self.membership.pending_requests().await?),
            Command::Stats => CommandOutcome::Stats(self.stats().await?),
            Command::Orphans => CommandOutcome::Orphans(self.orphans().await?),
        };
        Ok(outcome)
    }

    // ---- writes ----

    async fn record_metadata(&self, author: &Address, paper: &NewPaper, metadata: SubmissionMetadata) -> Option<String> {
        let draft = MetadataDraft {
            fingerprint: paper.fingerprint.as_str().to_string(),
            author_address: author.to_string(),
            title: paper.title.clone(),
            team_members: paper.team_members.clone(),
            abstract_text: metadata.abstract_text,
            file_ref: metadata.file_ref,
            file_name: metadata.file_name,
            file_size: metadata.file_size,
            author_name: metadata.author_name,
            author_email: metadata.author_email,
            submitted_at: Some(Utc::now()),
        };
        match self.reconciler.store().create(draft).await {
            Ok(record) => Some(record.id),
            Err(e) => {
                warn!(
                    fingerprint = %paper.fingerprint,
                    error = %e,
                    "Paper is on the ledger but its metadata was not stored"
                );
                None
            }
        }
    }

    /// Submit a paper, then store its metadata.
    pub async fn submit(
        &self,
        caller: &Address,
        paper: NewPaper,
        stake: Amount,
        metadata: SubmissionMetadata,
    ) -> Result<SubmitOutcome> {
        let submission = self.engine.submit_paper(caller, paper.clone(), stake).await?;
        let metadata_record = self.record_metadata(caller, &paper, metadata).await;
        Ok(SubmitOutcome {
            submission,
            metadata_record,
        })
    }

    /// Resubmit a rejected paper, then store the revision's metadata.
    pub async fn resubmit(
        &self,
        caller: &Address,
        previous: PaperId,
        paper: NewPaper,
        stake: Amount,
        metadata: SubmissionMetadata,
    ) -> Result<SubmitOutcome> {
        let submission = self.engine.resubmit(caller, previous, paper.clone(), stake).await?;
        let metadata_record = self.record_metadata(caller, &paper, metadata).await;
        Ok(SubmitOutcome {
            submission,
            metadata_record,
        })
    }

    /// Cast a vote, then mirror the comment into the paper's metadata.
    pub async fn vote(&self, caller: &Address, paper_id: PaperId, approve: bool, comment: &str) -> Result<VoteOutcome> {
        let receipt = self.engine.cast_vote(caller, paper_id, approve, comment).await?;
        let comment_mirrored = self.mirror_comment(caller, paper_id, approve, comment).await;
        Ok(VoteOutcome {
            receipt,
            comment_mirrored,
        })
    }

    async fn mirror_comment(&self, voter: &Address, paper_id: PaperId, approve: bool, comment: &str) -> bool {
        let details = match self.engine.details(paper_id).await {
            Ok(details) => details,
            Err(e) => {
                warn!(paper_id = %paper_id, error = %e, "Comment not mirrored");
                return false;
            }
        };
        let (record, _) = self.reconciler.locate(&details).await;
        let Some(record) = record else {
            return false;
        };

        let entry = CommentEntry {
            voter: voter.to_string(),
            approve,
            comment: comment.to_string(),
            recorded_at: Utc::now(),
        };
        match self
            .reconciler
            .store()
            .update(&record.id, MetadataUpdate::comment(entry))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(paper_id = %paper_id, record_id = %record.id, error = %e, "Comment not mirrored");
                false
            }
        }
    }

    /// Attach a plagiarism verdict to every record with `fingerprint`.
    ///
    /// Returns the first updated record.
    pub async fn attach_plagiarism(&self, fingerprint: &Fingerprint, verdict: PlagiarismVerdict) -> Result<MetadataRecord> {
        let store = self.reconciler.store();
        let records = self
            .engine
            .policy()
            .read("metadata.query", || store.query(MetadataField::Fingerprint, fingerprint.as_str()))
            .await?;
        if records.is_empty() {
            return Err(GovernanceError::NotFound(format!("metadata for fingerprint {fingerprint}")));
        }

        let mut first = None;
        for record in records {
            let updated = store
                .update(&record.id, MetadataUpdate::plagiarism(verdict.clone()))
                .await?;
            first.get_or_insert(updated);
        }
        info!(fingerprint = %fingerprint, plagiarized = verdict.is_plagiarized, "Plagiarism verdict attached");
        first.ok_or_else(|| GovernanceError::NotFound(format!("metadata for fingerprint {fingerprint}")))
    }

    // ---- read models ----

    /// Every paper with reconciled metadata, oldest first.
    pub async fn list_papers(&self) -> Result<Vec<PaperView>> {
        let snapshots = self.engine.snapshots().await?;
        Ok(self
            .reconciler
            .views(snapshots.into_iter().map(|s| (s.details, s.status)).collect())
            .await)
    }

    /// One paper with reviews and revision chain.
    pub async fn paper_detail(&self, paper_id: PaperId) -> Result<PaperDetailView> {
        let (snapshot, reviews, (history, latest_revision)) = tokio::try_join!(
            self.engine.snapshot(paper_id),
            self.engine.reviews(paper_id),
            self.engine.revision_chain(paper_id)
        )?;
        let view = self.reconciler.view(snapshot.details, snapshot.status).await;
        Ok(PaperDetailView {
            view,
            reviews,
            history,
            latest_revision,
        })
    }

    pub async fn history(&self, paper_id: PaperId) -> Result<HistoryView> {
        let (history, latest_revision) = self.engine.revision_chain(paper_id).await?;
        Ok(HistoryView {
            paper_id,
            history,
            latest_revision,
        })
    }

    /// Papers by `author`, with claimable and revisable papers called out.
    pub async fn author_dashboard(&self, author: &Address) -> Result<AuthorDashboard> {
        let snapshots = self.engine.snapshots().await?;
        let arena = RevisionArena::from_records(snapshots.iter().map(|s| (&s.details, &s.status)));

        let mine: Vec<_> = snapshots
            .into_iter()
            .filter(|s| &s.details.author == author)
            .collect();

        let mut staked = Amount::ZERO;
        let mut claimable = Vec::new();
        let mut revisable = Vec::new();
        for snapshot in &mine {
            let id = snapshot.details.id;
            if !snapshot.status.stake.is_settled() {
                staked = staked.checked_add(snapshot.status.stake.amount).unwrap_or(staked);
            }
            match snapshot.state {
                PaperState::Decided {
                    outcome: Outcome::Approved,
                } => claimable.push(id),
                PaperState::Decided {
                    outcome: Outcome::Rejected,
                }
                | PaperState::Settled {
                    outcome: Outcome::Rejected,
                    ..
                } if !arena.has_successor(id) => revisable.push(id),
                _ => {}
            }
        }

        let papers = self
            .reconciler
            .views(mine.into_iter().map(|s| (s.details, s.status)).collect())
            .await;
        Ok(AuthorDashboard {
            author: author.clone(),
            papers,
            staked,
            claimable,
            revisable,
        })
    }

    /// Undecided papers the member has not voted on yet.
    pub async fn review_queue(&self, member: &Address) -> Result<Vec<PaperView>> {
        if !self.engine.is_member(member).await? {
            return Err(GovernanceError::violation(Violation::NotMember));
        }
        let open: Vec<_> = self
            .engine
            .snapshots()
            .await?
            .into_iter()
            .filter(|s| !s.state.is_decided())
            .collect();

        let voted: Vec<bool> = self
            .engine
            .policy()
            .fan_out(open.iter(), |s| async move {
                self.engine
                    .voters(s.details.id)
                    .await
                    .map(|voters| voters.contains(member))
            })
            .await
            .into_iter()
            .collect::<Result<_>>()?;

        let pending: Vec<(PaperDetails, ledger::PaperStatus)> = open
            .into_iter()
            .zip(voted)
            .filter(|(_, voted)| !voted)
            .map(|(s, _)| (s.details, s.status))
            .collect();
        Ok(self.reconciler.views(pending).await)
    }

    /// Committee parameters and paper counts by state.
    pub async fn stats(&self) -> Result<CommitteeStats> {
        let (committee, snapshots, pending) = tokio::try_join!(
            self.engine.committee(),
            self.engine.snapshots(),
            self.membership.pending_requests()
        )?;

        let mut stats = CommitteeStats {
            committee,
            submitted: 0,
            voting: 0,
            approved: 0,
            rejected: 0,
            settled: 0,
            pending_requests: pending.len() as u64,
        };
        for snapshot in &snapshots {
            match snapshot.state {
                PaperState::Submitted => stats.submitted += 1,
                PaperState::Voting { .. } => stats.voting += 1,
                PaperState::Decided { .. } | PaperState::Settled { .. } => {}
            }
            match snapshot.state.outcome() {
                Some(Outcome::Approved) => stats.approved += 1,
                Some(Outcome::Rejected) => stats.rejected += 1,
                None => {}
            }
            if matches!(snapshot.state, PaperState::Settled { .. }) {
                stats.settled += 1;
            }
        }
        Ok(stats)
    }

    /// Metadata records no ledger paper accounts for.
    pub async fn orphans(&self) -> Result<Vec<MetadataRecord>> {
        let snapshots = self.engine.snapshots().await?;
        let details: Vec<PaperDetails> = snapshots.into_iter().map(|s| s.details).collect();
        self.reconciler.orphans(&details).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::InMemoryLedger;
    use metastore::{InMemoryMetadataStore, InMemoryRequestStore};

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::json!({
            "command": "cast_vote",
            "paper_id": 3,
            "approve": true,
            "comment": "sound"
        });
        let command: Command = serde_json::from_value(json).unwrap();
        assert_eq!(
            command,
            Command::CastVote {
                paper_id: PaperId(3),
                approve: true,
                comment: "sound".into()
            }
        );
        assert_eq!(command.name(), "cast_vote");
    }

    #[test]
    fn test_error_envelope() {
        let envelope = Envelope::from_result(Err(GovernanceError::violation(Violation::AlreadyVoted)));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["kind"], "precondition");
        assert_eq!(json["error"]["violation"], "already_voted");
        assert_eq!(json["error"]["retryable"], false);
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn test_submit_survives_metadata_outage() {
        let ledger = Arc::new(InMemoryLedger::new(addr(100)));
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.fail_next_writes(1);
        let service = GovernanceService::new(
            ledger.clone(),
            metadata.clone(),
            Arc::new(InMemoryRequestStore::new()),
            &GovernanceConfig::default(),
        );

        let stake = service.engine().staking_amount().await.unwrap();
        let outcome = service
            .submit(
                &addr(1),
                NewPaper::new("Title", Fingerprint::new("H1"), Amount::ZERO),
                stake,
                SubmissionMetadata::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.submission.paper_id, PaperId(1));
        assert!(outcome.metadata_record.is_none());
        assert!(metadata.is_empty().await);
    }

    #[tokio::test]
    async fn test_dispatch_wraps_outcome() {
        let ledger = Arc::new(InMemoryLedger::new(addr(100)).with_members([addr(10)]));
        let service = GovernanceService::new(
            ledger,
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryRequestStore::new()),
            &GovernanceConfig::default(),
        );

        let envelope = service.dispatch(&addr(1), Command::ListMembers).await;
        assert!(envelope.ok);
        assert_eq!(envelope.data, Some(CommandOutcome::Members(vec![addr(10)])));

        let envelope = service.dispatch(&addr(1), Command::ReviewQueue).await;
        assert!(!envelope.ok);
        assert_eq!(envelope.error.unwrap().violation, Some(Violation::NotMember));
    }
}
