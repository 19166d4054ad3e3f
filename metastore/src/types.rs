//! Record types held by the off-ledger stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field a metadata query can match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    /// Content fingerprint
    Fingerprint,
    /// Submitter's ledger address (lowercase)
    AuthorAddress,
}

impl MetadataField {
    /// Document field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Fingerprint => "fingerprint",
            MetadataField::AuthorAddress => "author_address",
        }
    }
}

/// Progress of the external plagiarism check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlagiarismStatus {
    Pending,
    Completed,
    Error,
}

/// Similarity against one source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    /// Source identifier (URL, DOI, title)
    pub source: String,
    /// Similarity (0.0 - 1.0)
    pub score: f32,
}

/// Opaque verdict produced by the external plagiarism checker.
///
/// Read and displayed only; never computed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlagiarismVerdict {
    pub status: PlagiarismStatus,
    pub is_plagiarized: bool,
    pub matches_found: u32,
    #[serde(default)]
    pub similarity_scores: Vec<SimilarityScore>,
}

impl PlagiarismVerdict {
    /// Verdict for a check that has been queued but not run.
    pub fn pending() -> Self {
        Self {
            status: PlagiarismStatus::Pending,
            is_plagiarized: false,
            matches_found: 0,
            similarity_scores: vec![],
        }
    }

    /// Highest similarity across sources, if any.
    pub fn max_similarity(&self) -> Option<f32> {
        self.similarity_scores
            .iter()
            .map(|s| s.score)
            .fold(None, |acc, s| Some(acc.map_or(s, |a: f32| a.max(s))))
    }
}

/// Review comment mirrored from the ledger for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentEntry {
    pub voter: String,
    pub approve: bool,
    pub comment: String,
    pub recorded_at: DateTime<Utc>,
}

/// Submission-time content for a paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDraft {
    pub fingerprint: String,
    pub author_address: String,
    pub title: String,
    pub team_members: String,
    pub abstract_text: String,
    pub file_ref: String,
    pub file_name: String,
    pub file_size: u64,
    pub author_name: String,
    pub author_email: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Stored metadata record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Store-assigned id
    pub id: String,
    pub fingerprint: String,
    pub author_address: String,
    pub title: String,
    #[serde(default)]
    pub team_members: String,
    #[serde(default)]
    pub abstract_text: String,
    #[serde(default)]
    pub file_ref: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub plagiarism: Option<PlagiarismVerdict>,
    #[serde(default)]
    pub comments: Vec<CommentEntry>,
}

impl MetadataRecord {
    /// Materialize a draft under a store-assigned id.
    pub fn from_draft(id: impl Into<String>, draft: MetadataDraft) -> Self {
        Self {
            id: id.into(),
            fingerprint: draft.fingerprint,
            author_address: draft.author_address.to_ascii_lowercase(),
            title: draft.title,
            team_members: draft.team_members,
            abstract_text: draft.abstract_text,
            file_ref: draft.file_ref,
            file_name: draft.file_name,
            file_size: draft.file_size,
            author_name: draft.author_name,
            author_email: draft.author_email,
            submitted_at: draft.submitted_at.or_else(|| Some(Utc::now())),
            plagiarism: None,
            comments: vec![],
        }
    }

    /// Apply an update in place.
    pub fn apply(&mut self, update: MetadataUpdate) {
        if let Some(v) = update.abstract_text {
            self.abstract_text = v;
        }
        if let Some(v) = update.file_ref {
            self.file_ref = v;
        }
        if let Some(v) = update.file_name {
            self.file_name = v;
        }
        if let Some(v) = update.file_size {
            self.file_size = v;
        }
        if let Some(v) = update.plagiarism {
            self.plagiarism = Some(v);
        }
        self.comments.extend(update.append_comments);
    }
}

/// Partial update of a metadata record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub abstract_text: Option<String>,
    pub file_ref: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub plagiarism: Option<PlagiarismVerdict>,
    #[serde(default)]
    pub append_comments: Vec<CommentEntry>,
}

impl MetadataUpdate {
    /// Update that only attaches a plagiarism verdict.
    pub fn plagiarism(verdict: PlagiarismVerdict) -> Self {
        Self {
            plagiarism: Some(verdict),
            ..Default::default()
        }
    }

    /// Update that only appends a mirrored comment.
    pub fn comment(entry: CommentEntry) -> Self {
        Self {
            append_comments: vec![entry],
            ..Default::default()
        }
    }
}

/// Review status of a membership request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

/// New membership request from a non-member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMembershipRequest {
    /// Identity in the external auth system
    pub requester_id: String,
    pub requester_name: String,
    /// Ledger address to be added (lowercase)
    pub wallet: String,
    pub justification: String,
}

/// Stored membership request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRequest {
    pub id: String,
    pub requester_id: String,
    #[serde(default)]
    pub requester_name: String,
    pub wallet: String,
    pub justification: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed_by: Option<String>,
}

impl MembershipRequest {
    /// Materialize a pending request under a store-assigned id.
    pub fn pending(id: impl Into<String>, request: NewMembershipRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            requester_id: request.requester_id,
            requester_name: request.requester_name,
            wallet: request.wallet.to_ascii_lowercase(),
            justification: request.justification,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            reviewed_by: None,
        }
    }
}
