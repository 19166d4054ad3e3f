//! Ledger and metadata reconciliation.
//!
//! Ledger papers and metadata records share no enforced key. A paper is
//! matched to its metadata by content fingerprint first; failing that, by
//! the submitter's address narrowed down by title or team members. A miss
//! or an unreachable store never fails a read: the view falls back to
//! blank metadata and says why.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ledger::{PaperDetails, PaperStatus};
use metastore::{CommentEntry, MetadataField, MetadataRecord, MetadataStore, PlagiarismVerdict};

use crate::calls::CallPolicy;
use crate::error::Result;
use crate::state::PaperState;

/// How a paper's metadata was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataMatch {
    /// Exact fingerprint match
    Fingerprint,
    /// Submitter address plus title or team-member match
    AuthorTitle,
    /// No record matched
    Missing,
    /// Store could not be queried
    StoreUnavailable,
}

/// Off-ledger fields of a paper view. Empty when unmatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperMetadata {
    pub record_id: Option<String>,
    pub abstract_text: String,
    pub file_ref: String,
    pub file_name: String,
    pub file_size: u64,
    pub author_name: String,
    pub author_email: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub plagiarism: Option<PlagiarismVerdict>,
    pub comments: Vec<CommentEntry>,
}

impl From<MetadataRecord> for PaperMetadata {
    fn from(record: MetadataRecord) -> Self {
        Self {
            record_id: Some(record.id),
            abstract_text: record.abstract_text,
            file_ref: record.file_ref,
            file_name: record.file_name,
            file_size: record.file_size,
            author_name: record.author_name,
            author_email: record.author_email,
            submitted_at: record.submitted_at,
            plagiarism: record.plagiarism,
            comments: record.comments,
        }
    }
}

/// A paper as the UI sees it: ledger truth plus matched metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperView {
    pub details: PaperDetails,
    pub status: PaperStatus,
    pub state: PaperState,
    pub metadata: PaperMetadata,
    pub metadata_match: MetadataMatch,
}

impl PaperView {
    /// Merge ledger records with an optional metadata record.
    pub fn merge(
        details: PaperDetails,
        status: PaperStatus,
        record: Option<MetadataRecord>,
        metadata_match: MetadataMatch,
    ) -> Self {
        Self {
            state: PaperState::from_status(&status),
            details,
            status,
            metadata: record.map(PaperMetadata::from).unwrap_or_default(),
            metadata_match,
        }
    }
}

fn overlaps(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

/// Whether `record` describes `details` by title or team members.
pub fn describes(details: &PaperDetails, record: &MetadataRecord) -> bool {
    overlaps(&details.title, &record.title) || overlaps(&details.team_members, &record.team_members)
}

/// First candidate, in store order, that describes `details`.
pub fn pick_candidate<'a>(details: &PaperDetails, candidates: &'a [MetadataRecord]) -> Option<&'a MetadataRecord> {
    candidates.iter().find(|record| describes(details, record))
}

/// Matches ledger papers with metadata records.
pub struct Reconciler {
    store: Arc<dyn MetadataStore>,
    policy: CallPolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn MetadataStore>, policy: CallPolicy) -> Self {
        Self { store, policy }
    }

    async fn query(&self, field: MetadataField, value: &str) -> std::result::Result<Vec<MetadataRecord>, metastore::StoreError> {
        let store = &self.store;
        self.policy
            .read("metadata.query", || store.query(field, value))
            .await
    }

    /// Find the metadata record for a paper.
    pub async fn locate(&self, details: &PaperDetails) -> (Option<MetadataRecord>, MetadataMatch) {
        if !details.fingerprint.is_empty() {
            let by_fingerprint = match self
                .query(MetadataField::Fingerprint, details.fingerprint.as_str())
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    warn!(paper_id = %details.id, error = %e, "Metadata lookup failed, using blank metadata");
                    return (None, MetadataMatch::StoreUnavailable);
                }
            };
            if let Some(record) = by_fingerprint.into_iter().next() {
                return (Some(record), MetadataMatch::Fingerprint);
            }
        }

        let by_author = match self
            .query(MetadataField::AuthorAddress, details.author.as_str())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(paper_id = %details.id, error = %e, "Metadata lookup failed, using blank metadata");
                return (None, MetadataMatch::StoreUnavailable);
            }
        };
        match pick_candidate(details, &by_author) {
            Some(record) => {
                debug!(paper_id = %details.id, record_id = %record.id, "Metadata matched by author and title");
                (Some(record.clone()), MetadataMatch::AuthorTitle)
            }
            None => (None, MetadataMatch::Missing),
        }
    }

    /// Build the merged view of one paper.
    pub async fn view(&self, details: PaperDetails, status: PaperStatus) -> PaperView {
        let (record, matched) = self.locate(&details).await;
        PaperView::merge(details, status, record, matched)
    }

    /// Build views for many papers, preserving order.
    pub async fn views(&self, papers: Vec<(PaperDetails, PaperStatus)>) -> Vec<PaperView> {
        self.policy
            .fan_out(papers, |(details, status)| self.view(details, status))
            .await
    }

    /// Metadata records that match no ledger paper.
    pub async fn orphans(&self, papers: &[PaperDetails]) -> Result<Vec<MetadataRecord>> {
        let store = &self.store;
        let records = self.policy.read("metadata.all", || store.all()).await?;
        Ok(records
            .into_iter()
            .filter(|record| {
                !papers.iter().any(|paper| {
                    paper.fingerprint.as_str() == record.fingerprint
                        || (paper.author.as_str().eq_ignore_ascii_case(&record.author_address)
                            && describes(paper, record))
                })
            })
            .collect())
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }
}
