//! Revision chains.
//!
//! A rejected paper may be revised at most once, so revisions form
//! singly-linked chains. Back-pointers come from the ledger; the arena adds
//! the forward index so the newest revision and the full history can both
//! be answered from one snapshot. Every traversal is bounded by the number
//! of known papers and fails closed on a structural defect.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ledger::{PaperDetails, PaperId, PaperStatus};

use crate::error::{GovernanceError, Result};

#[derive(Debug, Clone)]
struct Node {
    previous: Option<PaperId>,
    rejected: bool,
}

/// Arena of papers indexed by id, with a successor index.
#[derive(Debug, Clone, Default)]
pub struct RevisionArena {
    nodes: BTreeMap<PaperId, Node>,
    successor: HashMap<PaperId, PaperId>,
    /// Parents claimed by more than one revision
    contested: BTreeSet<PaperId>,
}

impl RevisionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from ledger records.
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = (&'a PaperDetails, &'a PaperStatus)>,
    ) -> Self {
        let mut arena = Self::new();
        for (details, status) in records {
            arena.insert(details, status);
        }
        arena
    }

    /// Add one paper.
    pub fn insert(&mut self, details: &PaperDetails, status: &PaperStatus) {
        let previous = details.previous_version;
        self.nodes.insert(
            details.id,
            Node {
                previous,
                rejected: status.is_decided && !status.is_approved,
            },
        );
        if let Some(parent) = previous {
            match self.successor.get(&parent) {
                Some(existing) if *existing != details.id => {
                    self.contested.insert(parent);
                }
                _ => {
                    self.successor.insert(parent, details.id);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: PaperId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn node(&self, id: PaperId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| GovernanceError::NotFound(format!("paper {id}")))
    }

    /// Validated parent of `id`.
    fn parent(&self, id: PaperId) -> Result<Option<PaperId>> {
        let Some(parent) = self.node(id)?.previous else {
            return Ok(None);
        };
        if parent >= id {
            return Err(GovernanceError::malformed(
                id,
                format!("previous version {parent} does not precede it"),
            ));
        }
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or_else(|| GovernanceError::malformed(id, format!("previous version {parent} is unknown")))?;
        if !parent_node.rejected {
            return Err(GovernanceError::malformed(
                id,
                format!("previous version {parent} was not rejected"),
            ));
        }
        if self.contested.contains(&parent) {
            return Err(GovernanceError::malformed(
                parent,
                "paper has more than one revision",
            ));
        }
        Ok(Some(parent))
    }

    /// Oldest ancestor of `id`.
    pub fn root(&self, id: PaperId) -> Result<PaperId> {
        let mut current = id;
        for _ in 0..=self.nodes.len() {
            match self.parent(current)? {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
        Err(GovernanceError::malformed(id, "back-pointer walk exceeded paper count"))
    }

    /// Newest descendant of `id`; `id` itself when it was never revised.
    pub fn latest(&self, id: PaperId) -> Result<PaperId> {
        self.node(id)?;
        let mut current = id;
        for _ in 0..=self.nodes.len() {
            if self.contested.contains(&current) {
                return Err(GovernanceError::malformed(current, "paper has more than one revision"));
            }
            match self.successor.get(&current) {
                Some(next) => {
                    // Re-validates the link from the child's side.
                    self.parent(*next)?;
                    current = *next;
                }
                None => return Ok(current),
            }
        }
        Err(GovernanceError::malformed(id, "forward walk exceeded paper count"))
    }

    /// Full chain containing `id`, oldest first.
    pub fn history(&self, id: PaperId) -> Result<Vec<PaperId>> {
        let root = self.root(id)?;
        let newest = self.latest(root)?;
        let mut chain = vec![newest];
        let mut current = newest;
        while let Some(parent) = self.parent(current)? {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Whether `id` already has a revision.
    pub fn has_successor(&self, id: PaperId) -> bool {
        self.successor.contains_key(&id)
    }
}

/// Check a ledger-reported history for `requested`.
///
/// The list must be non-empty, strictly increasing (back-pointers only
/// point to older ids), free of duplicates, within `1..=paper_count`,
/// and must contain `requested`.
pub fn validate_history(history: &[PaperId], requested: PaperId, paper_count: u64) -> Result<()> {
    if history.is_empty() {
        return Err(GovernanceError::malformed(requested, "empty revision history"));
    }
    if history.len() as u64 > paper_count {
        return Err(GovernanceError::malformed(
            requested,
            format!("history of {} entries exceeds paper count {}", history.len(), paper_count),
        ));
    }
    for id in history {
        if id.get() == 0 || id.get() > paper_count {
            return Err(GovernanceError::malformed(requested, format!("history names unknown paper {id}")));
        }
    }
    if let Some(pair) = history.windows(2).find(|w| w[0] >= w[1]) {
        return Err(GovernanceError::malformed(
            requested,
            format!("history is not ordered oldest first at {} -> {}", pair[0], pair[1]),
        ));
    }
    if !history.contains(&requested) {
        return Err(GovernanceError::malformed(requested, "history does not contain the paper"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::{Address, Amount, Fingerprint, StakeInfo};

    fn paper(id: u64, previous: Option<u64>) -> PaperDetails {
        PaperDetails {
            id: PaperId(id),
            author: Address::from_low_u64(1),
            title: format!("v{id}"),
            fingerprint: Fingerprint::new(format!("H{id}")),
            price: Amount::ZERO,
            team_members: String::new(),
            research_field: String::new(),
            is_approved: false,
            is_revision: previous.is_some(),
            previous_version: previous.map(PaperId),
        }
    }

    fn rejected() -> PaperStatus {
        PaperStatus {
            is_decided: true,
            is_approved: false,
            approval_count: 0,
            rejection_count: 3,
            stake: StakeInfo::default(),
        }
    }

    fn open() -> PaperStatus {
        PaperStatus::default()
    }

    #[test]
    fn test_chain_traversal() {
        let (p1, p2, p3, p4) = (paper(1, None), paper(2, None), paper(3, Some(1)), paper(4, Some(3)));
        let (r, o) = (rejected(), open());
        let arena = RevisionArena::from_records([(&p1, &r), (&p2, &o), (&p3, &r), (&p4, &o)]);

        assert_eq!(arena.latest(PaperId(1)).unwrap(), PaperId(4));
        assert_eq!(arena.root(PaperId(4)).unwrap(), PaperId(1));
        assert_eq!(
            arena.history(PaperId(3)).unwrap(),
            vec![PaperId(1), PaperId(3), PaperId(4)]
        );
        assert_eq!(arena.history(PaperId(2)).unwrap(), vec![PaperId(2)]);
        assert!(arena.has_successor(PaperId(1)));
        assert!(!arena.has_successor(PaperId(4)));
    }

    #[test]
    fn test_forward_pointer_fails_closed() {
        let (p1, p2) = (paper(1, Some(2)), paper(2, None));
        let r = rejected();
        let arena = RevisionArena::from_records([(&p1, &r), (&p2, &r)]);
        let err = arena.root(PaperId(1)).unwrap_err();
        assert!(matches!(err, GovernanceError::MalformedChain { .. }));
    }

    #[test]
    fn test_self_loop_fails_closed() {
        let p1 = paper(1, Some(1));
        let r = rejected();
        let arena = RevisionArena::from_records([(&p1, &r)]);
        assert!(matches!(arena.history(PaperId(1)), Err(GovernanceError::MalformedChain { .. })));
    }

    #[test]
    fn test_two_revisions_of_one_paper_fail_closed() {
        let (p1, p2, p3) = (paper(1, None), paper(2, Some(1)), paper(3, Some(1)));
        let (r, o) = (rejected(), open());
        let arena = RevisionArena::from_records([(&p1, &r), (&p2, &o), (&p3, &o)]);
        assert!(matches!(arena.latest(PaperId(1)), Err(GovernanceError::MalformedChain { .. })));
        assert!(matches!(arena.history(PaperId(3)), Err(GovernanceError::MalformedChain { .. })));
    }

    #[test]
    fn test_revision_of_unrejected_paper_fails_closed() {
        let (p1, p2) = (paper(1, None), paper(2, Some(1)));
        let o = open();
        let arena = RevisionArena::from_records([(&p1, &o), (&p2, &o)]);
        assert!(matches!(arena.root(PaperId(2)), Err(GovernanceError::MalformedChain { .. })));
    }

    #[test]
    fn test_unknown_paper() {
        let arena = RevisionArena::new();
        assert!(matches!(arena.latest(PaperId(9)), Err(GovernanceError::NotFound(_))));
    }

    #[test]
    fn test_validate_history() {
        let ids = |v: &[u64]| v.iter().copied().map(PaperId).collect::<Vec<_>>();
        assert!(validate_history(&ids(&[1, 3, 4]), PaperId(3), 4).is_ok());
        assert!(validate_history(&ids(&[]), PaperId(3), 4).is_err());
        assert!(validate_history(&ids(&[3, 1]), PaperId(3), 4).is_err());
        assert!(validate_history(&ids(&[1, 1]), PaperId(1), 4).is_err());
        assert!(validate_history(&ids(&[1, 5]), PaperId(1), 4).is_err());
        assert!(validate_history(&ids(&[1, 2]), PaperId(3), 4).is_err());
    }
}
