//! Paper-verification governance core
//!
//! Orchestrates the life of a paper against an authoritative ledger and a
//! loosely coupled metadata store:
//!
//! - **Governance engine**: submission, voting, decision, settlement and
//!   the revision chain, with invariant pre-checks before every write
//! - **Membership workflow**: off-ledger requests, ledger-first approval,
//!   enumerable member listing
//! - **Reconciliation**: merges ledger records with metadata records that
//!   share no enforced key, degrading to blank fields on a miss
//! - **Service**: request/response surface for the UI and CLI
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    GovernanceService                        │
//! │                                                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │  Governance  │  │  Membership  │  │  Reconciler  │       │
//! │  │  Engine      │  │  Workflow    │  │              │       │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘       │
//! │         │   CallPolicy    │                 │               │
//! └─────────┼─────────────────┼─────────────────┼───────────────┘
//!           ▼                 ▼                 ▼
//!     LedgerGateway   MembershipRequestStore  MetadataStore
//! ```

pub mod calls;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod membership;
pub mod reconcile;
pub mod service;
pub mod state;

// Re-export main types
pub use calls::CallPolicy;
pub use chain::RevisionArena;
pub use config::GovernanceConfig;
pub use engine::{GovernanceEngine, PendingWrite, WriteStatus};
pub use error::{ErrorKind, GovernanceError, Result, Violation};
pub use membership::MembershipWorkflow;
pub use reconcile::{MetadataMatch, PaperView, Reconciler};
pub use service::{Command, CommandOutcome, Envelope, GovernanceService};
pub use state::{Outcome, PaperState, Settlement};
