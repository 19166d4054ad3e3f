//! Off-ledger stores for paper verification
//!
//! Holds what the ledger does not: abstracts, file references, submission
//! timestamps, plagiarism verdicts, mirrored review comments, and
//! membership requests. Nothing here is transactionally linked to the
//! ledger; records join to ledger papers on a best-effort key only.
//!
//! - [`MetadataStore`]: query-by-field / create / update of paper metadata
//! - [`MembershipRequestStore`]: request intake and review status
//! - In-memory implementations, plus MongoDB ones behind the `mongo` feature

pub mod memory;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod store;
pub mod types;

pub use memory::{InMemoryMetadataStore, InMemoryRequestStore};
#[cfg(feature = "mongo")]
pub use mongo::{MongoMetadataStore, MongoRequestStore, MongoStores};
pub use store::{MembershipRequestStore, MetadataStore, StoreError};
pub use types::*;
