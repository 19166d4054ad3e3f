//! Ledger Gateway for paper verification
//!
//! A thin, stateless adapter over the external ledger that owns papers,
//! votes, committee membership and stakes. The ledger is the single source
//! of truth; this crate only exposes it through typed calls:
//!
//! - [`LedgerGateway`]: trait over the fixed, versioned contract surface
//! - [`RpcLedger`]: JSON-RPC over HTTP client for a deployed ledger
//! - [`InMemoryLedger`]: reference ledger enforcing the same rules, used
//!   for development and tests
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         governance (client core)        │
//! └────────────────┬────────────────────────┘
//!                  │ LedgerGateway
//!      ┌───────────┴───────────┐
//!      ▼                       ▼
//! ┌─────────────┐       ┌─────────────┐
//! │ RpcLedger   │       │ InMemory    │
//! │ (JSON-RPC)  │       │ Ledger      │
//! └─────────────┘       └─────────────┘
//! ```

pub mod memory;
pub mod rpc;
pub mod traits;
pub mod types;

pub use memory::{ExternalTx, InMemoryLedger};
pub use rpc::RpcLedger;
pub use traits::{LedgerError, LedgerGateway, Rejection};
pub use types::*;
