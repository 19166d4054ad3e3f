//! Call policy for external systems.
//!
//! Reads are retried with linear backoff while the failure looks transient.
//! Writes are never retried: a write that is not confirmed within the
//! configured window is reported as unconfirmed and left for the caller to
//! check against the ledger.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use ledger::{LedgerError, TxReceipt};
use metastore::StoreError;

use crate::config::CallConfig;
use crate::error::{GovernanceError, Result};

/// Errors that may clear up on their own.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for LedgerError {
    fn is_transient(&self) -> bool {
        LedgerError::is_transient(self)
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

/// Timeouts, retries and concurrency bounds for outbound calls.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    config: CallConfig,
}

impl CallPolicy {
    pub fn new(config: CallConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Write confirmation window in milliseconds.
    pub fn write_timeout_ms(&self) -> u64 {
        self.config.write_timeout_ms
    }

    /// Run a read, retrying transient failures.
    pub async fn read<T, E, F, Fut>(&self, what: &str, mut op: F) -> std::result::Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.config.read_retry_count => {
                    attempt += 1;
                    let delay = self.config.read_retry_delay_ms * u64::from(attempt);
                    debug!(call = what, attempt, delay_ms = delay, error = %e, "Retrying read");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                result => return result,
            }
        }
    }

    /// Run a ledger read, mapping the final failure.
    pub async fn ledger_read<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, LedgerError>>,
    {
        self.read(what, op).await.map_err(GovernanceError::from_read)
    }

    /// Submit a ledger write and wait for its confirmation.
    pub async fn write<Fut>(&self, operation: &str, fut: Fut) -> Result<TxReceipt>
    where
        Fut: Future<Output = std::result::Result<TxReceipt, LedgerError>>,
    {
        let timeout_ms = self.config.write_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
            Ok(Ok(receipt)) => {
                debug!(operation, tx = %receipt.tx_hash, "Write confirmed");
                Ok(receipt)
            }
            Ok(Err(e)) => Err(GovernanceError::from_write(operation, timeout_ms, e)),
            Err(_) => {
                warn!(operation, timeout_ms, "Write not confirmed in time");
                Err(GovernanceError::Unconfirmed {
                    operation: operation.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// Map `items` through `f` with bounded concurrency, preserving order.
    pub async fn fan_out<I, T, F, Fut>(&self, items: I, f: F) -> Vec<T>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        stream::iter(items)
            .map(f)
            .buffered(self.config.max_concurrent_reads.max(1))
            .collect()
            .await
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::new(CallConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> CallPolicy {
        CallPolicy::new(CallConfig {
            write_timeout_ms: 50,
            read_retry_count: 2,
            read_retry_delay_ms: 1,
            max_concurrent_reads: 2,
        })
    }

    #[tokio::test]
    async fn test_read_retries_transient_then_succeeds() {
        let policy = fast_policy();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: std::result::Result<u32, LedgerError> = policy
            .read("probe", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LedgerError::Network("flaky".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_read_gives_up_after_budget() {
        let policy = fast_policy();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy
            .ledger_read("probe", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(LedgerError::Unavailable("down".into()))
            })
            .await;
        assert!(matches!(result, Err(GovernanceError::LedgerUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_read_error_not_retried() {
        let policy = fast_policy();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _ = policy
            .ledger_read("probe", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(LedgerError::Parse("bad".into()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_write_is_unconfirmed() {
        let policy = fast_policy();
        let result = policy
            .write("submitPaper", async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(TxReceipt {
                    tx_hash: "0x1".into(),
                    paper_id: None,
                })
            })
            .await;
        assert_eq!(
            result,
            Err(GovernanceError::Unconfirmed {
                operation: "submitPaper".into(),
                timeout_ms: 50
            })
        );
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let policy = fast_policy();
        let out = policy
            .fan_out(vec![30u64, 1, 10], |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ms
            })
            .await;
        assert_eq!(out, vec![30, 1, 10]);
    }
}
