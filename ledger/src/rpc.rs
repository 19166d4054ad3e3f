//! JSON-RPC ledger client.
//!
//! Talks to a ledger node (or a thin signing relay in front of one) over
//! JSON-RPC 2.0. Method names are the contract surface names; write calls
//! carry the signing identity in `from` and any attached stake in `value`.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::traits::*;
use crate::types::*;

/// JSON-RPC backed ledger gateway.
pub struct RpcLedger {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl RpcLedger {
    /// Create a client for `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, LedgerError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Create a client pointing at a local development node.
    pub fn local(port: u16) -> Result<Self, LedgerError> {
        Self::new(format!("http://localhost:{}", port), Duration::from_secs(30))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!(method = %method, id, "Ledger RPC call");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LedgerError::Unavailable(e.to_string())
                } else {
                    LedgerError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LedgerError::Http {
                status: status.as_u16(),
                message: text,
            });
        }

        let envelope: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))?;

        if let Some(error) = envelope.error {
            return Err(classify_error(error));
        }

        envelope
            .result
            .ok_or_else(|| LedgerError::Parse(format!("{}: response has neither result nor error", method)))
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Map a JSON-RPC error object onto [`LedgerError`].
fn classify_error(error: RpcErrorObject) -> LedgerError {
    let reason = error
        .data
        .as_ref()
        .and_then(|d| d.get("reason"))
        .and_then(|r| r.as_str())
        .unwrap_or(&error.message);

    if let Some(rejection) = Rejection::from_reason(reason) {
        return LedgerError::Rejected(rejection);
    }

    if let Some(id) = error
        .data
        .as_ref()
        .and_then(|d| d.get("paperId"))
        .and_then(|v| v.as_u64())
    {
        if reason.to_ascii_lowercase().contains("not found") {
            return LedgerError::PaperNotFound(PaperId(id));
        }
    }

    LedgerError::Rpc {
        code: error.code,
        message: reason.to_string(),
    }
}

#[async_trait]
impl LedgerGateway for RpcLedger {
    fn id(&self) -> &str {
        &self.endpoint
    }

    async fn is_available(&self) -> bool {
        self.paper_count().await.is_ok()
    }

    async fn submit_paper(
        &self,
        caller: &Address,
        paper: NewPaper,
        stake: Amount,
    ) -> Result<TxReceipt, LedgerError> {
        self.call(
            "submitPaper",
            json!({ "from": caller, "value": stake, "paper": paper }),
        )
        .await
    }

    async fn vote_on_paper(
        &self,
        caller: &Address,
        paper_id: PaperId,
        approve: bool,
        comment: &str,
    ) -> Result<TxReceipt, LedgerError> {
        self.call(
            "voteOnPaper",
            json!({ "from": caller, "paperId": paper_id, "approve": approve, "comment": comment }),
        )
        .await
    }

    async fn resubmit_paper(
        &self,
        caller: &Address,
        previous: PaperId,
        paper: NewPaper,
        stake: Amount,
    ) -> Result<TxReceipt, LedgerError> {
        self.call(
            "resubmitPaper",
            json!({ "from": caller, "value": stake, "previousVersion": previous, "paper": paper }),
        )
        .await
    }

    async fn claim_stake(&self, caller: &Address, paper_id: PaperId) -> Result<TxReceipt, LedgerError> {
        self.call("claimStake", json!({ "from": caller, "paperId": paper_id }))
            .await
    }

    async fn add_member(&self, caller: &Address, member: &Address) -> Result<TxReceipt, LedgerError> {
        self.call("addMember", json!({ "from": caller, "member": member }))
            .await
    }

    async fn get_paper_details(&self, paper_id: PaperId) -> Result<PaperDetails, LedgerError> {
        self.call("getPaperDetails", json!({ "paperId": paper_id })).await
    }

    async fn get_paper_status(&self, paper_id: PaperId) -> Result<PaperStatus, LedgerError> {
        self.call("getPaperStatus", json!({ "paperId": paper_id })).await
    }

    async fn get_paper_voters(&self, paper_id: PaperId) -> Result<Vec<Address>, LedgerError> {
        self.call("getPaperVoters", json!({ "paperId": paper_id })).await
    }

    async fn get_paper_comment(&self, paper_id: PaperId, voter: &Address) -> Result<String, LedgerError> {
        self.call("getPaperComment", json!({ "paperId": paper_id, "voter": voter }))
            .await
    }

    async fn get_paper_revision_history(&self, paper_id: PaperId) -> Result<Vec<PaperId>, LedgerError> {
        self.call("getPaperRevisionHistory", json!({ "paperId": paper_id }))
            .await
    }

    async fn get_latest_revision(&self, paper_id: PaperId) -> Result<PaperId, LedgerError> {
        self.call("getLatestRevision", json!({ "paperId": paper_id })).await
    }

    async fn is_member(&self, who: &Address) -> Result<bool, LedgerError> {
        self.call("members", json!({ "address": who })).await
    }

    async fn total_members(&self) -> Result<u64, LedgerError> {
        self.call("totalMembers", json!({})).await
    }

    async fn get_member_by_index(&self, index: u64) -> Result<Address, LedgerError> {
        self.call("getMemberByIndex", json!({ "index": index })).await
    }

    async fn min_required_votes(&self) -> Result<u32, LedgerError> {
        self.call("minRequiredVotes", json!({})).await
    }

    async fn staking_amount(&self) -> Result<Amount, LedgerError> {
        self.call("stakingAmount", json!({})).await
    }

    async fn paper_count(&self) -> Result<u64, LedgerError> {
        self.call("paperCount", json!({})).await
    }

    async fn owner(&self) -> Result<Address, LedgerError> {
        self.call("owner", json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_creation() {
        let ledger = RpcLedger::local(8545).unwrap();
        assert_eq!(ledger.id(), "http://localhost:8545");
    }

    #[test]
    fn test_classify_revert_reason() {
        let err = classify_error(RpcErrorObject {
            code: 3,
            message: "execution reverted".into(),
            data: Some(json!({ "reason": "Already voted" })),
        });
        assert_eq!(err, LedgerError::Rejected(Rejection::AlreadyVoted));

        let err = classify_error(RpcErrorObject {
            code: -32000,
            message: "Paper not found".into(),
            data: Some(json!({ "paperId": 7 })),
        });
        assert_eq!(err, LedgerError::PaperNotFound(PaperId(7)));

        let err = classify_error(RpcErrorObject {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        });
        assert!(matches!(err, LedgerError::Rpc { code: -32601, .. }));
    }
}
