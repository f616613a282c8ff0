// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Async JSON-RPC 2.0 client for the governance ledger node.
//!
//! Methods used:
//! - `governance.list_proposal_ids [contract]` -> `[id, ...]`
//! - `governance.get_proposal [contract, id]` -> proposal object or `null`
//! - `chain.info []` -> `{"head": {"number": n}}`
//! - `chain.get_events [filter]` -> `[{"block_number", "transaction_hash", "data": {"proposal_id"}}]`
//!
//! Numbers may arrive as JSON numbers or decimal strings.

use super::{LedgerClient, ProposalCreatedLog, ProposalEventSource};
use crate::error::{SyncError, SyncResult};
use crate::types::{ImpactAnalysis, ProposalRecord, ProposalStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Event type emitted by the governance contract when a proposal is created
pub const PROPOSAL_CREATED_EVENT: &str = "ProposalCreated";

#[derive(Clone, Debug)]
pub struct JsonRpcLedgerClient {
    http_client: reqwest::Client,
    rpc_url: String,
    request_id: Arc<AtomicU64>,
    contract_address: String,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcLedgerClient {
    pub fn new(rpc_url: impl Into<String>, contract_address: impl Into<String>) -> Self {
        fn shared_http_client() -> reqwest::Client {
            static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
            CLIENT
                .get_or_init(|| {
                    reqwest::Client::builder()
                        .pool_max_idle_per_host(16)
                        .tcp_keepalive(Some(Duration::from_secs(30)))
                        .connect_timeout(Duration::from_secs(5))
                        .timeout(Duration::from_secs(30))
                        .build()
                        .expect("Failed to build reqwest client")
                })
                .clone()
        }

        Self {
            http_client: shared_http_client(),
            rpc_url: rpc_url.into(),
            request_id: Arc::new(AtomicU64::new(1)),
            contract_address: contract_address.into(),
        }
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> SyncResult<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id,
        };

        fn is_transient_transport_error(err: &reqwest::Error) -> bool {
            if err.is_connect() || err.is_timeout() {
                return true;
            }

            let msg = err.to_string().to_lowercase();
            msg.contains("connection closed")
                || msg.contains("connection reset")
                || msg.contains("broken pipe")
                || msg.contains("unexpected eof")
                || msg.contains("incomplete")
        }

        let max_attempts: usize = 3;
        let mut last_transport_err: Option<SyncError> = None;

        for attempt in 0..max_attempts {
            let response = match self
                .http_client
                .post(&self.rpc_url)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt + 1 < max_attempts && is_transient_transport_error(&err) {
                        tracing::warn!(
                            "[RPC] transport error calling {} (attempt {}/{}), retrying",
                            method,
                            attempt + 1,
                            max_attempts
                        );
                        last_transport_err = Some(transport_error(&err));
                        tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                        continue;
                    }
                    return Err(transport_error(&err));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                tracing::error!("[RPC] <<< HTTP error {} calling {}: {}", status, method, error_text);
                return Err(SyncError::Rpc(format!("HTTP error: {} - {}", status, error_text)));
            }

            let response_text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    if attempt + 1 < max_attempts && is_transient_transport_error(&err) {
                        tracing::warn!(
                            "[RPC] failed reading response for {} (attempt {}/{}), retrying",
                            method,
                            attempt + 1,
                            max_attempts
                        );
                        last_transport_err = Some(transport_error(&err));
                        tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                        continue;
                    }
                    return Err(transport_error(&err));
                }
            };

            let rpc_response: JsonRpcResponse = serde_json::from_str(&response_text)
                .map_err(|e| SyncError::InvalidResponse(format!("{}: {}", method, e)))?;

            if let Some(error) = rpc_response.error {
                tracing::error!(
                    "[RPC] {} returned error {}: {}",
                    method,
                    error.code,
                    error.message
                );
                return Err(SyncError::Rpc(format!(
                    "RPC error {}: {}",
                    error.code, error.message
                )));
            }

            // null is a valid result for lookups of missing objects
            return Ok(rpc_response.result.unwrap_or(Value::Null));
        }

        Err(last_transport_err
            .unwrap_or_else(|| SyncError::Rpc("RPC call failed after retries".to_string())))
    }
}

#[async_trait::async_trait]
impl LedgerClient for JsonRpcLedgerClient {
    async fn list_proposal_ids(&self) -> SyncResult<Vec<u64>> {
        let result = self
            .call(
                "governance.list_proposal_ids",
                vec![json!(self.contract_address)],
            )
            .await?;

        result
            .as_array()
            .ok_or_else(|| {
                SyncError::InvalidResponse("list_proposal_ids did not return an array".to_string())
            })?
            .iter()
            .map(|v| {
                value_as_u64(v).ok_or_else(|| {
                    SyncError::InvalidResponse(format!("Invalid proposal id {}", v))
                })
            })
            .collect()
    }

    async fn get_proposal_detail(&self, id: u64) -> SyncResult<Option<ProposalRecord>> {
        let result = self
            .call(
                "governance.get_proposal",
                vec![json!(self.contract_address), json!(id)],
            )
            .await?;

        if result.is_null() {
            return Ok(None);
        }
        parse_proposal(&result).map(Some)
    }
}

#[async_trait::async_trait]
impl ProposalEventSource for JsonRpcLedgerClient {
    async fn chain_height(&self) -> SyncResult<u64> {
        let chain_info = self.call("chain.info", vec![]).await?;
        chain_info
            .get("head")
            .and_then(|h| h.get("number"))
            .and_then(value_as_u64)
            .ok_or_else(|| SyncError::InvalidResponse("Failed to parse chain height".to_string()))
    }

    async fn get_proposal_events(
        &self,
        from_block: u64,
        to_block: u64,
        limit: u64,
    ) -> SyncResult<Vec<ProposalCreatedLog>> {
        let filter = json!({
            "from_block": from_block,
            "to_block": to_block,
            "addrs": [self.contract_address],
            "type_tags": [PROPOSAL_CREATED_EVENT],
            "limit": limit,
        });

        let result = self.call("chain.get_events", vec![filter]).await?;
        let events = result.as_array().ok_or_else(|| {
            SyncError::InvalidResponse("chain.get_events did not return an array".to_string())
        })?;

        Ok(events.iter().filter_map(parse_proposal_created).collect())
    }
}

fn transport_error(err: &reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout(err.to_string())
    } else {
        SyncError::Rpc(err.to_string())
    }
}

fn value_as_u64(v: &Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn u64_field(value: &Value, field: &str) -> u64 {
    value.get(field).and_then(value_as_u64).unwrap_or(0)
}

fn parse_status(value: &Value) -> SyncResult<ProposalStatus> {
    match value {
        Value::Null => Ok(ProposalStatus::Active),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "active" => Ok(ProposalStatus::Active),
            "passed" => Ok(ProposalStatus::Passed),
            "rejected" => Ok(ProposalStatus::Rejected),
            "executed" => Ok(ProposalStatus::Executed),
            "cancelled" | "canceled" => Ok(ProposalStatus::Cancelled),
            other => other
                .parse::<u8>()
                .map_err(|_| SyncError::InvalidResponse(format!("Unknown status {}", s)))
                .and_then(|n| ProposalStatus::try_from(n).map_err(SyncError::InvalidResponse)),
        },
        other => other
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| SyncError::InvalidResponse(format!("Unknown status {}", other)))
            .and_then(|n| ProposalStatus::try_from(n).map_err(SyncError::InvalidResponse)),
    }
}

/// Decode a `governance.get_proposal` result
pub fn parse_proposal(value: &Value) -> SyncResult<ProposalRecord> {
    let id = value
        .get("id")
        .and_then(value_as_u64)
        .ok_or_else(|| SyncError::InvalidResponse(format!("Proposal without id: {}", value)))?;

    let impact = match value.get("impact") {
        Some(v) if !v.is_null() => serde_json::from_value::<ImpactAnalysis>(v.clone())
            .map_err(|e| SyncError::InvalidResponse(format!("Invalid impact for {}: {}", id, e)))?,
        _ => ImpactAnalysis::default(),
    };

    Ok(ProposalRecord {
        id,
        title: str_field(value, "title"),
        description: str_field(value, "description"),
        category: str_field(value, "category"),
        location: str_field(value, "location"),
        proposer: str_field(value, "proposer"),
        funding_amount: u64_field(value, "funding_amount"),
        votes_for: u64_field(value, "votes_for"),
        votes_against: u64_field(value, "votes_against"),
        status: parse_status(value.get("status").unwrap_or(&Value::Null))?,
        end_time: u64_field(value, "end_time"),
        days_remaining: 0,
        impact,
        creation_tx: value
            .get("creation_tx")
            .and_then(|t| t.as_str())
            .map(|s| s.to_string()),
    })
}

fn parse_proposal_created(event: &Value) -> Option<ProposalCreatedLog> {
    let block_number = event.get("block_number").and_then(value_as_u64)?;
    let proposal_id = event
        .get("data")
        .and_then(|d| d.get("proposal_id"))
        .and_then(value_as_u64)?;
    let tx_hash = event
        .get("transaction_hash")
        .and_then(|t| t.as_str())
        .map(|s| s.to_string());

    Some(ProposalCreatedLog {
        proposal_id,
        block_number,
        tx_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proposal_full() {
        let value = json!({
            "id": "12",
            "title": "Community garden",
            "description": "Plant trees",
            "category": "environment",
            "location": "Lagos",
            "proposer": "0xabc",
            "funding_amount": "250000",
            "votes_for": 10,
            "votes_against": "3",
            "status": 1,
            "end_time": 1_700_000_000u64,
            "creation_tx": "0xfeed",
            "impact": {"score": 80, "summary": "good"}
        });

        let record = parse_proposal(&value).unwrap();
        assert_eq!(record.id, 12);
        assert_eq!(record.funding_amount, 250_000);
        assert_eq!(record.votes_against, 3);
        assert_eq!(record.status, ProposalStatus::Passed);
        assert_eq!(record.creation_tx.as_deref(), Some("0xfeed"));
        assert_eq!(record.impact.score, Some(80));
        assert!(!record.impact.is_complete());
    }

    #[test]
    fn test_parse_proposal_status_forms() {
        let named = json!({"id": 1, "status": "Cancelled"});
        assert_eq!(
            parse_proposal(&named).unwrap().status,
            ProposalStatus::Cancelled
        );

        let missing = json!({"id": 1});
        assert_eq!(
            parse_proposal(&missing).unwrap().status,
            ProposalStatus::Active
        );

        let bogus = json!({"id": 1, "status": 42});
        assert!(parse_proposal(&bogus).is_err());
    }

    #[test]
    fn test_parse_proposal_requires_id() {
        let err = parse_proposal(&json!({"title": "no id"})).unwrap_err();
        assert_eq!(err.error_type(), "invalid_response");
    }

    #[test]
    fn test_parse_proposal_created_event() {
        let event = json!({
            "block_number": "1024",
            "transaction_hash": "0xabc",
            "type_tag": "ProposalCreated",
            "data": {"proposal_id": 77}
        });
        assert_eq!(
            parse_proposal_created(&event),
            Some(ProposalCreatedLog {
                proposal_id: 77,
                block_number: 1024,
                tx_hash: Some("0xabc".to_string()),
            })
        );

        let without_data = json!({"block_number": 5});
        assert!(parse_proposal_created(&without_data).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_rpc_error() {
        // Port 9 (discard) is closed on test hosts; the connect fails fast.
        let client = JsonRpcLedgerClient::new("http://127.0.0.1:9", "0xGov");
        let err = client.list_proposal_ids().await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(client.contract_address(), "0xGov");
    }
}
