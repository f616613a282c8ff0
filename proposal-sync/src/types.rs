// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Proposal records and the cached, optimistic and exposed views built on them.

use serde::{Deserialize, Serialize};
use std::fmt;

const SECS_PER_DAY: u64 = 86_400;

/// Lifecycle status of a governance proposal as reported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProposalStatus {
    #[default]
    Active,
    Passed,
    Rejected,
    Executed,
    Cancelled,
}

impl ProposalStatus {
    /// Whether voting is still open
    pub fn is_open(&self) -> bool {
        matches!(self, ProposalStatus::Active)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalStatus::Active => "active",
            ProposalStatus::Passed => "passed",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Executed => "executed",
            ProposalStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl TryFrom<u8> for ProposalStatus {
    type Error = String;

    // Contract enum ordering
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ProposalStatus::Active),
            1 => Ok(ProposalStatus::Passed),
            2 => Ok(ProposalStatus::Rejected),
            3 => Ok(ProposalStatus::Executed),
            4 => Ok(ProposalStatus::Cancelled),
            other => Err(format!("unknown proposal status {}", other)),
        }
    }
}

/// Result of the external impact-scoring call. Any field may be missing
/// while the analysis is still running or if it failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiaries: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sustainability_score: Option<u8>,
}

impl ImpactAnalysis {
    pub fn is_complete(&self) -> bool {
        self.score.is_some()
            && self.summary.is_some()
            && self.beneficiaries.is_some()
            && self.sustainability_score.is_some()
    }
}

/// One governance proposal as known to the client.
///
/// `id` is assigned by the ledger, never reused, and is the only key used
/// for merging and deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub proposer: String,
    pub funding_amount: u64,
    pub votes_for: u64,
    pub votes_against: u64,
    pub status: ProposalStatus,
    /// Voting deadline, unix seconds
    pub end_time: u64,
    #[serde(default)]
    pub days_remaining: u64,
    #[serde(default)]
    pub impact: ImpactAnalysis,
    /// Hash of the transaction that created the proposal, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_tx: Option<String>,
}

impl ProposalRecord {
    /// Whole days until `end_time`, rounded up, zero once the deadline passed
    pub fn days_remaining_at(&self, now_secs: u64) -> u64 {
        let left = self.end_time.saturating_sub(now_secs);
        left.div_ceil(SECS_PER_DAY)
    }

    pub fn refresh_days_remaining(&mut self, now_secs: u64) {
        self.days_remaining = self.days_remaining_at(now_secs);
    }

    /// Whether `tx_id` is the transaction that created this proposal
    pub fn created_by(&self, tx_id: &str) -> bool {
        self.creation_tx
            .as_deref()
            .is_some_and(|tx| tx.eq_ignore_ascii_case(tx_id))
    }
}

/// A record as held in the durable snapshot, stamped with the time it was
/// last written (unix milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProposalRecord {
    #[serde(flatten)]
    pub record: ProposalRecord,
    pub timestamp: u64,
}

impl CachedProposalRecord {
    pub fn new(record: ProposalRecord, timestamp: u64) -> Self {
        Self { record, timestamp }
    }

    pub fn id(&self) -> u64 {
        self.record.id
    }
}

/// The unit persisted under one `(network, contract)` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub proposals: Vec<CachedProposalRecord>,
    /// When the snapshot was written (unix milliseconds)
    pub timestamp: u64,
}

impl CacheSnapshot {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }
}

fn always_true() -> bool {
    true
}

/// A proposal the user submitted that the ledger has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticProposalRecord {
    #[serde(flatten)]
    pub record: ProposalRecord,
    /// Pending transaction that will create the proposal
    pub tx_id: String,
    /// Unix milliseconds when the submission was observed
    pub submitted_at: u64,
    #[serde(default = "always_true")]
    is_optimistic: bool,
}

impl OptimisticProposalRecord {
    pub fn new(record: ProposalRecord, tx_id: impl Into<String>, submitted_at: u64) -> Self {
        Self {
            record,
            tx_id: tx_id.into(),
            submitted_at,
            is_optimistic: true,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.is_optimistic
    }
}

/// An entry of the reconciled view handed to consumers.
///
/// Serialized untagged: optimistic entries carry `"is_optimistic": true`,
/// confirmed entries carry no such field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProposalView {
    Optimistic(OptimisticProposalRecord),
    Confirmed(ProposalRecord),
}

impl ProposalView {
    pub fn record(&self) -> &ProposalRecord {
        match self {
            ProposalView::Optimistic(o) => &o.record,
            ProposalView::Confirmed(r) => r,
        }
    }

    pub fn id(&self) -> u64 {
        self.record().id
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, ProposalView::Optimistic(_))
    }

    pub fn tx_id(&self) -> Option<&str> {
        match self {
            ProposalView::Optimistic(o) => Some(&o.tx_id),
            ProposalView::Confirmed(_) => None,
        }
    }
}

/// Namespace of one snapshot: the network and the governance contract on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheNamespace {
    pub network: String,
    pub contract: String,
}

impl CacheNamespace {
    pub fn new(network: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            contract: contract.into(),
        }
    }

    /// Storage key for the given entry kind, e.g. `sepolia_0xabc_event_cache`.
    /// Addresses are compared case-insensitively on chain so the key is lowercased.
    pub fn storage_key(&self, suffix: &str) -> String {
        format!(
            "{}_{}_{}",
            self.network,
            self.contract.to_ascii_lowercase(),
            suffix
        )
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.contract)
    }
}
