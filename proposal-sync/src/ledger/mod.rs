// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Ledger access
//!
//! The collaborators the synchronization core reads proposals from:
//!
//! - [`LedgerClient`]: point reads (identifier listing, per-proposal detail)
//! - [`ProposalFeed`]: a long-lived stream of new-proposal notifications
//!
//! ```text
//!  ┌──────────────────────┐        ┌──────────────────────────┐
//!  │ JsonRpcLedgerClient  │◀───────│   PollingProposalFeed    │
//!  │  list / get / events │        │ chain.info + get_events  │
//!  └──────────┬───────────┘        └────────────┬─────────────┘
//!             │                                 │ FeedEvent
//!             ▼                                 ▼
//!     AuthoritativeFetcher               EventSubscriber
//! ```
//!
//! The feed only emits data; deduplication and persistence are the
//! orchestrator's job.

mod feed;
mod jsonrpc;

pub use feed::PollingProposalFeed;
pub use jsonrpc::{parse_proposal, JsonRpcLedgerClient};

use crate::error::SyncResult;
use crate::types::ProposalRecord;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Point reads against the governance contract
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// All proposal identifiers currently known to the contract
    async fn list_proposal_ids(&self) -> SyncResult<Vec<u64>>;

    /// Full record for one proposal, `None` if the ledger has no such id
    async fn get_proposal_detail(&self, id: u64) -> SyncResult<Option<ProposalRecord>>;
}

/// A `ProposalCreated` log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalCreatedLog {
    pub proposal_id: u64,
    pub block_number: u64,
    pub tx_hash: Option<String>,
}

/// Block-range queries the polling feed is built on
#[async_trait::async_trait]
pub trait ProposalEventSource: LedgerClient {
    /// Current head block number
    async fn chain_height(&self) -> SyncResult<u64>;

    /// Up to `limit` `ProposalCreated` events in `[from_block, to_block]`,
    /// ordered by block. A full page may have left events out.
    async fn get_proposal_events(
        &self,
        from_block: u64,
        to_block: u64,
        limit: u64,
    ) -> SyncResult<Vec<ProposalCreatedLog>>;
}

/// A proposal observed on the live feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProposalEvent {
    pub record: ProposalRecord,
    /// Block the creation event was emitted in
    pub block_number: u64,
    /// Transaction that created the proposal
    pub tx_hash: Option<String>,
}

/// Notifications emitted by a [`ProposalFeed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    NewProposal(NewProposalEvent),
    /// The feed (re)established contact with the ledger
    Connected,
    /// The feed lost contact with the ledger; it keeps retrying
    Disconnected { reason: String },
}

/// Source of new-proposal notifications.
///
/// Delivery is at-least-once: the same proposal may be emitted more than once.
#[async_trait::async_trait]
pub trait ProposalFeed: Send + Sync {
    /// Start streaming notifications for blocks after `from_block`
    /// (or from the current head when `None`) until `cancel` fires or the
    /// receiver is dropped.
    async fn open(
        &self,
        from_block: Option<u64>,
        cancel: CancellationToken,
    ) -> SyncResult<mpsc::Receiver<FeedEvent>>;
}
