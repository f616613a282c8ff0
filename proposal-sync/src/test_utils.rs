// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Builders and scriptable ledger mocks shared by the unit tests.

use crate::error::{SyncError, SyncResult};
use crate::ledger::{FeedEvent, LedgerClient, NewProposalEvent, ProposalFeed};
use crate::snapshot_store::KeyValueStorage;
use crate::types::{CachedProposalRecord, ProposalRecord, ProposalStatus};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub fn proposal(id: u64) -> ProposalRecord {
    ProposalRecord {
        id,
        title: format!("Proposal {}", id),
        description: format!("Description of proposal {}", id),
        category: "infrastructure".to_string(),
        location: "Nairobi".to_string(),
        proposer: "0x00000000000000000000000000000000000000a1".to_string(),
        funding_amount: 1_000 * id,
        votes_for: id,
        votes_against: 0,
        status: ProposalStatus::Active,
        end_time: 0,
        days_remaining: 0,
        impact: Default::default(),
        creation_tx: None,
    }
}

pub fn cached(id: u64, timestamp: u64) -> CachedProposalRecord {
    CachedProposalRecord::new(proposal(id), timestamp)
}

pub fn new_proposal_event(record: ProposalRecord, block_number: u64) -> FeedEvent {
    FeedEvent::NewProposal(NewProposalEvent {
        record,
        block_number,
        tx_hash: None,
    })
}

/// Storage whose every operation fails
pub struct FailingStorage;

#[async_trait]
impl KeyValueStorage for FailingStorage {
    async fn get(&self, _key: &str) -> SyncResult<Option<String>> {
        Err(SyncError::Storage("get unavailable".to_string()))
    }

    async fn set(&self, _key: &str, _value: String) -> SyncResult<()> {
        Err(SyncError::Storage("set unavailable".to_string()))
    }

    async fn remove(&self, _key: &str) -> SyncResult<()> {
        Err(SyncError::Storage("remove unavailable".to_string()))
    }
}

/// Ledger client backed by an in-memory proposal map.
///
/// The listing call can be held open with [`MockLedgerClient::hold`] until
/// [`MockLedgerClient::release`], which lets tests observe state while a
/// fetch is in flight.
pub struct MockLedgerClient {
    proposals: Mutex<BTreeMap<u64, ProposalRecord>>,
    extra_ids: Mutex<Vec<u64>>,
    failing_details: Mutex<HashSet<u64>>,
    listing_error: Mutex<Option<SyncError>>,
    listing_failures_left: AtomicUsize,
    list_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self {
            proposals: Default::default(),
            extra_ids: Default::default(),
            failing_details: Default::default(),
            listing_error: Default::default(),
            listing_failures_left: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            gate: watch::channel(true).0,
        }
    }

    pub fn with_proposals(records: impl IntoIterator<Item = ProposalRecord>) -> Self {
        let client = Self::new();
        for record in records {
            client.insert(record);
        }
        client
    }

    pub fn insert(&self, record: ProposalRecord) {
        self.proposals.lock().unwrap().insert(record.id, record);
    }

    /// List `id` without serving a detail for it
    pub fn list_extra_id(&self, id: u64) {
        self.extra_ids.lock().unwrap().push(id);
    }

    pub fn fail_detail(&self, id: u64) {
        self.failing_details.lock().unwrap().insert(id);
    }

    /// Fail every listing call with `error` until reset with `None`
    pub fn fail_listing(&self, error: Option<SyncError>) {
        *self.listing_error.lock().unwrap() = error;
    }

    /// Fail the next `n` listing calls
    pub fn fail_listing_times(&self, n: usize) {
        self.listing_failures_left.store(n, Ordering::SeqCst);
    }

    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn list_proposal_ids(&self) -> SyncResult<Vec<u64>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if let Some(e) = self.listing_error.lock().unwrap().clone() {
            return Err(e);
        }
        let failing = self
            .listing_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Timeout("listing timed out".to_string()));
        }

        let mut ids: Vec<u64> = self.proposals.lock().unwrap().keys().copied().collect();
        ids.extend(self.extra_ids.lock().unwrap().iter().copied());
        Ok(ids)
    }

    async fn get_proposal_detail(&self, id: u64) -> SyncResult<Option<ProposalRecord>> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_details.lock().unwrap().contains(&id) {
            return Err(SyncError::Rpc(format!("detail {} unavailable", id)));
        }
        Ok(self.proposals.lock().unwrap().get(&id).cloned())
    }
}

/// Feed driven by the test through [`MockProposalFeed::emit`]
#[derive(Clone, Default)]
pub struct MockProposalFeed {
    // (open generation, sender of that subscription)
    sender: Arc<Mutex<Option<(usize, mpsc::Sender<FeedEvent>)>>>,
    open_error: Arc<Mutex<Option<SyncError>>>,
    open_calls: Arc<AtomicUsize>,
    last_from_block: Arc<Mutex<Option<u64>>>,
}

impl MockProposalFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, error: Option<SyncError>) {
        *self.open_error.lock().unwrap() = error;
    }

    /// Returns false when no subscription is open
    pub async fn emit(&self, event: FeedEvent) -> bool {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some((_, tx)) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|(_, tx)| !tx.is_closed())
    }

    /// Simulate the feed going away
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn last_from_block(&self) -> Option<u64> {
        *self.last_from_block.lock().unwrap()
    }
}

#[async_trait]
impl ProposalFeed for MockProposalFeed {
    async fn open(
        &self,
        from_block: Option<u64>,
        cancel: CancellationToken,
    ) -> SyncResult<mpsc::Receiver<FeedEvent>> {
        let generation = self.open_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_from_block.lock().unwrap() = from_block;
        if let Some(e) = self.open_error.lock().unwrap().clone() {
            return Err(e);
        }

        let (tx, rx) = mpsc::channel(100);
        *self.sender.lock().unwrap() = Some((generation, tx));

        let sender = self.sender.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let mut sender = sender.lock().unwrap();
            if sender.as_ref().is_some_and(|(g, _)| *g == generation) {
                sender.take();
            }
        });
        Ok(rx)
    }
}
