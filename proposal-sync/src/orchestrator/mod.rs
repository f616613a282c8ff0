// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Refresh orchestrator
//!
//! Sequences the snapshot store, fetcher, subscriber and optimistic overlay
//! into one reconciled proposal view per `(network, contract)`.
//!
//! ```text
//!  Idle ─▶ CacheHydrating ─▶ RenderCache ─▶ FreshFetching ─▶ Live ─▶ PeriodicWait
//!                 │                              ▲   │                     │
//!                 └──── (no valid snapshot) ─────┘   ▼                     │
//!                                                  Error ◀─────────────────┘
//! ```
//!
//! ## Fetch coalescing
//!
//! Initial load, [`SyncOrchestrator::refetch_proposals`],
//! [`SyncOrchestrator::refresh_proposals`] and the periodic timer share one
//! in-flight slot. A request made while a fetch runs waits for that fetch's
//! result instead of starting another one. The fetch itself runs in its own
//! task so a caller that stops waiting cannot leave the slot occupied.
//!
//! ## Teardown
//!
//! [`SyncOrchestrator::shutdown`] unsubscribes, stops the timer and clears
//! the liveness flag. A fetch still running at that point completes but its
//! result is dropped.

mod view;

pub use view::{SyncPhase, SyncView};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::fetcher::AuthoritativeFetcher;
use crate::ledger::{FeedEvent, LedgerClient, NewProposalEvent, ProposalFeed};
use crate::merge::merge_at;
use crate::metrics::SyncMetrics;
use crate::optimistic::OptimisticOverlay;
use crate::snapshot_store::{CacheStats, SnapshotStore};
use crate::subscriber::{EventSubscriber, Subscription};
use crate::types::{
    CacheNamespace, CachedProposalRecord, OptimisticProposalRecord, ProposalRecord, ProposalView,
};
use crate::utils::{now_ms, now_secs};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of a submitted create-proposal transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Included on the ledger; `proposal_id` when the receipt exposes it
    Confirmed { proposal_id: Option<u64> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Merge fresh records into what is already known
    Refetch,
    /// Replace known records with the fresh listing
    Refresh,
}

#[derive(Debug, Default)]
struct Inner {
    confirmed: Vec<CachedProposalRecord>,
    phase: SyncPhase,
    is_loading: bool,
    is_connected: bool,
    error: Option<String>,
    new_proposal_count: u64,
    cache_stats: CacheStats,
    showing_cached: bool,
    last_block: Option<u64>,
    last_fetch_completed: Option<Instant>,
    /// Ids merged since the running fetch started; a refresh keeps them
    merged_since_fetch: HashSet<u64>,
}

pub struct SyncOrchestrator {
    ns: CacheNamespace,
    config: SyncConfig,
    store: Arc<SnapshotStore>,
    fetcher: AuthoritativeFetcher,
    subscriber: EventSubscriber,
    overlay: OptimisticOverlay,
    metrics: Arc<SyncMetrics>,

    inner: Mutex<Inner>,
    /// Serializes merge + persist so a slower writer cannot persist a stale merge
    persist_lock: tokio::sync::Mutex<()>,
    subscription: Mutex<Option<Subscription>>,

    initialized: AtomicBool,
    alive: AtomicBool,
    cancel: CancellationToken,

    fetch_in_progress: AtomicBool,
    in_flight: tokio::sync::Mutex<Option<broadcast::Sender<SyncResult<()>>>>,

    view_tx: watch::Sender<SyncView>,
}

impl SyncOrchestrator {
    pub fn new(
        ns: CacheNamespace,
        config: SyncConfig,
        store: Arc<SnapshotStore>,
        client: Arc<dyn LedgerClient>,
        feed: Arc<dyn ProposalFeed>,
        metrics: Arc<SyncMetrics>,
    ) -> Arc<Self> {
        let fetcher = AuthoritativeFetcher::new(client, &config).with_metrics(metrics.clone());
        let (view_tx, _) = watch::channel(SyncView::default());
        Arc::new(Self {
            ns,
            config,
            store,
            fetcher,
            subscriber: EventSubscriber::new(feed),
            overlay: OptimisticOverlay::new(),
            metrics,
            inner: Mutex::new(Inner::default()),
            persist_lock: tokio::sync::Mutex::new(()),
            subscription: Mutex::new(None),
            initialized: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            fetch_in_progress: AtomicBool::new(false),
            in_flight: tokio::sync::Mutex::new(None),
            view_tx,
        })
    }

    pub fn namespace(&self) -> &CacheNamespace {
        &self.ns
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Start the loading pipeline.
    ///
    /// Renders a valid snapshot immediately and fetches in the background;
    /// without one, waits for the first fetch. Returns `Ok(false)` when the
    /// orchestrator was already initialized.
    pub async fn initialize(self: &Arc<Self>) -> SyncResult<bool> {
        if !self.is_alive() {
            return Err(SyncError::ShutDown);
        }
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[{}] Already initialized", self.ns);
            return Ok(false);
        }

        info!("[{}] Initializing proposal sync", self.ns);
        self.update(|inner| {
            inner.phase = SyncPhase::CacheHydrating;
            inner.is_loading = true;
        });

        let snapshot = self.store.read(&self.ns).await;
        let cache_stats = self.store.stats(&self.ns).await;
        let last_block = self.store.read_last_block(&self.ns).await;
        let rendered = snapshot.is_some();

        self.update(|inner| {
            inner.cache_stats = cache_stats;
            inner.last_block = last_block;
            if let Some(snapshot) = snapshot {
                info!(
                    "[{}] Rendering {} cached proposals",
                    self.ns,
                    snapshot.proposals.len()
                );
                inner.confirmed = snapshot.proposals;
                inner.phase = SyncPhase::RenderCache;
                inner.is_loading = false;
                inner.showing_cached = true;
            }
        });
        self.metrics
            .cached_proposals
            .set(self.inner.lock().confirmed.len() as i64);

        if rendered {
            let this = self.clone();
            tokio::spawn(async move {
                // Outcome is reflected in the view
                let _ = this.request_fetch(FetchMode::Refetch).await;
            });
        } else {
            // Errors are reflected in the view; the periodic tick retries
            let _ = self.request_fetch(FetchMode::Refetch).await;
        }

        self.spawn_periodic_refresh();
        Ok(true)
    }

    /// Cache-aware refresh: fresh records are merged into the known ones
    pub async fn refetch_proposals(self: &Arc<Self>) -> SyncResult<()> {
        self.request_fetch(FetchMode::Refetch).await
    }

    /// Refresh that bypasses the snapshot: the fresh listing replaces known records
    pub async fn refresh_proposals(self: &Arc<Self>) -> SyncResult<()> {
        self.request_fetch(FetchMode::Refresh).await
    }

    /// Current reconciled view.
    ///
    /// Optimistic entries come first, newest submission first. Identifiers
    /// are unique: an optimistic entry is left out while its transaction or
    /// its identifier is already taken by a confirmed record or a newer
    /// optimistic entry.
    pub fn view(&self) -> SyncView {
        let optimistic = self.overlay.list();
        let inner = self.inner.lock();

        let mut taken: HashSet<u64> = inner.confirmed.iter().map(|c| c.id()).collect();
        let mut proposals: Vec<ProposalView> =
            Vec::with_capacity(optimistic.len() + inner.confirmed.len());
        for pending in optimistic {
            let confirmed = inner
                .confirmed
                .iter()
                .any(|c| c.record.created_by(&pending.tx_id));
            if confirmed || !taken.insert(pending.record.id) {
                continue;
            }
            proposals.push(ProposalView::Optimistic(pending));
        }
        proposals.extend(
            inner
                .confirmed
                .iter()
                .map(|c| ProposalView::Confirmed(c.record.clone())),
        );

        SyncView {
            proposals,
            is_loading: inner.is_loading,
            is_connected: inner.is_connected,
            error: inner.error.clone(),
            new_proposal_count: inner.new_proposal_count,
            cache_stats: inner.cache_stats,
            showing_cached: inner.showing_cached,
            phase: inner.phase,
        }
    }

    /// Receiver that observes every published view
    pub fn subscribe_view(&self) -> watch::Receiver<SyncView> {
        self.view_tx.subscribe()
    }

    pub fn acknowledge_new_proposals(&self) {
        self.update(|inner| inner.new_proposal_count = 0);
    }

    /// Show a submitted proposal ahead of confirmed data until its outcome is known
    pub fn on_transaction_submitted(&self, record: ProposalRecord, tx_id: impl Into<String>) {
        let pending = OptimisticProposalRecord::new(record, tx_id, now_ms());
        debug!("[{}] Optimistic proposal for tx {}", self.ns, pending.tx_id);
        self.overlay.add(pending);
        self.metrics
            .optimistic_proposals
            .with_label_values(&["submitted"])
            .inc();
        self.publish();
    }

    /// Resolve a submitted transaction.
    ///
    /// A confirmation carrying the proposal id fetches that proposal so the
    /// confirmed record replaces the optimistic one right away. Without an id
    /// the entry stays until the feed or a fetch delivers a record created by
    /// the transaction.
    pub async fn on_transaction_outcome(
        self: &Arc<Self>,
        tx_id: &str,
        outcome: TransactionOutcome,
    ) -> SyncResult<()> {
        match outcome {
            TransactionOutcome::Failed { reason } => {
                if self.overlay.remove_by_tx_id(tx_id).is_some() {
                    warn!("[{}] Proposal tx {} failed: {}", self.ns, tx_id, reason);
                    self.metrics
                        .optimistic_proposals
                        .with_label_values(&["failed"])
                        .inc();
                    self.publish();
                }
                Ok(())
            }
            TransactionOutcome::Confirmed { proposal_id: None } => {
                debug!(
                    "[{}] Tx {} confirmed without proposal id, waiting for feed",
                    self.ns, tx_id
                );
                Ok(())
            }
            TransactionOutcome::Confirmed {
                proposal_id: Some(id),
            } => {
                let Some(mut record) = self.fetcher.fetch_one(id).await? else {
                    debug!(
                        "[{}] Proposal {} from tx {} not visible yet",
                        self.ns, id, tx_id
                    );
                    return Ok(());
                };
                if !self.is_alive() {
                    return Err(SyncError::ShutDown);
                }
                if record.creation_tx.is_none() {
                    record.creation_tx = Some(tx_id.to_string());
                }
                self.apply_records(std::slice::from_ref(&record), FetchMode::Refetch)
                    .await;
                if self.overlay.remove_by_tx_id(tx_id).is_some() {
                    self.metrics
                        .optimistic_proposals
                        .with_label_values(&["confirmed"])
                        .inc();
                }
                self.reconcile_overlay(std::slice::from_ref(&record));
                info!("[{}] Proposal {} confirmed by tx {}", self.ns, id, tx_id);
                self.publish();
                Ok(())
            }
        }
    }

    /// Tear down: unsubscribe, stop the timer and drop late fetch results.
    /// Safe to call in any state, any number of times.
    pub fn shutdown(&self) {
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
        if !was_alive {
            return;
        }

        info!("[{}] Shutting down proposal sync", self.ns);
        self.metrics.feed_connected.set(0);
        self.update(|inner| {
            inner.phase = SyncPhase::Stopped;
            inner.is_connected = false;
            inner.is_loading = false;
        });
    }

    async fn request_fetch(self: &Arc<Self>, mode: FetchMode) -> SyncResult<()> {
        if !self.is_alive() {
            return Err(SyncError::ShutDown);
        }

        let mut rx = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.as_ref() {
                Some(tx) => {
                    debug!("[{}] Fetch in progress, joining it", self.ns);
                    self.metrics.refreshes_coalesced.inc();
                    tx.subscribe()
                }
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    *in_flight = Some(tx);
                    self.fetch_in_progress.store(true, Ordering::Release);
                    let this = self.clone();
                    tokio::spawn(async move { this.run_fetch(mode).await });
                    rx
                }
            }
        };

        rx.recv().await.unwrap_or(Err(SyncError::ChannelClosed))
    }

    async fn run_fetch(self: Arc<Self>, mode: FetchMode) {
        let result = self.fetch_once(mode).await;

        let tx = self.in_flight.lock().await.take();
        self.fetch_in_progress.store(false, Ordering::Release);
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
    }

    async fn fetch_once(self: &Arc<Self>, mode: FetchMode) -> SyncResult<()> {
        self.update(|inner| {
            inner.phase = SyncPhase::FreshFetching;
            // Block the consumer only when there is nothing to show
            inner.is_loading = inner.confirmed.is_empty();
            inner.merged_since_fetch.clear();
        });

        let result = self.fetcher.fetch_all().await;
        if !self.is_alive() {
            debug!("[{}] Discarding fetch result after shutdown", self.ns);
            return Err(SyncError::ShutDown);
        }

        match result {
            Ok(fresh) => {
                self.apply_records(&fresh, mode).await;
                self.reconcile_overlay(&fresh);
                self.update(|inner| {
                    inner.error = None;
                    inner.is_loading = false;
                    inner.showing_cached = false;
                    inner.last_fetch_completed = Some(Instant::now());
                });
                self.ensure_subscribed().await;
                if self.is_alive() {
                    self.update(|inner| inner.phase = SyncPhase::Live);
                }
                Ok(())
            }
            Err(e) => {
                error!("[{}] Fresh fetch failed: {}", self.ns, e);
                self.update(|inner| {
                    inner.error = Some(e.to_string());
                    inner.is_loading = false;
                    inner.showing_cached = !inner.confirmed.is_empty();
                    inner.phase = SyncPhase::Error;
                });
                Err(e)
            }
        }
    }

    /// Merge records into the view and persist the result.
    ///
    /// A refresh replaces the known records with `records`, except those
    /// merged from the feed or a confirmation while the fetch was running.
    async fn apply_records(&self, records: &[ProposalRecord], mode: FetchMode) {
        let _guard = self.persist_lock.lock().await;

        let merged = {
            let mut inner = self.inner.lock();
            let merged = match mode {
                FetchMode::Refetch => {
                    inner.merged_since_fetch.extend(records.iter().map(|r| r.id));
                    merge_at(
                        &inner.confirmed,
                        records,
                        now_ms(),
                        self.config.max_cached_proposals,
                    )
                }
                FetchMode::Refresh => {
                    let arrived: Vec<CachedProposalRecord> = inner
                        .confirmed
                        .iter()
                        .filter(|c| inner.merged_since_fetch.contains(&c.id()))
                        .cloned()
                        .collect();
                    merge_at(
                        &arrived,
                        records,
                        now_ms(),
                        self.config.max_cached_proposals,
                    )
                }
            };
            inner.confirmed = merged.clone();
            merged
        };
        self.metrics.cached_proposals.set(merged.len() as i64);

        self.store.write(&self.ns, &merged).await;
        let stats = self.store.stats(&self.ns).await;
        self.inner.lock().cache_stats = stats;
    }

    fn reconcile_overlay(&self, confirmed: &[ProposalRecord]) {
        for tx_id in self.overlay.reconcile(confirmed) {
            debug!("[{}] Optimistic tx {} confirmed", self.ns, tx_id);
            self.metrics
                .optimistic_proposals
                .with_label_values(&["confirmed"])
                .inc();
        }
    }

    async fn ensure_subscribed(self: &Arc<Self>) {
        if self
            .subscription
            .lock()
            .as_ref()
            .is_some_and(|s| s.is_active())
        {
            return;
        }

        let from_block = self.inner.lock().last_block;
        let weak = Arc::downgrade(self);
        let result = self
            .subscriber
            .subscribe(from_block, move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.handle_feed_event(event).await;
                    }
                }
            })
            .await;

        match result {
            Ok(subscription) => {
                if !self.is_alive() {
                    subscription.unsubscribe();
                    return;
                }
                info!(
                    "[{}] Subscribed to new proposals after block {:?}",
                    self.ns, from_block
                );
                *self.subscription.lock() = Some(subscription);
                self.metrics.feed_connected.set(1);
                self.update(|inner| inner.is_connected = true);
            }
            Err(e) => {
                warn!("[{}] Failed to open proposal feed: {}", self.ns, e);
                self.metrics.feed_connected.set(0);
                self.update(|inner| inner.is_connected = false);
            }
        }
    }

    async fn handle_feed_event(&self, event: FeedEvent) {
        if !self.is_alive() {
            return;
        }
        match event {
            FeedEvent::Connected => {
                self.metrics.feed_connected.set(1);
                self.update(|inner| inner.is_connected = true);
            }
            FeedEvent::Disconnected { reason } => {
                warn!("[{}] Proposal feed disconnected: {}", self.ns, reason);
                self.metrics.feed_connected.set(0);
                self.update(|inner| inner.is_connected = false);
            }
            FeedEvent::NewProposal(event) => self.handle_new_proposal(event).await,
        }
    }

    async fn handle_new_proposal(&self, event: NewProposalEvent) {
        let NewProposalEvent {
            mut record,
            block_number,
            tx_hash,
        } = event;
        self.metrics.live_events_received.inc();
        record.refresh_days_remaining(now_secs());
        if record.creation_tx.is_none() {
            record.creation_tx = tx_hash;
        }

        let known = self
            .inner
            .lock()
            .confirmed
            .iter()
            .any(|c| c.id() == record.id);
        if known {
            self.metrics.live_events_duplicate.inc();
        }
        debug!(
            "[{}] Live proposal {} at block {} (known={})",
            self.ns, record.id, block_number, known
        );

        self.apply_records(std::slice::from_ref(&record), FetchMode::Refetch)
            .await;
        self.reconcile_overlay(std::slice::from_ref(&record));

        let advance = {
            let mut inner = self.inner.lock();
            if !known {
                inner.new_proposal_count += 1;
            }
            let advance = inner.last_block.map_or(true, |b| block_number > b);
            if advance {
                inner.last_block = Some(block_number);
            }
            advance
        };
        if advance {
            self.store.write_last_block(&self.ns, block_number).await;
        }
        self.publish();
    }

    fn spawn_periodic_refresh(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.refresh_interval;
        let cancel = self.cancel.clone();
        tokio::spawn(run_periodic_refresh(weak, interval, cancel));
    }

    /// One timer tick. Returns whether a fetch was attempted.
    async fn periodic_tick(self: &Arc<Self>) -> bool {
        if self.fetch_in_progress.load(Ordering::Acquire) {
            debug!("[{}] Periodic refresh skipped, fetch in flight", self.ns);
            self.metrics
                .periodic_refreshes_skipped
                .with_label_values(&["in_flight"])
                .inc();
            return false;
        }
        let recent = self
            .inner
            .lock()
            .last_fetch_completed
            .is_some_and(|t| t.elapsed() < self.config.refresh_debounce);
        if recent {
            debug!("[{}] Periodic refresh skipped, fetched recently", self.ns);
            self.metrics
                .periodic_refreshes_skipped
                .with_label_values(&["debounce"])
                .inc();
            return false;
        }

        debug!("[{}] Periodic refresh", self.ns);
        // Failures land in the view; next tick retries
        let _ = self.request_fetch(FetchMode::Refetch).await;
        true
    }

    fn update(&self, f: impl FnOnce(&mut Inner)) {
        {
            let mut inner = self.inner.lock();
            f(&mut inner);
        }
        self.publish();
    }

    fn publish(&self) {
        let view = self.view();
        self.view_tx.send_replace(view);
    }

    fn mark_waiting(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            if inner.phase == SyncPhase::Live {
                inner.phase = SyncPhase::PeriodicWait;
                true
            } else {
                false
            }
        };
        if changed {
            self.publish();
        }
    }
}

async fn run_periodic_refresh(
    orchestrator: Weak<SyncOrchestrator>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if let Some(this) = orchestrator.upgrade() {
            this.mark_waiting();
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Periodic refresh task cancelled");
                break;
            }
            _ = ticker.tick() => {}
        }
        let Some(this) = orchestrator.upgrade() else {
            break;
        };
        this.periodic_tick().await;
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
