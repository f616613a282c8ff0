// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Namespaced, TTL-bounded proposal snapshots

use super::storage::KeyValueStorage;
use crate::merge::sort_and_truncate;
use crate::metrics::SyncMetrics;
use crate::types::{CacheNamespace, CacheSnapshot, CachedProposalRecord};
use crate::utils::now_ms;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key suffix of the proposal snapshot
pub const EVENT_CACHE_SUFFIX: &str = "event_cache";
/// Key suffix of the last processed ledger block
pub const LAST_BLOCK_SUFFIX: &str = "last_block";

/// Summary of one namespace's snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub has_cache: bool,
    pub is_valid: bool,
    pub count: usize,
    /// Snapshot timestamp, unix milliseconds
    pub last_updated: Option<u64>,
}

/// Read hit/miss counters
#[derive(Debug, Clone, Copy)]
pub struct HitStats {
    pub hits: u64,
    pub misses: u64,
}

impl HitStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Durable snapshot store shared by every orchestrator of the process.
///
/// All operations take the namespace explicitly; there is no hidden
/// per-instance state besides counters.
pub struct SnapshotStore {
    storage: Arc<dyn KeyValueStorage>,
    ttl: Duration,
    max_records: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    metrics: Option<Arc<SyncMetrics>>,
}

impl SnapshotStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, ttl: Duration, max_records: usize) -> Self {
        Self {
            storage,
            ttl,
            max_records,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Attach metrics for monitoring
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Read the namespace's snapshot if present, decodable and not expired
    pub async fn read(&self, ns: &CacheNamespace) -> Option<CacheSnapshot> {
        self.read_at(ns, now_ms()).await
    }

    /// `read` against an explicit clock (unix milliseconds)
    pub async fn read_at(&self, ns: &CacheNamespace, now: u64) -> Option<CacheSnapshot> {
        let Some(snapshot) = self.load(ns).await else {
            self.record_miss();
            return None;
        };

        if self.is_expired(&snapshot, now) {
            info!(
                "[{}] Snapshot expired (age={}ms, ttl={:?}), clearing",
                ns,
                snapshot.age_ms(now),
                self.ttl
            );
            self.clear(ns).await;
            self.record_miss();
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(ref m) = self.metrics {
            m.cache_hits.inc();
        }
        Some(snapshot)
    }

    /// Persist `records` as the namespace's snapshot.
    ///
    /// Records are sorted by identifier descending and truncated to the
    /// size bound first. Failures are logged and dropped.
    pub async fn write(&self, ns: &CacheNamespace, records: &[CachedProposalRecord]) {
        self.write_at(ns, records, now_ms()).await
    }

    pub async fn write_at(&self, ns: &CacheNamespace, records: &[CachedProposalRecord], now: u64) {
        let mut proposals = records.to_vec();
        sort_and_truncate(&mut proposals, self.max_records);
        let snapshot = CacheSnapshot {
            proposals,
            timestamp: now,
        };

        let payload = match serde_json::to_string(&snapshot) {
            Ok(p) => p,
            Err(e) => {
                warn!("[{}] Failed to serialize snapshot: {}", ns, e);
                self.record_write_failure();
                return;
            }
        };

        match self
            .storage
            .set(&ns.storage_key(EVENT_CACHE_SUFFIX), payload)
            .await
        {
            Ok(()) => debug!(
                "[{}] Persisted snapshot with {} proposals",
                ns,
                snapshot.proposals.len()
            ),
            Err(e) => {
                warn!("[{}] Failed to persist snapshot: {}", ns, e);
                self.record_write_failure();
            }
        }
    }

    /// Remove the namespace's snapshot and ledger cursor
    pub async fn clear(&self, ns: &CacheNamespace) {
        for suffix in [EVENT_CACHE_SUFFIX, LAST_BLOCK_SUFFIX] {
            if let Err(e) = self.storage.remove(&ns.storage_key(suffix)).await {
                warn!("[{}] Failed to clear {}: {}", ns, suffix, e);
            }
        }
        debug!("[{}] Cleared snapshot", ns);
    }

    pub async fn is_valid(&self, ns: &CacheNamespace) -> bool {
        self.read(ns).await.is_some()
    }

    /// Inspect the namespace without clearing expired data
    pub async fn stats(&self, ns: &CacheNamespace) -> CacheStats {
        self.stats_at(ns, now_ms()).await
    }

    pub async fn stats_at(&self, ns: &CacheNamespace, now: u64) -> CacheStats {
        match self.load(ns).await {
            Some(snapshot) => CacheStats {
                has_cache: true,
                is_valid: !self.is_expired(&snapshot, now),
                count: snapshot.proposals.len(),
                last_updated: Some(snapshot.timestamp),
            },
            None => CacheStats::default(),
        }
    }

    /// Last ledger block whose events were fully processed
    pub async fn read_last_block(&self, ns: &CacheNamespace) -> Option<u64> {
        match self.storage.get(&ns.storage_key(LAST_BLOCK_SUFFIX)).await {
            Ok(Some(raw)) => match raw.trim().parse::<u64>() {
                Ok(block) => Some(block),
                Err(_) => {
                    debug!("[{}] Ignoring malformed last_block {:?}", ns, raw);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("[{}] Failed to read last_block: {}", ns, e);
                None
            }
        }
    }

    pub async fn write_last_block(&self, ns: &CacheNamespace, block: u64) {
        if let Err(e) = self
            .storage
            .set(&ns.storage_key(LAST_BLOCK_SUFFIX), block.to_string())
            .await
        {
            warn!("[{}] Failed to persist last_block={}: {}", ns, block, e);
            self.record_write_failure();
        }
    }

    pub fn hit_stats(&self) -> HitStats {
        HitStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn load(&self, ns: &CacheNamespace) -> Option<CacheSnapshot> {
        let raw = match self.storage.get(&ns.storage_key(EVENT_CACHE_SUFFIX)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("[{}] Failed to read snapshot: {}", ns, e);
                return None;
            }
        };

        match serde_json::from_str::<CacheSnapshot>(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("[{}] Ignoring undecodable snapshot: {}", ns, e);
                None
            }
        }
    }

    fn is_expired(&self, snapshot: &CacheSnapshot, now: u64) -> bool {
        snapshot.age_ms(now) > self.ttl.as_millis() as u64
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(ref m) = self.metrics {
            m.cache_misses.inc();
        }
    }

    fn record_write_failure(&self) {
        if let Some(ref m) = self.metrics {
            m.err_storage_writes.inc();
        }
    }
}
