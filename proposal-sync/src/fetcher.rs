// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Authoritative reads of the full proposal list.
//!
//! The identifier listing is all-or-nothing: if it fails the whole fetch
//! fails and nothing cached is touched. Per-proposal detail reads are best
//! effort, a failing identifier is logged and left out of the result.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::ledger::LedgerClient;
use crate::metrics::SyncMetrics;
use crate::retry_with_max_elapsed_time;
use crate::types::ProposalRecord;
use crate::utils::now_secs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct AuthoritativeFetcher {
    client: Arc<dyn LedgerClient>,
    concurrency: usize,
    max_listing_retry_duration: Duration,
    metrics: Option<Arc<SyncMetrics>>,
}

impl AuthoritativeFetcher {
    pub fn new(client: Arc<dyn LedgerClient>, config: &SyncConfig) -> Self {
        Self {
            client,
            concurrency: config.fetch_concurrency.max(1),
            max_listing_retry_duration: config.max_listing_retry_duration,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Every proposal the ledger knows about, sorted by identifier descending.
    pub async fn fetch_all(&self) -> SyncResult<Vec<ProposalRecord>> {
        if let Some(m) = &self.metrics {
            m.fetches_started.inc();
        }
        let start = Instant::now();

        let ids = match self.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("[Fetcher] Proposal listing failed: {}", e);
                if let Some(m) = &self.metrics {
                    m.err_fetches.with_label_values(&[e.error_type()]).inc();
                }
                return Err(e);
            }
        };
        debug!("[Fetcher] Ledger lists {} proposals", ids.len());

        let now = now_secs();
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.concurrency) {
            let results =
                futures::future::join_all(chunk.iter().map(|id| self.fetch_detail(*id))).await;
            for mut record in results.into_iter().flatten() {
                record.refresh_days_remaining(now);
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records.dedup_by_key(|r| r.id);

        if let Some(m) = &self.metrics {
            m.fetches_ok.inc();
            m.fetch_latency.observe(start.elapsed().as_secs_f64());
        }
        info!(
            "[Fetcher] Fetched {}/{} proposals in {:?}",
            records.len(),
            ids.len(),
            start.elapsed()
        );
        Ok(records)
    }

    /// A single proposal, `None` if the ledger does not have it
    pub async fn fetch_one(&self, id: u64) -> SyncResult<Option<ProposalRecord>> {
        let record = self.client.get_proposal_detail(id).await?;
        Ok(record.map(|mut r| {
            r.refresh_days_remaining(now_secs());
            r
        }))
    }

    async fn list_ids(&self) -> SyncResult<Vec<u64>> {
        if self.max_listing_retry_duration.is_zero() {
            return self.client.list_proposal_ids().await;
        }
        retry_with_max_elapsed_time!(
            self.client.list_proposal_ids(),
            self.max_listing_retry_duration
        )?
    }

    async fn fetch_detail(&self, id: u64) -> Option<ProposalRecord> {
        match self.client.get_proposal_detail(id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                warn!("[Fetcher] Listed proposal {} has no detail, skipping", id);
                self.count_detail_error();
                None
            }
            Err(e) => {
                warn!("[Fetcher] Failed to fetch proposal {}: {}", id, e);
                self.count_detail_error();
                None
            }
        }
    }

    fn count_detail_error(&self) {
        if let Some(m) = &self.metrics {
            m.err_proposal_details.inc();
        }
    }
}
