// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{FeedEvent, LedgerClient, NewProposalEvent, ProposalEventSource, ProposalFeed};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Page size of one `ProposalCreated` query
pub const MAX_EVENTS_PER_QUERY: u64 = 1000;

/// New-proposal feed that polls `ProposalCreated` events from the ledger node.
///
/// Each `open` spawns one poll task that owns its cursor. On a failed poll
/// the cursor is not advanced, so events are re-delivered once the node is
/// reachable again.
#[derive(Clone)]
pub struct PollingProposalFeed {
    source: Arc<dyn ProposalEventSource>,
    poll_interval: Duration,
    max_block_range: u64,
    max_events_per_query: u64,
    channel_size: usize,
}

impl PollingProposalFeed {
    pub fn new(source: Arc<dyn ProposalEventSource>, config: &SyncConfig) -> Self {
        Self {
            source,
            poll_interval: config.feed_poll_interval,
            max_block_range: config.feed_max_block_range.max(1),
            max_events_per_query: MAX_EVENTS_PER_QUERY,
            channel_size: config.channel_size.max(1),
        }
    }
}

#[derive(Clone, Copy)]
struct PollParams {
    poll_interval: Duration,
    max_block_range: u64,
    max_events_per_query: u64,
}

#[async_trait::async_trait]
impl ProposalFeed for PollingProposalFeed {
    async fn open(
        &self,
        from_block: Option<u64>,
        cancel: CancellationToken,
    ) -> SyncResult<mpsc::Receiver<FeedEvent>> {
        let head = self.source.chain_height().await?;
        let start_block = match from_block {
            Some(last) => last.saturating_add(1),
            None => head.saturating_add(1),
        };
        info!(
            "[Feed] Opening proposal feed at block {} (head={})",
            start_block, head
        );

        let (tx, rx) = mpsc::channel(self.channel_size);
        let params = PollParams {
            poll_interval: self.poll_interval,
            max_block_range: self.max_block_range,
            max_events_per_query: self.max_events_per_query.max(1),
        };
        tokio::spawn(run_poll_task(
            self.source.clone(),
            start_block,
            params,
            tx,
            cancel,
        ));
        Ok(rx)
    }
}

/// Next inclusive block range to scan, `None` once caught up with `head`
fn next_range(next_block: u64, head: u64, max_block_range: u64) -> Option<(u64, u64)> {
    if next_block > head {
        return None;
    }
    let to = next_block
        .saturating_add(max_block_range.saturating_sub(1))
        .min(head);
    Some((next_block, to))
}

async fn run_poll_task(
    source: Arc<dyn ProposalEventSource>,
    mut next_block: u64,
    params: PollParams,
    tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
) {
    let mut connected = true;
    if tx.send(FeedEvent::Connected).await.is_err() {
        return;
    }

    let mut interval = time::interval(params.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[Feed] Poll task cancelled");
                break;
            }
            _ = tx.closed() => {
                debug!("[Feed] Receiver dropped, stopping poll task");
                break;
            }
            _ = interval.tick() => {}
        }

        let head = match source.chain_height().await {
            Ok(h) => h,
            Err(e) => {
                if !mark_disconnected(&tx, &mut connected, e.to_string()).await {
                    break;
                }
                continue;
            }
        };
        if !connected {
            info!("[Feed] Ledger reachable again at head {}", head);
            connected = true;
            if tx.send(FeedEvent::Connected).await.is_err() {
                break;
            }
        }

        // Catch up range by range; stop at the first failure and retry next tick
        while let Some((from, to)) = next_range(next_block, head, params.max_block_range) {
            if cancel.is_cancelled() {
                return;
            }
            match poll_range(source.as_ref(), from, to, params.max_events_per_query, &tx).await {
                Ok(Some(next)) => next_block = next,
                Ok(None) => return,
                Err(reason) => {
                    if !mark_disconnected(&tx, &mut connected, reason).await {
                        return;
                    }
                    break;
                }
            }
        }
    }
}

/// Emit the events of one block range and return the next block to scan.
/// `Ok(None)` means the receiver is gone.
///
/// A full page may have been cut short by the node, so scanning resumes at
/// the last block it covered; events of that block are delivered again.
async fn poll_range(
    source: &dyn ProposalEventSource,
    from: u64,
    to: u64,
    limit: u64,
    tx: &mpsc::Sender<FeedEvent>,
) -> Result<Option<u64>, String> {
    let logs = source
        .get_proposal_events(from, to, limit)
        .await
        .map_err(|e| e.to_string())?;
    let next = if (logs.len() as u64) < limit {
        to + 1
    } else {
        match logs.iter().map(|l| l.block_number).max() {
            Some(last) if last > from => last.min(to),
            _ => {
                warn!(
                    "[Feed] Block {} holds at least {} ProposalCreated events, later ones are skipped",
                    from, limit
                );
                from + 1
            }
        }
    };
    if !logs.is_empty() {
        debug!(
            "[Feed] {} ProposalCreated events in blocks {}..={}",
            logs.len(),
            from,
            to
        );
    }

    for log in logs {
        let mut record = match source.get_proposal_detail(log.proposal_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(
                    "[Feed] Proposal {} from block {} not found on ledger, skipping",
                    log.proposal_id, log.block_number
                );
                continue;
            }
            Err(e) => return Err(e.to_string()),
        };
        if record.creation_tx.is_none() {
            record.creation_tx = log.tx_hash.clone();
        }

        let event = FeedEvent::NewProposal(NewProposalEvent {
            record,
            block_number: log.block_number,
            tx_hash: log.tx_hash,
        });
        if tx.send(event).await.is_err() {
            return Ok(None);
        }
    }
    Ok(Some(next))
}

/// Returns false when the receiver is gone
async fn mark_disconnected(
    tx: &mpsc::Sender<FeedEvent>,
    connected: &mut bool,
    reason: String,
) -> bool {
    warn!("[Feed] Poll failed: {}", reason);
    if !*connected {
        return true;
    }
    *connected = false;
    tx.send(FeedEvent::Disconnected { reason }).await.is_ok()
}
