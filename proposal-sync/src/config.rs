// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::CacheNamespace;
use anyhow::anyhow;
use proposal_sync_config::Config;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Tuning knobs for the cache, fetcher, feed and refresh loop
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    /// How long a persisted snapshot stays valid
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: Duration,

    /// Upper bound on records kept in a snapshot
    #[serde(default = "default_max_cached_proposals")]
    pub max_cached_proposals: usize,

    /// Interval of the periodic background refresh
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: Duration,

    /// A periodic refresh is skipped if a fetch completed more recently than this
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_refresh_debounce")]
    pub refresh_debounce: Duration,

    /// Maximum number of concurrent per-proposal detail requests
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Retry budget for the proposal identifier listing call
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_max_listing_retry_duration")]
    pub max_listing_retry_duration: Duration,

    /// Poll interval of the new-proposal feed
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_feed_poll_interval")]
    pub feed_poll_interval: Duration,

    /// Maximum number of blocks scanned by one feed event query
    #[serde(default = "default_feed_max_block_range")]
    pub feed_max_block_range: u64,

    /// Buffer size of the feed notification channel
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            max_cached_proposals: default_max_cached_proposals(),
            refresh_interval: default_refresh_interval(),
            refresh_debounce: default_refresh_debounce(),
            fetch_concurrency: default_fetch_concurrency(),
            max_listing_retry_duration: default_max_listing_retry_duration(),
            feed_poll_interval: default_feed_poll_interval(),
            feed_max_block_range: default_feed_max_block_range(),
            channel_size: default_channel_size(),
        }
    }
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_cached_proposals() -> usize {
    100
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_refresh_debounce() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_fetch_concurrency() -> usize {
    8
}

fn default_max_listing_retry_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_feed_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_feed_max_block_range() -> u64 {
    1000
}

fn default_channel_size() -> usize {
    1000
}

impl SyncConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_cached_proposals == 0 {
            return Err(anyhow!("max-cached-proposals must be greater than 0"));
        }
        if self.fetch_concurrency == 0 {
            return Err(anyhow!("fetch-concurrency must be greater than 0"));
        }
        if self.channel_size == 0 {
            return Err(anyhow!("channel-size must be greater than 0"));
        }
        if self.feed_max_block_range == 0 {
            return Err(anyhow!("feed-max-block-range must be greater than 0"));
        }
        if self.refresh_interval.is_zero() || self.feed_poll_interval.is_zero() {
            return Err(anyhow!(
                "refresh-interval and feed-poll-interval must be non-zero"
            ));
        }
        if self.refresh_debounce > self.refresh_interval {
            return Err(anyhow!(
                "refresh-debounce ({:?}) must not exceed refresh-interval ({:?})",
                self.refresh_debounce,
                self.refresh_interval
            ));
        }
        Ok(())
    }
}

/// Configuration of the `proposal-sync` daemon
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncNodeConfig {
    // Network the governance contract is deployed on, e.g. "sepolia".
    pub network_id: String,
    // Address of the governance contract.
    pub contract_address: String,
    // JSON-RPC endpoint of the ledger node.
    pub ledger_rpc_url: String,
    // Directory holding the persisted snapshots.
    pub cache_dir: PathBuf,
    // Address of the HTTP server exposing metrics and the current view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_address: Option<SocketAddr>,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config for SyncNodeConfig {}

impl SyncNodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network_id.is_empty() {
            return Err(anyhow!("network-id must not be empty"));
        }
        if self.contract_address.is_empty() {
            return Err(anyhow!("contract-address must not be empty"));
        }
        if !self.ledger_rpc_url.starts_with("http://")
            && !self.ledger_rpc_url.starts_with("https://")
        {
            return Err(anyhow!(
                "ledger-rpc-url must be an http(s) URL, got {}",
                self.ledger_rpc_url
            ));
        }
        self.sync.validate()
    }

    pub fn namespace(&self) -> CacheNamespace {
        CacheNamespace::new(&self.network_id, &self.contract_address)
    }
}
