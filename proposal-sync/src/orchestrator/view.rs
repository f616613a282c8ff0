// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::snapshot_store::CacheStats;
use crate::types::ProposalView;
use serde::Serialize;
use std::fmt;

/// Loading pipeline position of an orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    CacheHydrating,
    RenderCache,
    FreshFetching,
    Live,
    PeriodicWait,
    /// The last fetch failed; last-known data is still shown
    Error,
    /// Torn down, no further work happens
    Stopped,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::CacheHydrating => "cache_hydrating",
            SyncPhase::RenderCache => "render_cache",
            SyncPhase::FreshFetching => "fresh_fetching",
            SyncPhase::Live => "live",
            SyncPhase::PeriodicWait => "periodic_wait",
            SyncPhase::Error => "error",
            SyncPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything a consumer renders
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncView {
    /// Optimistic entries first, then confirmed records by identifier descending
    pub proposals: Vec<ProposalView>,
    pub is_loading: bool,
    pub is_connected: bool,
    pub error: Option<String>,
    /// Live notifications for previously unknown proposals since the last acknowledge
    pub new_proposal_count: u64,
    pub cache_stats: CacheStats,
    /// Confirmed data comes from the snapshot and may be outdated
    pub showing_cached: bool,
    pub phase: SyncPhase,
}

impl SyncView {
    pub fn confirmed_count(&self) -> usize {
        self.proposals.iter().filter(|p| !p.is_optimistic()).count()
    }

    pub fn optimistic_count(&self) -> usize {
        self.proposals.iter().filter(|p| p.is_optimistic()).count()
    }
}
