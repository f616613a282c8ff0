// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Histogram, IntCounter,
    IntCounterVec, IntGauge, Registry,
};

const FETCH_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0, 7.5, 10., 15., 20., 30., 45., 60., 90.,
    120.,
];

#[derive(Clone, Debug)]
pub struct SyncMetrics {
    pub(crate) fetches_started: IntCounter,
    pub(crate) fetches_ok: IntCounter,
    pub(crate) err_fetches: IntCounterVec,
    pub(crate) err_proposal_details: IntCounter,
    pub(crate) fetch_latency: Histogram,

    pub(crate) refreshes_coalesced: IntCounter,
    pub(crate) periodic_refreshes_skipped: IntCounterVec,

    pub(crate) live_events_received: IntCounter,
    pub(crate) live_events_duplicate: IntCounter,
    pub(crate) feed_connected: IntGauge,

    pub(crate) cache_hits: IntCounter,
    pub(crate) cache_misses: IntCounter,
    pub(crate) err_storage_writes: IntCounter,
    pub(crate) cached_proposals: IntGauge,

    pub(crate) optimistic_proposals: IntCounterVec,
}

impl SyncMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            fetches_started: register_int_counter_with_registry!(
                "proposal_sync_fetches_started",
                "Total number of full proposal fetches started",
                registry,
            )
            .unwrap(),
            fetches_ok: register_int_counter_with_registry!(
                "proposal_sync_fetches_ok",
                "Total number of full proposal fetches that succeeded",
                registry,
            )
            .unwrap(),
            err_fetches: register_int_counter_vec_with_registry!(
                "proposal_sync_err_fetches",
                "Total number of failed full proposal fetches by error type",
                &["type"],
                registry,
            )
            .unwrap(),
            err_proposal_details: register_int_counter_with_registry!(
                "proposal_sync_err_proposal_details",
                "Total number of per-proposal detail requests that failed and were skipped",
                registry,
            )
            .unwrap(),
            fetch_latency: register_histogram_with_registry!(
                "proposal_sync_fetch_latency",
                "Latency of full proposal fetches in seconds",
                FETCH_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            refreshes_coalesced: register_int_counter_with_registry!(
                "proposal_sync_refreshes_coalesced",
                "Refresh requests that joined an already running fetch",
                registry,
            )
            .unwrap(),
            periodic_refreshes_skipped: register_int_counter_vec_with_registry!(
                "proposal_sync_periodic_refreshes_skipped",
                "Periodic refresh ticks that did not start a fetch, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            live_events_received: register_int_counter_with_registry!(
                "proposal_sync_live_events_received",
                "Total number of new-proposal notifications received",
                registry,
            )
            .unwrap(),
            live_events_duplicate: register_int_counter_with_registry!(
                "proposal_sync_live_events_duplicate",
                "New-proposal notifications for identifiers already known",
                registry,
            )
            .unwrap(),
            feed_connected: register_int_gauge_with_registry!(
                "proposal_sync_feed_connected",
                "1 while the new-proposal feed is connected",
                registry,
            )
            .unwrap(),
            cache_hits: register_int_counter_with_registry!(
                "proposal_sync_cache_hits",
                "Snapshot reads that returned a valid snapshot",
                registry,
            )
            .unwrap(),
            cache_misses: register_int_counter_with_registry!(
                "proposal_sync_cache_misses",
                "Snapshot reads that found nothing usable",
                registry,
            )
            .unwrap(),
            err_storage_writes: register_int_counter_with_registry!(
                "proposal_sync_err_storage_writes",
                "Snapshot or cursor writes that failed and were dropped",
                registry,
            )
            .unwrap(),
            cached_proposals: register_int_gauge_with_registry!(
                "proposal_sync_cached_proposals",
                "Number of confirmed proposals in the reconciled view",
                registry,
            )
            .unwrap(),
            optimistic_proposals: register_int_counter_vec_with_registry!(
                "proposal_sync_optimistic_proposals",
                "Optimistic proposal lifecycle transitions",
                &["outcome"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_in_custom_registry() {
        let registry = Registry::new();
        let metrics = SyncMetrics::new(&registry);
        metrics.fetches_started.inc();
        metrics.err_fetches.with_label_values(&["rpc"]).inc();

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"proposal_sync_fetches_started".to_string()));
        assert!(names.contains(&"proposal_sync_err_fetches".to_string()));
    }

    #[test]
    fn test_separate_testing_instances_do_not_collide() {
        let a = SyncMetrics::new_for_testing();
        let b = SyncMetrics::new_for_testing();
        a.cache_hits.inc();
        assert_eq!(a.cache_hits.get(), 1);
        assert_eq!(b.cache_hits.get(), 0);
    }
}
