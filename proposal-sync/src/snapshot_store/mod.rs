// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable Snapshot Store
//!
//! Persists one time-stamped batch of proposal records per
//! `(network, contract)` namespace, plus the last processed ledger block.
//!
//! ```text
//!   <network>_<contract>_event_cache  ->  {"proposals": [...], "timestamp": <ms>}
//!   <network>_<contract>_last_block   ->  "<block number>"
//! ```
//!
//! ## Guarantees
//!
//! 1. **Freshness-bounded**: a snapshot older than the TTL is never returned;
//!    reading it clears the namespace.
//! 2. **Bounded size**: writes keep only the highest identifiers.
//! 3. **Non-fatal**: storage failures are logged and reported as cache misses
//!    or dropped writes, never as errors to the caller.
//! 4. **Atomic**: a snapshot is replaced with a single storage write, so
//!    concurrent readers see the old or the new snapshot, never a mix.

mod storage;
mod store;

pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use store::{CacheStats, HitStats, SnapshotStore, EVENT_CACHE_SUFFIX, LAST_BLOCK_SUFFIX};
