// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Merge of cached and incoming proposal lists.
//!
//! Records are keyed by ledger identifier. An incoming record always
//! replaces a cached one with the same identifier and is stamped with the
//! merge time. The output is sorted by identifier descending and truncated
//! to the snapshot bound, so the oldest proposals fall off first.

use crate::types::{CachedProposalRecord, ProposalRecord};
use crate::utils::now_ms;
use std::collections::HashMap;

/// Default bound on the number of records a merge keeps
pub const MAX_CACHED_PROPOSALS: usize = 100;

/// Merge `incoming` into `existing` using the current time and default bound.
pub fn merge(
    existing: &[CachedProposalRecord],
    incoming: &[ProposalRecord],
) -> Vec<CachedProposalRecord> {
    merge_at(existing, incoming, now_ms(), MAX_CACHED_PROPOSALS)
}

/// Merge with an explicit clock and bound.
///
/// For a fixed `now`, `merge_at(&merge_at(a, b, now, n), b, now, n)` equals
/// `merge_at(a, b, now, n)`.
pub fn merge_at(
    existing: &[CachedProposalRecord],
    incoming: &[ProposalRecord],
    now: u64,
    max_records: usize,
) -> Vec<CachedProposalRecord> {
    let mut merged: Vec<CachedProposalRecord> = Vec::with_capacity(existing.len() + incoming.len());
    let mut position: HashMap<u64, usize> = HashMap::with_capacity(existing.len());

    for cached in existing {
        // A well-formed snapshot never repeats an id; if one does, the later entry wins.
        match position.get(&cached.id()) {
            Some(&idx) => merged[idx] = cached.clone(),
            None => {
                position.insert(cached.id(), merged.len());
                merged.push(cached.clone());
            }
        }
    }

    for record in incoming {
        let fresh = CachedProposalRecord::new(record.clone(), now);
        match position.get(&record.id) {
            Some(&idx) => merged[idx] = fresh,
            None => {
                position.insert(record.id, merged.len());
                merged.push(fresh);
            }
        }
    }

    sort_and_truncate(&mut merged, max_records);
    merged
}

/// Sort identifier-descending and keep the `max_records` newest entries.
pub fn sort_and_truncate(records: &mut Vec<CachedProposalRecord>, max_records: usize) {
    records.sort_by(|a, b| b.id().cmp(&a.id()));
    records.truncate(max_records);
}
