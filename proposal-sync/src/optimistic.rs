// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory overlay of submitted but unconfirmed proposals.
//!
//! Entries are keyed by pending transaction id and are never persisted.
//! They are dropped when the ledger confirms the proposal (a confirmed record
//! created by the same transaction arrives) or the transaction fails.

use crate::types::{OptimisticProposalRecord, ProposalRecord};
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct OptimisticOverlay {
    // Insertion order; newest submissions are listed first
    entries: RwLock<Vec<OptimisticProposalRecord>>,
}

impl OptimisticOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending record. Re-adding a known transaction replaces its entry.
    pub fn add(&self, record: OptimisticProposalRecord) {
        let mut entries = self.entries.write();
        entries.retain(|e| !same_tx(&e.tx_id, &record.tx_id));
        entries.insert(0, record);
    }

    /// Returns the removed entry, if any
    pub fn remove_by_tx_id(&self, tx_id: &str) -> Option<OptimisticProposalRecord> {
        let mut entries = self.entries.write();
        let idx = entries.iter().position(|e| same_tx(&e.tx_id, tx_id))?;
        Some(entries.remove(idx))
    }

    pub fn list(&self) -> Vec<OptimisticProposalRecord> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry whose transaction produced one of `confirmed`.
    /// Returns the transaction ids that were reconciled.
    pub fn reconcile<'a>(
        &self,
        confirmed: impl IntoIterator<Item = &'a ProposalRecord>,
    ) -> Vec<String> {
        let mut entries = self.entries.write();
        if entries.is_empty() {
            return vec![];
        }
        let mut removed = vec![];
        for record in confirmed {
            entries.retain(|e| {
                if record.created_by(&e.tx_id) {
                    removed.push(e.tx_id.clone());
                    false
                } else {
                    true
                }
            });
            if entries.is_empty() {
                break;
            }
        }
        removed
    }
}

fn same_tx(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
