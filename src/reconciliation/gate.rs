//! Duplicate-prevention gate
//!
//! Every write in this crate is preceded by [`DuplicateGate::admit`], which
//! re-reads the live status of the lines about to be written and keeps only
//! those still `pending`. Callers' own snapshots of the status (for example a
//! page loaded minutes ago) are never consulted.
//!
//! The gate is a read-then-filter step, not a lock. Two commits that pass the
//! gate for the same line at the same instant are separated by the store:
//! `batch_update_status` accepts a line only while it is still pending, and
//! lines it rejects are left out of the ledger append.
//!
//! When the status read itself fails the gate returns the error and the
//! caller rejects the whole sub-batch (fail-closed).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::traits::BankTransactionStore;
use crate::types::*;

/// A line excluded because it is no longer pending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConflict {
    pub id: String,
    pub status: MatchedStatus,
}

/// Which of the requested lines may be written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Pending lines, each once, in request order
    pub admitted: Vec<String>,
    /// Lines already matched or suppressed
    pub conflicts: Vec<StateConflict>,
    /// Lines the store does not know
    pub missing: Vec<String>,
    /// Repeated occurrences of an id within the request
    pub repeated: Vec<String>,
}

impl GateDecision {
    pub fn is_admitted(&self, id: &str) -> bool {
        self.admitted.iter().any(|admitted| admitted == id)
    }

    /// Number of requested lines that were turned away
    pub fn excluded(&self) -> usize {
        self.conflicts.len() + self.missing.len() + self.repeated.len()
    }
}

/// Re-validates live transaction status immediately before a write
pub struct DuplicateGate<B: BankTransactionStore> {
    store: Arc<B>,
}

impl<B: BankTransactionStore> Clone for DuplicateGate<B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<B: BankTransactionStore> DuplicateGate<B> {
    pub fn new(store: Arc<B>) -> Self {
        Self { store }
    }

    /// Filter `ids` down to the lines that are still pending in the store
    pub async fn admit(&self, ids: &[String]) -> ReconcileResult<GateDecision> {
        let mut decision = GateDecision::default();
        if ids.is_empty() {
            return Ok(decision);
        }

        let live = self.store.get_status_map(ids).await?;
        let mut seen: HashSet<&str> = HashSet::new();

        for id in ids {
            if !seen.insert(id.as_str()) {
                decision.repeated.push(id.clone());
                continue;
            }
            match live.get(id) {
                Some(MatchedStatus::Pending) => decision.admitted.push(id.clone()),
                Some(status) => {
                    tracing::debug!(transaction_id = %id, status = %status, "gate excluded line that is no longer pending");
                    decision.conflicts.push(StateConflict {
                        id: id.clone(),
                        status: *status,
                    });
                }
                None => {
                    tracing::warn!(transaction_id = %id, "gate excluded unknown line");
                    decision.missing.push(id.clone());
                }
            }
        }

        Ok(decision)
    }
}
