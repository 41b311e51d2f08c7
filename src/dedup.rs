//! Claim bookkeeping per key.
//!
//! Guards against a work source re-delivering the same key to two workers.
//! With a drained queue the tracker never rejects anything, but it still
//! records completion so a double completion surfaces as a hard error.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::model::ClaimRecord;

#[derive(Debug, Default)]
pub struct DedupTracker {
    records: Mutex<HashMap<String, ClaimRecord>>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, ClaimRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim `key`. Returns true only for the first caller.
    pub fn mark_if_unclaimed(&self, key: &str) -> bool {
        let mut records = self.records();
        let record = records.entry(key.to_string()).or_default();
        if record.claimed {
            false
        } else {
            record.claimed = true;
            true
        }
    }

    /// Mark a claimed key as completed.
    ///
    /// Fails with [`Error::ClaimConflict`] if the key was never claimed or was
    /// already completed.
    pub fn mark_completed(&self, key: &str) -> Result<()> {
        let mut records = self.records();
        match records.get_mut(key) {
            Some(record) if record.claimed && !record.completed => {
                record.completed = true;
                Ok(())
            }
            Some(record) if record.completed => Err(Error::ClaimConflict {
                key: key.to_string(),
                detail: "completed twice".to_string(),
            }),
            _ => Err(Error::ClaimConflict {
                key: key.to_string(),
                detail: "completed without a claim".to_string(),
            }),
        }
    }

    pub fn record(&self, key: &str) -> Option<ClaimRecord> {
        self.records().get(key).copied()
    }

    pub fn claimed_count(&self) -> usize {
        self.records().values().filter(|r| r.claimed).count()
    }

    pub fn completed_count(&self) -> usize {
        self.records().values().filter(|r| r.completed).count()
    }

    /// Keys claimed but not yet completed.
    pub fn outstanding(&self) -> usize {
        self.records()
            .values()
            .filter(|r| r.claimed && !r.completed)
            .count()
    }
}
