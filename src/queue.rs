//! Finite work queue with concurrent, non-blocking withdrawal.
//!
//! Populated once at start; items leave only through [`WorkQueue::try_claim`].
//! The lock guards a FIFO pop and a counter bump, nothing else.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::WorkItem;

/// How the queue treats repeated keys in its source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Duplicate keys are dropped while building the queue, so every dequeued
    /// key is unique by construction.
    #[default]
    Drain,
    /// Duplicates are kept and items may be redelivered. The dedup tracker
    /// filters repeats at claim time.
    AtLeastOnce,
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<WorkItem>,
    claimed: usize,
}

#[derive(Debug)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
    total: usize,
    distinct: usize,
    max_records: Option<usize>,
    delivery: Delivery,
}

impl WorkQueue {
    pub fn new(items: impl IntoIterator<Item = WorkItem>, delivery: Delivery) -> Self {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        for item in items {
            let fresh = seen.insert(item.key.clone());
            match delivery {
                Delivery::Drain if !fresh => {
                    warn!(key = %item.key, "duplicate key in work source, dropped");
                }
                _ => queue.push_back(item),
            }
        }

        Self {
            total: queue.len(),
            distinct: seen.len(),
            inner: Mutex::new(Inner {
                items: queue,
                claimed: 0,
            }),
            max_records: None,
            delivery,
        }
    }

    /// Stop handing out items once `limit` have been claimed.
    pub fn with_max_records(mut self, limit: Option<usize>) -> Self {
        self.max_records = limit;
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn budget_spent(&self, inner: &Inner) -> bool {
        self.max_records.is_some_and(|limit| inner.claimed >= limit)
    }

    /// Take the next item, or `None` if nothing is left to hand out.
    ///
    /// Never blocks beyond the O(1) critical section.
    pub fn try_claim(&self) -> Option<WorkItem> {
        let mut inner = self.inner();
        if self.budget_spent(&inner) {
            return None;
        }
        let item = inner.items.pop_front()?;
        inner.claimed += 1;
        Some(item)
    }

    /// Push an item back to the tail, as an at-least-once source would.
    pub fn redeliver(&self, item: WorkItem) {
        self.inner().items.push_back(item);
    }

    /// True when no further claim can succeed.
    pub fn is_exhausted(&self) -> bool {
        let inner = self.inner();
        inner.items.is_empty() || self.budget_spent(&inner)
    }

    /// Unclaimed items still queued.
    pub fn len(&self) -> usize {
        self.inner().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items dequeued so far, duplicates included.
    pub fn claimed(&self) -> usize {
        self.inner().claimed
    }

    /// Items queued at construction.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Distinct keys seen at construction.
    pub fn distinct(&self) -> usize {
        self.distinct
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }
}
