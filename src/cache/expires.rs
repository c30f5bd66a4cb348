//! Expiration Index Module
//!
//! Orders entries with a finite deadline so the expiration scan only walks
//! what is due. Entries without a deadline are never indexed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

// == Expires Index ==
/// Deadline-ordered index keyed by `(deadline, entry id)`.
#[derive(Debug, Default)]
pub struct ExpiresIndex {
    order: BTreeMap<(DateTime<Utc>, u64), String>,
}

impl ExpiresIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, at: DateTime<Utc>, id: u64, key: &str) {
        self.order.insert((at, id), key.to_string());
    }

    pub fn remove(&mut self, at: DateTime<Utc>, id: u64) -> Option<String> {
        self.order.remove(&(at, id))
    }

    /// Moves an entry to a new deadline (sliding refresh).
    pub fn reschedule(&mut self, from: DateTime<Utc>, to: DateTime<Utc>, id: u64) {
        if from == to {
            return;
        }
        if let Some(key) = self.order.remove(&(from, id)) {
            self.order.insert((to, id), key);
        }
    }

    /// Removes and returns every entry with a deadline at or before `now`,
    /// soonest first. A sliding entry sitting exactly on `now` is not due
    /// yet; the caller puts it back.
    pub fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<(u64, String)> {
        let later = self.order.split_off(&(now, u64::MAX));
        let due = std::mem::replace(&mut self.order, later);
        due.into_iter().map(|((_, id), key)| (id, key)).collect()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}
