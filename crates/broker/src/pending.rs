// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending-request counter: a concurrent `(package, user) -> count` map,
//! capped at a configured maximum. Mutated by compare-and-increment so
//! the counter never needs its own lock on the hot path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

pub type PendingKey = (String, u32);

#[derive(Default)]
pub struct PendingCounters {
    counts: RwLock<HashMap<PendingKey, Arc<AtomicU32>>>,
}

/// RAII guard for one dispatched dialog slot. Decrements the counter
/// exactly once on drop, regardless of whether the terminal decision
/// reaches the original caller — covers client disconnect without a
/// separate cancel API.
pub struct PendingGuard {
    counter: Arc<AtomicU32>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PendingCounters {
    pub fn new() -> Self {
        Self::default()
    }

    async fn counter_for(&self, key: &PendingKey) -> Arc<AtomicU32> {
        if let Some(counter) = self.counts.read().await.get(key) {
            return Arc::clone(counter);
        }
        let mut counts = self.counts.write().await;
        Arc::clone(counts.entry(key.clone()).or_insert_with(|| Arc::new(AtomicU32::new(0))))
    }

    /// Atomically increment the counter for `key` if doing so would not
    /// exceed `max`. Returns a guard that decrements on drop, or `None`
    /// if the cap was already reached.
    pub async fn try_increment(&self, key: PendingKey, max: u32) -> Option<PendingGuard> {
        let counter = self.counter_for(&key).await;
        let result = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            if current >= max {
                None
            } else {
                Some(current + 1)
            }
        });
        result.ok().map(|_| PendingGuard { counter })
    }

    pub async fn current(&self, key: &PendingKey) -> u32 {
        match self.counts.read().await.get(key) {
            Some(counter) => counter.load(Ordering::Acquire),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caps_at_max_and_resolves_to_zero() {
        let counters = PendingCounters::new();
        let key: PendingKey = ("com.x".into(), 0);

        let g1 = counters.try_increment(key.clone(), 3).await.unwrap();
        let g2 = counters.try_increment(key.clone(), 3).await.unwrap();
        let g3 = counters.try_increment(key.clone(), 3).await.unwrap();
        assert!(counters.try_increment(key.clone(), 3).await.is_none());
        assert_eq!(counters.current(&key).await, 3);

        drop(g1);
        assert_eq!(counters.current(&key).await, 2);
        drop(g2);
        drop(g3);
        assert_eq!(counters.current(&key).await, 0);

        // A fresh dialog can be dispatched again once the counter drains.
        assert!(counters.try_increment(key.clone(), 3).await.is_some());
    }

    #[tokio::test]
    async fn independent_keys_do_not_interfere() {
        let counters = PendingCounters::new();
        let a: PendingKey = ("com.a".into(), 0);
        let b: PendingKey = ("com.b".into(), 0);
        let _ga = counters.try_increment(a.clone(), 1).await.unwrap();
        assert!(counters.try_increment(b.clone(), 1).await.is_some());
    }
}
