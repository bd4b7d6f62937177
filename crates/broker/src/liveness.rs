// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stand-in for the IPC transport's liveness-subscription primitive
//! (`LivenessSubscription`).
//!
//! The real platform transport observes binder death directly. Over an
//! HTTP stand-in there is no persistent connection to watch, so a peer
//! proves liveness with a renewable heartbeat lease; a background reaper
//! declares a peer dead once its lease expires, and every subscriber
//! registered for that peer observes the death. Tests that want
//! deterministic peer-death timing call [`LivenessRegistry::mark_dead`]
//! directly instead of waiting out a lease.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Identifies a calling peer for liveness-tracking purposes.
pub type PeerKey = String;

struct Lease {
    expires_at: Instant,
    death: CancellationToken,
}

/// Tracks heartbeat leases for connected peers and fans out death
/// notifications to subscribers.
pub struct LivenessRegistry {
    leases: RwLock<HashMap<PeerKey, Lease>>,
    lease_duration: Duration,
}

/// A handle a subscriber awaits to learn that its peer has died. Death is
/// level-triggered: a subscriber that polls after the peer already died
/// still observes it.
#[derive(Clone)]
pub struct LivenessSubscription {
    death: CancellationToken,
}

impl LivenessSubscription {
    /// Resolves once the subscribed peer is declared dead.
    pub async fn died(&self) {
        self.death.cancelled().await;
    }

    pub fn is_dead(&self) -> bool {
        self.death.is_cancelled()
    }
}

impl LivenessRegistry {
    pub fn new(lease_duration: Duration) -> Arc<Self> {
        Arc::new(Self { leases: RwLock::new(HashMap::new()), lease_duration })
    }

    /// Renew (or create) a peer's heartbeat lease.
    pub async fn heartbeat(&self, peer: &PeerKey) {
        let mut leases = self.leases.write().await;
        let entry = leases.entry(peer.clone()).or_insert_with(|| Lease {
            expires_at: Instant::now() + self.lease_duration,
            death: CancellationToken::new(),
        });
        entry.expires_at = Instant::now() + self.lease_duration;
    }

    /// Subscribe to a peer's death. Safe to call before the peer's first
    /// heartbeat; the lease is created lazily with a fresh deadline.
    pub async fn subscribe(&self, peer: &PeerKey) -> LivenessSubscription {
        let mut leases = self.leases.write().await;
        let entry = leases.entry(peer.clone()).or_insert_with(|| Lease {
            expires_at: Instant::now() + self.lease_duration,
            death: CancellationToken::new(),
        });
        LivenessSubscription { death: entry.death.clone() }
    }

    /// Declare a peer dead immediately, notifying every subscriber of its
    /// current lease. Used by tests and by the reaper sweep. A peer that
    /// authenticates again afterwards starts a fresh lease.
    pub async fn mark_dead(&self, peer: &PeerKey) {
        if let Some(lease) = self.leases.write().await.remove(peer) {
            lease.death.cancel();
        }
    }

    /// Spawn the background sweep that declares expired leases dead.
    pub fn spawn_reaper(self: &Arc<Self>, sweep_interval: Duration, shutdown: CancellationToken) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(sweep_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let now = Instant::now();
                let expired: Vec<PeerKey> = {
                    let leases = registry.leases.read().await;
                    leases
                        .iter()
                        .filter(|(_, lease)| lease.expires_at <= now)
                        .map(|(peer, _)| peer.clone())
                        .collect()
                };
                for peer in expired {
                    tracing::info!(peer = %peer, "liveness lease expired, declaring peer dead");
                    registry.mark_dead(&peer).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_dead_wakes_subscriber() {
        let registry = LivenessRegistry::new(Duration::from_secs(30));
        let peer = "peer-1".to_string();
        let sub = registry.subscribe(&peer).await;

        let waited = tokio::spawn(async move {
            sub.died().await;
        });

        registry.mark_dead(&peer).await;
        tokio::time::timeout(Duration::from_secs(1), waited).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn death_observed_by_late_poller() {
        let registry = LivenessRegistry::new(Duration::from_secs(30));
        let peer = "peer-1".to_string();
        let sub = registry.subscribe(&peer).await;

        // The peer dies before anyone awaits the subscription.
        registry.mark_dead(&peer).await;
        assert!(sub.is_dead());
        tokio::time::timeout(Duration::from_secs(1), sub.died()).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lease_is_reaped() {
        let registry = LivenessRegistry::new(Duration::from_millis(20));
        let peer = "peer-1".to_string();
        registry.heartbeat(&peer).await;
        let sub = registry.subscribe(&peer).await;
        registry.spawn_reaper(Duration::from_millis(10), CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(1), sub.died()).await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_extends_lease() {
        let registry = LivenessRegistry::new(Duration::from_secs(30));
        let peer = "peer-1".to_string();
        registry.heartbeat(&peer).await;
        let sub = registry.subscribe(&peer).await;
        registry.heartbeat(&peer).await;
        assert!(!sub.is_dead());
    }
}
