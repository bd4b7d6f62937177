// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus: fans out permission-state changes to subscribed listeners.
//! Every Permission Engine and Management Engine mutation that changes a
//! grant's live `granted` value publishes one event here; slow or absent
//! subscribers never back-pressure the mutating call.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// A permission grant's live state changed for `(package, user)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionEvent {
    #[serde(rename = "packageName")]
    pub package: String,
    #[serde(rename = "userId")]
    pub user: u32,
    pub granted: bool,
    #[serde(rename = "changedAt")]
    pub changed_at: u64,
}

/// Broadcast hub for permission-state changes. A lagging subscriber simply
/// misses old events on its next `recv` (`broadcast::error::RecvError::Lagged`);
/// callers that need the authoritative current state re-fetch from the Store
/// rather than trusting the event stream as a source of truth.
pub struct EventBus {
    tx: broadcast::Sender<PermissionEvent>,
}

impl EventBus {
    pub fn new() -> std::sync::Arc<Self> {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        std::sync::Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PermissionEvent> {
        self.tx.subscribe()
    }

    /// Publish a state change. Returns silently if there are no subscribers.
    pub async fn notify_permission_changed(&self, package: &str, user: u32, granted: bool) {
        let event = PermissionEvent {
            package: package.to_owned(),
            user,
            granted,
            changed_at: crate::model::epoch_ms(),
        };
        let _ = self.tx.send(event);
    }

    /// Filter a receiver's stream down to the next event for one
    /// `(package, user)`. Used by long-poll style callers awaiting a
    /// specific grant's outcome.
    pub async fn next_for(
        rx: &mut broadcast::Receiver<PermissionEvent>,
        package: &str,
        user: u32,
    ) -> Option<PermissionEvent> {
        loop {
            match rx.recv().await {
                Ok(event) if event.package == package && event.user == user => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
