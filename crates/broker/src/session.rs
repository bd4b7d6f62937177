// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Manager: issues opaque session handles on grant, tracks
//! `token -> (package, user)` mappings, and drives session-only
//! revocation when the owning peer's liveness fails.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::events::EventBus;
use crate::identity::PeerIdentity;
use crate::liveness::LivenessSubscription;
use crate::model::{epoch_ms, AuditEvent, EventType, GrantFlags, GRANT_SESSION_ONLY};
use crate::store::Store;

/// In-memory session token entry.
struct SessionEntry {
    package: String,
    user: u32,
    flags: GrantFlags,
    app_id: u32,
    /// Set on first successful `attach`; subsequent attaches from a
    /// different peer are rejected.
    attached_peer: Option<PeerIdentity>,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    store: Arc<Store>,
    events: Arc<EventBus>,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { sessions: RwLock::new(HashMap::new()), store, events })
    }

    /// Mint a fresh opaque token for `(package, user)` and register the
    /// mapping. Multiple live tokens per `(package, user)` are permitted.
    pub async fn issue(&self, package: &str, user: u32, app_id: u32, flags: GrantFlags) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions.write().await.insert(
            token.clone(),
            SessionEntry {
                package: package.to_owned(),
                user,
                flags,
                app_id,
                attached_peer: None,
            },
        );
        token
    }

    /// Look up which `(package, user)` a token was issued for.
    pub async fn lookup(&self, token: &str) -> Option<(String, u32)> {
        self.sessions.read().await.get(token).map(|e| (e.package.clone(), e.user))
    }

    /// Attach a peer's liveness to `token`. Idempotent for the same peer;
    /// fails `NOT_OWNER` if a different peer already attached.
    pub async fn attach(
        self: &Arc<Self>,
        token: &str,
        peer: PeerIdentity,
        liveness: LivenessSubscription,
    ) -> Result<(), BrokerError> {
        let first_attach = {
            let mut sessions = self.sessions.write().await;
            let entry = sessions.get_mut(token).ok_or(BrokerError::NotOwner)?;
            match entry.attached_peer {
                Some(existing) if existing == peer => false,
                Some(_) => return Err(BrokerError::NotOwner),
                None => {
                    entry.attached_peer = Some(peer);
                    true
                }
            }
        };

        if first_attach {
            let manager = Arc::clone(self);
            let token = token.to_owned();
            tokio::spawn(async move {
                liveness.died().await;
                manager.session_died(&token).await;
            });
        }

        Ok(())
    }

    /// Remove every token whose `(package, user)` matches, used by the
    /// Management Engine on explicit revoke.
    pub async fn invalidate_for(&self, package: &str, user: u32) {
        self.sessions.write().await.retain(|_, e| !(e.package == package && e.user == user));
    }

    /// Called when a session's liveness subscription reports the owning
    /// peer died. Session-only grants are revoked in the Store; persistent
    /// grants keep their record but lose the live session.
    async fn session_died(&self, token: &str) {
        let entry = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(token)
        };
        let Some(entry) = entry else { return };

        if !entry.flags.contains(GRANT_SESSION_ONLY) {
            return;
        }

        let Some(grant) = self.store.grant(&entry.package, entry.user).await else { return };
        if !grant.granted {
            return;
        }

        if self.store.revoke(&entry.package, entry.user).await.is_some() {
            self.store
                .append_audit(
                    AuditEvent::new(EventType::Revoke, &entry.package, entry.app_id, entry.user, epoch_ms())
                        .with_detail("session-died"),
                )
                .await;
            self.events.notify_permission_changed(&entry.package, entry.user, false).await;
        }
    }
}
