// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Management Engine: the privileged surface used by the settings UI and
//! other platform administration tools. Every operation asserts the
//! caller's management capability before touching the Store; cross-user
//! operations additionally require the cross-user capability. The
//! transport layer resolves a caller's capabilities from its bearer token
//! and passes them in as [`ManagementCaps`] — this module never inspects
//! request headers directly.

use std::sync::Arc;

use crate::error::BrokerError;
use crate::events::EventBus;
use crate::model::{epoch_ms, AuditEvent, EventType, Grant};
use crate::session::SessionManager;
use crate::store::Store;

/// `USER_ALL`, the sentinel cross-user target.
pub const USER_ALL: u32 = u32::MAX;

/// Capabilities resolved for the calling management-surface peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagementCaps {
    pub management: bool,
    pub cross_user: bool,
}

pub struct ManagementEngine {
    store: Arc<Store>,
    sessions: Arc<SessionManager>,
    events: Arc<EventBus>,
    audit_query_cap: usize,
}

impl ManagementEngine {
    pub fn new(
        store: Arc<Store>,
        sessions: Arc<SessionManager>,
        events: Arc<EventBus>,
        audit_query_cap: usize,
    ) -> Arc<Self> {
        Arc::new(Self { store, sessions, events, audit_query_cap })
    }

    fn require_management(caps: ManagementCaps) -> Result<(), BrokerError> {
        if caps.management {
            Ok(())
        } else {
            Err(BrokerError::NotAuthorized)
        }
    }

    fn require_cross_user(caps: ManagementCaps, user: u32) -> Result<(), BrokerError> {
        if user != USER_ALL || caps.cross_user {
            Ok(())
        } else {
            Err(BrokerError::NotAuthorized)
        }
    }

    pub async fn list(&self, caps: ManagementCaps, user: u32) -> Result<Vec<Grant>, BrokerError> {
        Self::require_management(caps)?;
        Self::require_cross_user(caps, user)?;
        if user == USER_ALL {
            // No cross-user aggregation: documented empty result rather
            // than aggregating across every known user.
            return Ok(Vec::new());
        }
        Ok(self.store.grants(user).await)
    }

    pub async fn get(
        &self,
        caps: ManagementCaps,
        package: &str,
        user: u32,
    ) -> Result<Option<Grant>, BrokerError> {
        Self::require_management(caps)?;
        Self::require_cross_user(caps, user)?;
        Ok(self.store.grant(package, user).await)
    }

    pub async fn revoke(
        &self,
        caps: ManagementCaps,
        caller_identity: &str,
        package: &str,
        user: u32,
    ) -> Result<(), BrokerError> {
        Self::require_management(caps)?;
        Self::require_cross_user(caps, user)?;

        let Some(updated) = self.store.revoke(package, user).await else {
            // Idempotent: no record existed, succeed silently.
            return Ok(());
        };

        self.sessions.invalidate_for(package, user).await;
        self.store
            .append_audit(
                AuditEvent::new(EventType::Revoke, package, updated.app_id, user, epoch_ms())
                    .with_detail(format!("revoked by {caller_identity}")),
            )
            .await;
        self.events.notify_permission_changed(package, user, false).await;
        Ok(())
    }

    pub async fn revoke_all(&self, caps: ManagementCaps, user: u32) -> Result<usize, BrokerError> {
        Self::require_management(caps)?;
        Self::require_cross_user(caps, user)?;

        if user == USER_ALL {
            // No cross-user aggregation in v1, matching `list`.
            return Ok(0);
        }

        let outcomes = self.store.revoke_all(user).await;
        let mut transitioned = 0usize;
        for outcome in outcomes {
            if !outcome.was_active {
                continue;
            }
            transitioned += 1;
            self.sessions.invalidate_for(&outcome.grant.package, user).await;
            self.store
                .append_audit(AuditEvent::new(
                    EventType::Revoke,
                    &outcome.grant.package,
                    outcome.grant.app_id,
                    user,
                    epoch_ms(),
                ))
                .await;
            self.events.notify_permission_changed(&outcome.grant.package, user, false).await;
        }
        Ok(transitioned)
    }

    pub async fn audit(
        &self,
        caps: ManagementCaps,
        package: Option<&str>,
        user: u32,
    ) -> Result<Vec<AuditEvent>, BrokerError> {
        Self::require_management(caps)?;
        Self::require_cross_user(caps, user)?;
        let mut events = self.store.audit(package, user).await;
        events.truncate(self.audit_query_cap);
        Ok(events)
    }
}
