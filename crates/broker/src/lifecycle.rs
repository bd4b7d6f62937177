// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot / user-removed / package-removed lifecycle hooks. Run in the
//! broker's own process space; reconcile Store state directly.

use std::sync::Arc;

use crate::events::EventBus;
use crate::model::{epoch_ms, AuditEvent, EventType};
use crate::store::Store;

/// Reconcile one user's grants on post-unlock boot: session-only grants do
/// not survive a reboot, and any grant that expired while the store was
/// unreadable (pre-unlock) is reconciled now.
pub async fn boot_reconcile_user(store: &Arc<Store>, events: &Arc<EventBus>, user: u32) {
    let now = epoch_ms();
    for grant in store.grants(user).await {
        if !grant.granted {
            continue;
        }
        if grant.flags.is_session_only() {
            if let Some(updated) = store.revoke(&grant.package, user).await {
                store
                    .append_audit(AuditEvent::new(EventType::Revoke, &grant.package, updated.app_id, user, now))
                    .await;
                events.notify_permission_changed(&grant.package, user, false).await;
            }
            continue;
        }
        if grant.is_expired(now) {
            if let Some(expired) = store.expire(&grant.package, user).await {
                store
                    .append_audit(AuditEvent::new(EventType::Expire, &grant.package, expired.app_id, user, now))
                    .await;
                events.notify_permission_changed(&grant.package, user, false).await;
            }
        }
    }
}

/// Reconcile every known user on boot. `known_users` comes from the
/// platform's user database, outside this crate's scope; the caller
/// supplies the list it already has.
pub async fn boot(store: &Arc<Store>, events: &Arc<EventBus>, known_users: &[u32]) {
    for &user in known_users {
        boot_reconcile_user(store, events, user).await;
    }
}

/// A platform user account was removed: unlink both of its store files.
/// No per-record audit is emitted — the audit log for that user is gone
/// along with the files.
pub async fn user_removed(store: &Arc<Store>, user: u32) {
    store.delete_user(user).await;
}

/// A package was removed (not a replacement/update): revoke silently,
/// keeping prior audit entries for forensic retention.
pub async fn package_removed(store: &Arc<Store>, package: &str, user: u32) {
    store.revoke(package, user).await;
}
