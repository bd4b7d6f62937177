// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Permission Engine: the public app-facing surface.
//! `ping`, `request_permission`, `get_my_permission`, `attach_session`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::consent::{ConsentCallback, ConsentDecision, ConsentRequest, ConsentUi};
use crate::error::BrokerError;
use crate::events::EventBus;
use crate::identity::{PackageDatabase, PeerIdentity};
use crate::liveness::LivenessSubscription;
use crate::model::{epoch_ms, AuditEvent, EventType, Grant, GrantFlags, GRANT_PERSISTENT};
use crate::pending::{PendingCounters, PendingGuard};
use crate::session::SessionManager;
use crate::store::Store;

/// Protocol version returned by `ping`.
pub const PROTOCOL_VERSION: u32 = 1;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Terminal delivery to the requesting application. Exactly one of
/// `on_granted` / `on_denied` fires per `request_permission` call.
pub trait AppCallback: Send + Sync {
    fn on_granted(&self, grant: Grant, token: String) -> BoxFuture<'_>;
    fn on_denied(&self, package: String, user: u32) -> BoxFuture<'_>;
}

pub struct PermissionEngine {
    store: Arc<Store>,
    sessions: Arc<SessionManager>,
    events: Arc<EventBus>,
    pending: PendingCounters,
    consent_ui: Arc<dyn ConsentUi>,
    packages: Arc<PackageDatabase>,
    max_pending_requests: u32,
}

impl PermissionEngine {
    pub fn new(
        store: Arc<Store>,
        sessions: Arc<SessionManager>,
        events: Arc<EventBus>,
        consent_ui: Arc<dyn ConsentUi>,
        packages: Arc<PackageDatabase>,
        max_pending_requests: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            sessions,
            events,
            pending: PendingCounters::new(),
            consent_ui,
            packages,
            max_pending_requests,
        })
    }

    pub fn ping(&self) -> u32 {
        PROTOCOL_VERSION
    }

    pub async fn get_my_permission(
        &self,
        caller: PeerIdentity,
        package: &str,
        user: u32,
    ) -> Result<Option<Grant>, BrokerError> {
        if !self.packages.owns_or_claim(package, user, caller).await {
            return Err(BrokerError::NotOwner);
        }
        Ok(self.store.grant(package, user).await)
    }

    pub async fn attach_session(
        &self,
        caller: PeerIdentity,
        token: &str,
        liveness: LivenessSubscription,
    ) -> Result<(), BrokerError> {
        let (package, user) = self.sessions.lookup(token).await.ok_or(BrokerError::NotOwner)?;
        if !self.packages.owns(&package, user, caller).await {
            return Err(BrokerError::NotOwner);
        }
        self.sessions.attach(token, caller, liveness).await
    }

    /// Full request-permission flow: ownership check, active-grant fast
    /// path, permanent-deny shortcut, rate limiting, consent dispatch.
    pub async fn request_permission(
        self: &Arc<Self>,
        caller: PeerIdentity,
        package: &str,
        user: u32,
        callback: Arc<dyn AppCallback>,
    ) -> Result<(), BrokerError> {
        if !self.packages.owns_or_claim(package, user, caller).await {
            return Err(BrokerError::NotOwner);
        }

        let now = epoch_ms();
        let existing = self.store.grant(package, user).await;

        if let Some(grant) = &existing {
            if grant.is_active(now) {
                let token = self.sessions.issue(package, user, grant.app_id, grant.flags).await;
                callback.on_granted(grant.clone(), token).await;
                return Ok(());
            }
            if grant.is_expired(now) {
                if let Some(expired) = self.store.expire(package, user).await {
                    self.store
                        .append_audit(AuditEvent::new(EventType::Expire, package, expired.app_id, user, now))
                        .await;
                }
                // Re-read: the in-memory view must reflect the expiry before
                // the permanent-deny check below.
            }
        }

        let after_expiry = self.store.grant(package, user).await;
        if let Some(grant) = &after_expiry {
            if crate::store::is_permanently_denied(grant) {
                callback.on_denied(package.to_owned(), user).await;
                return Ok(());
            }
        }

        let key = (package.to_owned(), user);
        let guard = self
            .pending
            .try_increment(key, self.max_pending_requests)
            .await
            .ok_or(BrokerError::RateLimit)?;

        let app_id = caller.app_id;
        let wrapped = Arc::new(WrappedCallback {
            engine: Arc::clone(self),
            app_callback: callback,
            package: package.to_owned(),
            app_id,
            user,
            _guard: guard,
        });

        self.consent_ui
            .dispatch(ConsentRequest { package: package.to_owned(), app_id, user }, wrapped)
            .await;

        Ok(())
    }

    async fn finish_allow(&self, package: &str, app_id: u32, user: u32, callback: Arc<dyn AppCallback>) {
        let mut grant = Grant::new(package, app_id, user);
        grant.granted = true;
        grant.granted_at = epoch_ms();
        grant.expires_at = 0;
        grant.flags = GrantFlags::empty();
        grant.flags.set(GRANT_PERSISTENT);
        self.store.put_grant(grant.clone()).await;

        self.store
            .append_audit(AuditEvent::new(EventType::Grant, package, app_id, user, grant.granted_at))
            .await;
        self.events.notify_permission_changed(package, user, true).await;

        let token = self.sessions.issue(package, user, app_id, grant.flags).await;
        callback.on_granted(grant, token).await;
    }

    async fn finish_deny(&self, package: &str, app_id: u32, user: u32, callback: Arc<dyn AppCallback>) {
        self.store.record_user_deny(package, app_id, user).await;
        self.store
            .append_audit(AuditEvent::new(EventType::Deny, package, app_id, user, epoch_ms()))
            .await;
        callback.on_denied(package.to_owned(), user).await;
    }
}

/// Wraps the app callback so any terminal consent decision decrements the
/// pending-request counter before the store mutation and delivery happen.
/// The guard's own `Drop` (not this type's) is what guarantees the
/// decrement happens even if `resolve` is never called — e.g. the dialog
/// handle is dropped because the requesting peer disconnected.
struct WrappedCallback {
    engine: Arc<PermissionEngine>,
    app_callback: Arc<dyn AppCallback>,
    package: String,
    app_id: u32,
    user: u32,
    _guard: PendingGuard,
}

impl ConsentCallback for WrappedCallback {
    fn resolve(&self, decision: ConsentDecision) -> BoxFuture<'_> {
        Box::pin(async move {
            match decision {
                ConsentDecision::Allow => {
                    self.engine
                        .finish_allow(&self.package, self.app_id, self.user, Arc::clone(&self.app_callback))
                        .await
                }
                ConsentDecision::Deny => {
                    self.engine
                        .finish_deny(&self.package, self.app_id, self.user, Arc::clone(&self.app_callback))
                        .await
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::mock::MockConsentUi;
    use std::sync::Mutex;

    struct RecordingCallback {
        granted: Mutex<Option<(Grant, String)>>,
        denied: Mutex<Option<(String, u32)>>,
    }

    impl RecordingCallback {
        fn new() -> Arc<Self> {
            Arc::new(Self { granted: Mutex::new(None), denied: Mutex::new(None) })
        }
    }

    impl AppCallback for RecordingCallback {
        fn on_granted(&self, grant: Grant, token: String) -> BoxFuture<'_> {
            *self.granted.lock().unwrap() = Some((grant, token));
            Box::pin(async {})
        }

        fn on_denied(&self, package: String, user: u32) -> BoxFuture<'_> {
            *self.denied.lock().unwrap() = Some((package, user));
            Box::pin(async {})
        }
    }

    async fn harness(
    ) -> (Arc<Store>, Arc<PermissionEngine>, Arc<MockConsentUi>, PeerIdentity, Arc<EventBus>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 200).unwrap();
        let events = EventBus::new();
        let sessions = SessionManager::new(Arc::clone(&store), Arc::clone(&events));
        let packages = Arc::new(PackageDatabase::new());
        let consent_ui = Arc::new(MockConsentUi::new());
        let caller = PeerIdentity::new(10042, 0);
        packages.register("com.x", caller).await;

        let engine = PermissionEngine::new(
            Arc::clone(&store),
            sessions,
            Arc::clone(&events),
            Arc::clone(&consent_ui) as Arc<dyn ConsentUi>,
            packages,
            3,
        );
        (store, engine, consent_ui, caller, events)
    }

    #[tokio::test]
    async fn fresh_grant_path() {
        let (store, engine, consent_ui, caller, events) = harness().await;
        let mut rx = events.subscribe();
        let callback = RecordingCallback::new();

        let engine2 = Arc::clone(&engine);
        let cb2 = Arc::clone(&callback) as Arc<dyn AppCallback>;
        let task = tokio::spawn(async move {
            engine2.request_permission(caller, "com.x", 0, cb2).await.unwrap();
        });

        consent_ui.resolve_next(ConsentDecision::Allow).await;
        task.await.unwrap();

        let record = store.grant("com.x", 0).await.unwrap();
        assert!(record.granted);
        assert!(record.flags.is_persistent());
        assert_eq!(record.expires_at, 0);
        assert_eq!(record.app_id, 10042);

        let audit = store.audit(None, 0).await;
        assert_eq!(audit[0].event_type as u8, EventType::Grant as u8);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.package, "com.x");
        assert!(event.granted);

        let (granted, _token) = callback.granted.lock().unwrap().clone().unwrap();
        assert_eq!(granted.package, "com.x");
        assert!(callback.denied.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn permanent_deny_shortcut() {
        let (store, engine, _consent_ui, caller, _events) = harness().await;
        store.record_user_deny("com.x", 10042, 0).await;

        let callback = RecordingCallback::new();
        engine
            .request_permission(caller, "com.x", 0, Arc::clone(&callback) as Arc<dyn AppCallback>)
            .await
            .unwrap();

        let (package, user) = callback.denied.lock().unwrap().clone().unwrap();
        assert_eq!((package.as_str(), user), ("com.x", 0));
        assert!(callback.granted.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn rate_limit_after_three_pending() {
        let (_store, engine, consent_ui, caller, _events) = harness().await;

        let mut callbacks = Vec::new();
        for _ in 0..3 {
            let callback = RecordingCallback::new();
            engine
                .request_permission(caller, "com.x", 0, Arc::clone(&callback) as Arc<dyn AppCallback>)
                .await
                .unwrap();
            callbacks.push(callback);
        }

        let blocked = RecordingCallback::new();
        let result = engine
            .request_permission(caller, "com.x", 0, blocked as Arc<dyn AppCallback>)
            .await;
        assert_eq!(result, Err(BrokerError::RateLimit));

        // Dialogs resolve in dispatch order; each terminal decision frees
        // a pending slot and reaches its own callback.
        for callback in &callbacks {
            consent_ui.resolve_next(ConsentDecision::Deny).await;
            assert!(callback.denied.lock().unwrap().is_some());
        }

        // The counter has drained: a fresh request is no longer rate
        // limited (it hits the recorded permanent deny instead).
        let after = RecordingCallback::new();
        engine
            .request_permission(caller, "com.x", 0, Arc::clone(&after) as Arc<dyn AppCallback>)
            .await
            .unwrap();
        assert!(after.denied.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn expiry_falls_through_to_dialog() {
        let (store, engine, consent_ui, caller, _events) = harness().await;
        let mut g = Grant::new("com.x", 10042, 0);
        g.granted = true;
        g.flags.set(GRANT_PERSISTENT);
        g.expires_at = 1;
        store.put_grant(g).await;

        let engine2 = Arc::clone(&engine);
        let callback = RecordingCallback::new();
        let cb2 = Arc::clone(&callback) as Arc<dyn AppCallback>;
        let task = tokio::spawn(async move {
            engine2.request_permission(caller, "com.x", 0, cb2).await.unwrap();
        });

        consent_ui.resolve_next(ConsentDecision::Allow).await;
        task.await.unwrap();

        let audit = store.audit(None, 0).await;
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[1].event_type as u8, EventType::Expire as u8);
        assert_eq!(audit[0].event_type as u8, EventType::Grant as u8);
    }

    #[tokio::test]
    async fn request_from_non_owner_fails() {
        let (_store, engine, _consent_ui, _caller, _events) = harness().await;
        let intruder = PeerIdentity::new(99, 0);
        let callback = RecordingCallback::new();
        let result = engine
            .request_permission(intruder, "com.x", 0, callback as Arc<dyn AppCallback>)
            .await;
        assert_eq!(result, Err(BrokerError::NotOwner));
    }
}
