// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent store: per-user encrypted grant and audit files.
//!
//! Ownership: this module owns grant/audit byte state on disk and a
//! per-user reader/writer coordinator in memory. Any number of concurrent
//! readers may proceed together; writes are exclusive within a user and
//! independent across users.

pub mod cipher;
pub mod persist;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::{AuditEvent, AuditFile, Grant, GrantsFile, REVOKED_BY_USER};
use cipher::Cipher;

/// Outcome of mutating a single grant during a batch `revoke_all`.
#[derive(Debug, Clone)]
pub struct RevokeOutcome {
    pub grant: Grant,
    /// Whether this record was actively granted immediately before the
    /// revoke — callers use this to decide whether a transition actually
    /// occurred (and therefore whether to audit/notify).
    pub was_active: bool,
}

pub struct Store {
    base_dir: PathBuf,
    cipher: Cipher,
    audit_cap: usize,
    user_locks: RwLock<HashMap<u32, Arc<RwLock<()>>>>,
}

impl Store {
    pub fn open(base_dir: impl Into<PathBuf>, audit_cap: usize) -> std::io::Result<Arc<Self>> {
        let base_dir = base_dir.into();
        let cipher = Cipher::load_or_create(&base_dir)?;
        Ok(Arc::new(Self {
            base_dir,
            cipher,
            audit_cap,
            user_locks: RwLock::new(HashMap::new()),
        }))
    }

    fn grants_path(&self, user: u32) -> PathBuf {
        self.base_dir.join(format!("grants_u{user}.json"))
    }

    fn audit_path(&self, user: u32) -> PathBuf {
        self.base_dir.join(format!("audit_u{user}.json"))
    }

    async fn lock_for(&self, user: u32) -> Arc<RwLock<()>> {
        if let Some(lock) = self.user_locks.read().await.get(&user) {
            return Arc::clone(lock);
        }
        let mut locks = self.user_locks.write().await;
        Arc::clone(locks.entry(user).or_insert_with(|| Arc::new(RwLock::new(()))))
    }

    fn read_grants(&self, user: u32) -> Vec<Grant> {
        persist::read_encrypted::<GrantsFile>(&self.grants_path(user), &self.cipher)
            .map(|f| f.grants)
            .unwrap_or_default()
    }

    fn write_grants(&self, user: u32, grants: Vec<Grant>) {
        let file = GrantsFile { version: crate::model::SCHEMA_VERSION, grants };
        persist::write_encrypted(&self.grants_path(user), &self.cipher, &file);
    }

    fn read_audit(&self, user: u32) -> Vec<AuditEvent> {
        persist::read_encrypted::<AuditFile>(&self.audit_path(user), &self.cipher)
            .map(|f| f.events)
            .unwrap_or_default()
    }

    fn write_audit(&self, user: u32, events: Vec<AuditEvent>) {
        let file = AuditFile { version: crate::model::SCHEMA_VERSION, events };
        persist::write_encrypted(&self.audit_path(user), &self.cipher, &file);
    }

    /// All grant records for `user`. Empty on missing/unreadable file.
    pub async fn grants(&self, user: u32) -> Vec<Grant> {
        let lock = self.lock_for(user).await;
        let _guard = lock.read().await;
        self.read_grants(user)
    }

    /// A single grant by `(package, user)`, if present.
    pub async fn grant(&self, package: &str, user: u32) -> Option<Grant> {
        self.grants(user).await.into_iter().find(|g| g.package == package)
    }

    /// Replace any existing entry with the same `(package, user)` and
    /// write the full file.
    pub async fn put_grant(&self, grant: Grant) {
        let lock = self.lock_for(grant.user).await;
        let _guard = lock.write().await;
        let mut grants = self.read_grants(grant.user);
        grants.retain(|g| g.package != grant.package);
        grants.push(grant.clone());
        self.write_grants(grant.user, grants);
    }

    /// Apply a user-initiated revoke to a single record, if present.
    pub async fn revoke(&self, package: &str, user: u32) -> Option<Grant> {
        let lock = self.lock_for(user).await;
        let _guard = lock.write().await;
        let mut grants = self.read_grants(user);
        let idx = grants.iter().position(|g| g.package == package)?;
        grants[idx].apply_user_revoke();
        let updated = grants[idx].clone();
        self.write_grants(user, grants);
        Some(updated)
    }

    /// Apply an expiry transition to a single record: `granted=false`,
    /// flags otherwise untouched. Deliberately distinct from [`Store::revoke`]
    /// — it must NOT set `REVOKED_BY_USER`, or a request made immediately
    /// after expiry would wrongly hit the permanent-deny shortcut instead
    /// of falling through to a fresh consent dialog.
    pub async fn expire(&self, package: &str, user: u32) -> Option<Grant> {
        let lock = self.lock_for(user).await;
        let _guard = lock.write().await;
        let mut grants = self.read_grants(user);
        let idx = grants.iter().position(|g| g.package == package)?;
        grants[idx].granted = false;
        let updated = grants[idx].clone();
        self.write_grants(user, grants);
        Some(updated)
    }

    /// Record a user's consent-dialog deny. Updates the existing record if
    /// present, otherwise creates a fresh `granted=false` record carrying
    /// `REVOKED_BY_USER` so a later request hits the permanent-deny
    /// shortcut without requiring a separate management action.
    pub async fn record_user_deny(&self, package: &str, app_id: u32, user: u32) -> Grant {
        let lock = self.lock_for(user).await;
        let _guard = lock.write().await;
        let mut grants = self.read_grants(user);
        let grant = match grants.iter_mut().find(|g| g.package == package) {
            Some(existing) => {
                existing.apply_user_revoke();
                existing.clone()
            }
            None => {
                let mut fresh = Grant::new(package, app_id, user);
                fresh.apply_user_revoke();
                grants.push(fresh.clone());
                fresh
            }
        };
        self.write_grants(user, grants);
        grant
    }

    /// Apply a user-initiated revoke to every record for `user` in one
    /// write. Returns every record with whether it was actually granted
    /// beforehand, so callers can audit/notify only on real transitions.
    pub async fn revoke_all(&self, user: u32) -> Vec<RevokeOutcome> {
        let lock = self.lock_for(user).await;
        let _guard = lock.write().await;
        let mut grants = self.read_grants(user);
        let outcomes: Vec<RevokeOutcome> = grants
            .iter_mut()
            .map(|g| {
                let was_active = g.granted;
                g.apply_user_revoke();
                RevokeOutcome { grant: g.clone(), was_active }
            })
            .collect();
        self.write_grants(user, grants);
        outcomes
    }

    /// Unlink both the grants and audit files for `user`.
    pub async fn delete_user(&self, user: u32) {
        let lock = self.lock_for(user).await;
        let _guard = lock.write().await;
        persist::delete(&self.grants_path(user));
        persist::delete(&self.audit_path(user));
    }

    /// Prepend an audit event, trimming the tail to the configured cap.
    pub async fn append_audit(&self, event: AuditEvent) {
        let lock = self.lock_for(event.user).await;
        let _guard = lock.write().await;
        let mut events = self.read_audit(event.user);
        events.insert(0, event.clone());
        events.truncate(self.audit_cap);
        self.write_audit(event.user, events);
    }

    /// Audit events for `user`, optionally filtered to one package.
    /// Newest-first.
    pub async fn audit(&self, package: Option<&str>, user: u32) -> Vec<AuditEvent> {
        let lock = self.lock_for(user).await;
        let _guard = lock.read().await;
        let events = self.read_audit(user);
        match package {
            Some(pkg) => events.into_iter().filter(|e| e.package == pkg).collect(),
            None => events,
        }
    }

    /// Users with a grants file on disk, in ascending order. Stands in
    /// for the platform's user enumeration at boot: a user that never
    /// stored a grant has nothing to reconcile.
    pub fn known_users(&self) -> Vec<u32> {
        let mut users = Vec::new();
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(_) => return users,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(user) =
                name.strip_prefix("grants_u").and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if let Ok(user) = user.parse() {
                users.push(user);
            }
        }
        users.sort_unstable();
        users
    }
}

/// A record has the permanent-deny flag set: the consent UI must not be
/// invoked for it again.
pub fn is_permanently_denied(grant: &Grant) -> bool {
    grant.flags.contains(REVOKED_BY_USER)
}
