// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stand-in for the IPC transport's authenticated-identity primitive
//! (`PeerIdentity`) and the platform package database used to resolve
//! which peer identity owns a given `(package, user)`.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// An authenticated caller: an app id (package identity, stable across
/// user re-creation) plus the user it is currently running as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub app_id: u32,
    pub user: u32,
}

impl PeerIdentity {
    pub fn new(app_id: u32, user: u32) -> Self {
        Self { app_id, user }
    }

    /// Opaque key this peer authenticates under for liveness-tracking
    /// purposes (the transport's connection identity in a real deployment).
    pub fn liveness_key(&self) -> crate::liveness::PeerKey {
        format!("{}:{}", self.app_id, self.user)
    }
}

/// Stand-in for the platform package database: resolves which peer
/// identity owns a package in a given user.
#[derive(Default)]
pub struct PackageDatabase {
    owners: RwLock<HashMap<(String, u32), PeerIdentity>>,
}

impl PackageDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register that `identity` owns `package` in `identity.user`.
    pub async fn register(&self, package: &str, identity: PeerIdentity) {
        self.owners.write().await.insert((package.to_owned(), identity.user), identity);
    }

    pub async fn owner(&self, package: &str, user: u32) -> Option<PeerIdentity> {
        self.owners.read().await.get(&(package.to_owned(), user)).copied()
    }

    /// Verify that `caller` owns `package` in `user`.
    pub async fn owns(&self, package: &str, user: u32, caller: PeerIdentity) -> bool {
        self.owner(package, user).await == Some(caller)
    }

    /// Verify ownership, auto-registering `caller` as the owner on first
    /// reference. Stands in for platform install-time registration, which
    /// is out of scope here: the first caller to present a given
    /// `(package, user)` over this transport claims it.
    pub async fn owns_or_claim(&self, package: &str, user: u32, caller: PeerIdentity) -> bool {
        let mut owners = self.owners.write().await;
        match owners.get(&(package.to_owned(), user)) {
            Some(existing) => *existing == caller,
            None => {
                owners.insert((package.to_owned(), user), caller);
                true
            }
        }
    }
}
