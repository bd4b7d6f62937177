// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Permbroker: a privileged permission broker granting apps consent-gated
//! capabilities, with session lifecycle tracking and subprocess
//! supervision under an established grant.

pub mod config;
pub mod consent;
pub mod error;
pub mod events;
pub mod identity;
pub mod lifecycle;
pub mod liveness;
pub mod management;
pub mod model;
pub mod pending;
pub mod permission;
pub mod session;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::consent::AutoDenyConsentUi;
use crate::events::EventBus;
use crate::identity::PackageDatabase;
use crate::liveness::LivenessRegistry;
use crate::management::ManagementEngine;
use crate::permission::PermissionEngine;
use crate::session::SessionManager;
use crate::state::BrokerState;
use crate::store::Store;
use crate::supervisor::Supervisor;
use crate::transport::build_router;

/// Run the permission broker until shutdown.
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store = Store::open(config.base_dir.clone(), config.audit_cap)?;
    let events = EventBus::new();
    let sessions = SessionManager::new(Arc::clone(&store), Arc::clone(&events));
    let liveness = LivenessRegistry::new(config.liveness_lease());
    let packages = Arc::new(PackageDatabase::new());

    // The real consent UI is a platform surface outside this repository's
    // scope; until it is wired in, dispatched dialogs auto-deny rather
    // than hang forever.
    let consent_ui = Arc::new(AutoDenyConsentUi);

    let permissions = PermissionEngine::new(
        Arc::clone(&store),
        Arc::clone(&sessions),
        Arc::clone(&events),
        consent_ui,
        Arc::clone(&packages),
        config.max_pending_requests,
    );
    let management = ManagementEngine::new(
        Arc::clone(&store),
        Arc::clone(&sessions),
        Arc::clone(&events),
        config.audit_query_cap,
    );
    let supervisor =
        Supervisor::new(Arc::clone(&store), config.max_global_processes, config.max_per_owner_processes);

    // Post-unlock boot reconciliation: session-only grants do not survive
    // a reboot, and grants that expired while the broker was down are
    // retired now. Known users are those with state on disk.
    lifecycle::boot(&store, &events, &store.known_users()).await;

    liveness.spawn_reaper(config.liveness_sweep_interval(), shutdown.clone());

    let state = Arc::new(BrokerState {
        config,
        store,
        events,
        sessions,
        liveness,
        packages,
        permissions,
        management,
        supervisor,
        shutdown: shutdown.clone(),
    });

    tracing::info!("permbroker listening on {addr}");
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
