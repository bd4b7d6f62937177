// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state assembled once at boot and handed to every
//! transport handler through axum's `State` extractor.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::events::EventBus;
use crate::identity::PackageDatabase;
use crate::liveness::LivenessRegistry;
use crate::management::ManagementEngine;
use crate::permission::PermissionEngine;
use crate::session::SessionManager;
use crate::store::Store;
use crate::supervisor::Supervisor;

/// Every collaborator the transport layer needs, wired together once in
/// [`crate::run`].
pub struct BrokerState {
    pub config: BrokerConfig,
    pub store: Arc<Store>,
    pub events: Arc<EventBus>,
    pub sessions: Arc<SessionManager>,
    pub liveness: Arc<LivenessRegistry>,
    pub packages: Arc<PackageDatabase>,
    pub permissions: Arc<PermissionEngine>,
    pub management: Arc<ManagementEngine>,
    pub supervisor: Arc<Supervisor>,
    pub shutdown: CancellationToken,
}
