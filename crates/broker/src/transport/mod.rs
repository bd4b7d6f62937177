// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the permission broker: a stand-in for the
//! platform's binder-based IPC surface, exposing the same operations
//! over a local HTTP API.

pub mod auth;
pub mod management;
pub mod processes;
pub mod public;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::BrokerState;

/// Build the axum `Router` with every public, management, and process
/// route, plus CORS and request tracing layers.
pub fn build_router(state: Arc<BrokerState>) -> Router {
    Router::new()
        .route("/api/v1/ping", get(public::ping))
        .route("/api/v1/permissions/request", post(public::request_permission))
        .route("/api/v1/permissions/mine", get(public::get_my_permission))
        .route("/api/v1/sessions/attach", post(public::attach_session))
        // Compatibility shim: the public surface under its legacy
        // registration name. Same handlers, same engines — the shim holds
        // no grant state of its own.
        .route("/api/v1/compat/ping", get(public::ping))
        .route("/api/v1/compat/permissions/request", post(public::request_permission))
        .route("/api/v1/compat/permissions/mine", get(public::get_my_permission))
        .route("/api/v1/compat/sessions/attach", post(public::attach_session))
        .route("/api/v1/management/grants", get(management::list_grants))
        .route("/api/v1/management/grants/one", get(management::get_grant))
        .route("/api/v1/management/revoke", post(management::revoke))
        .route("/api/v1/management/revoke_all", post(management::revoke_all))
        .route("/api/v1/management/audit", get(management::audit))
        .route("/api/v1/processes", post(processes::new_process))
        .route("/api/v1/processes/{id}/wait", post(processes::wait))
        .route("/api/v1/processes/{id}/wait_for", post(processes::wait_for))
        .route("/api/v1/processes/{id}/exit", get(processes::exit_value))
        .route("/api/v1/processes/{id}/destroy", post(processes::destroy))
        .route("/api/v1/processes/{id}/alive", get(processes::alive))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
