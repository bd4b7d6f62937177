// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The app-facing public surface: `ping`, `request_permission`,
//! `get_my_permission`, `attach_session`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::model::Grant;
use crate::permission::AppCallback;
use crate::state::BrokerState;

use super::auth::authenticate_peer;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    #[serde(rename = "protocolVersion")]
    protocol_version: u32,
}

pub async fn ping(State(state): State<Arc<BrokerState>>) -> Json<PingResponse> {
    Json(PingResponse { protocol_version: state.permissions.ping() })
}

#[derive(Debug, Deserialize)]
pub struct PackageUserQuery {
    #[serde(rename = "packageName")]
    package: String,
    #[serde(rename = "userId")]
    user: u32,
}

pub async fn get_my_permission(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Query(q): Query<PackageUserQuery>,
) -> Result<Json<Option<Grant>>, BrokerError> {
    let caller = authenticate_peer(&state, &headers).await?;
    let grant = state.permissions.get_my_permission(caller, &q.package, q.user).await?;
    Ok(Json(grant))
}

/// Terminal outcome captured synchronously when `request_permission`
/// resolves without dispatching a dialog (active grant, permanent deny).
enum RequestOutcome {
    Granted { grant: Grant, token: String },
    Denied,
}

/// [`AppCallback`] that records a terminal decision into a shared slot
/// instead of delivering it over a live connection; the HTTP handler
/// inspects the slot after `request_permission` returns to tell a
/// synchronous outcome apart from an asynchronously dispatched dialog.
struct SlotCallback {
    slot: tokio::sync::Mutex<Option<RequestOutcome>>,
}

impl AppCallback for SlotCallback {
    fn on_granted(
        &self,
        grant: Grant,
        token: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            *self.slot.lock().await = Some(RequestOutcome::Granted { grant, token });
        })
    }

    fn on_denied(
        &self,
        _package: String,
        _user: u32,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            *self.slot.lock().await = Some(RequestOutcome::Denied);
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestPermissionResponse {
    Granted { grant: Grant, token: String },
    Denied,
    Pending,
}

pub async fn request_permission(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(q): Json<PackageUserQuery>,
) -> Result<Json<RequestPermissionResponse>, BrokerError> {
    let caller = authenticate_peer(&state, &headers).await?;
    let slot = Arc::new(SlotCallback { slot: tokio::sync::Mutex::new(None) });
    state
        .permissions
        .request_permission(caller, &q.package, q.user, Arc::clone(&slot) as Arc<dyn AppCallback>)
        .await?;

    let outcome = slot.slot.lock().await.take();
    let response = match outcome {
        Some(RequestOutcome::Granted { grant, token }) => {
            RequestPermissionResponse::Granted { grant, token }
        }
        Some(RequestOutcome::Denied) => RequestPermissionResponse::Denied,
        None => RequestPermissionResponse::Pending,
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct AttachSessionRequest {
    token: String,
}

#[derive(Debug, Serialize)]
pub struct AttachSessionResponse {
    attached: bool,
}

pub async fn attach_session(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(body): Json<AttachSessionRequest>,
) -> Result<Json<AttachSessionResponse>, BrokerError> {
    let caller = authenticate_peer(&state, &headers).await?;
    let liveness = state.liveness.subscribe(&caller.liveness_key()).await;
    state.permissions.attach_session(caller, &body.token, liveness).await?;
    Ok(Json(AttachSessionResponse { attached: true }))
}
