// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess Supervisor surface: spawn a child under
//! an existing grant, then wait/inspect/destroy it by id. Every sub-route
//! re-verifies the caller owns the process before touching it.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::state::BrokerState;

use super::auth::authenticate_peer;

#[derive(Debug, Deserialize)]
pub struct NewProcessRequest {
    #[serde(rename = "packageName")]
    package: String,
    cmd: Vec<String>,
    #[serde(default)]
    env: Option<Vec<(String, String)>>,
    #[serde(default)]
    cwd: Option<String>,
}

/// Both fields are null when the spawn itself failed; the caps were
/// already checked and the counters restored by then.
#[derive(Debug, Serialize)]
pub struct NewProcessResponse {
    id: Option<Uuid>,
    pid: Option<u32>,
}

pub async fn new_process(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(body): Json<NewProcessRequest>,
) -> Result<Json<NewProcessResponse>, BrokerError> {
    let caller = authenticate_peer(&state, &headers).await?;
    let liveness = state.liveness.subscribe(&caller.liveness_key()).await;
    let handle = state
        .supervisor
        .new_process(&body.package, caller, body.cmd, body.env, body.cwd, liveness)
        .await?;
    let response = match handle {
        Some(handle) => NewProcessResponse { id: Some(handle.id), pid: handle.pid() },
        None => NewProcessResponse { id: None, pid: None },
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct AliveResponse {
    alive: bool,
}

pub async fn alive(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<AliveResponse>, BrokerError> {
    let caller = authenticate_peer(&state, &headers).await?;
    let handle = state.supervisor.get_owned(id, caller).await?;
    Ok(Json(AliveResponse { alive: handle.alive() }))
}

#[derive(Debug, Serialize)]
pub struct WaitResponse {
    code: i32,
}

pub async fn wait(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<WaitResponse>, BrokerError> {
    let caller = authenticate_peer(&state, &headers).await?;
    let handle = state.supervisor.get_owned(id, caller).await?;
    Ok(Json(WaitResponse { code: handle.wait().await }))
}

#[derive(Debug, Deserialize)]
pub struct WaitForRequest {
    #[serde(rename = "timeoutMs")]
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct WaitForResponse {
    exited: bool,
}

pub async fn wait_for(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<WaitForRequest>,
) -> Result<Json<WaitForResponse>, BrokerError> {
    let caller = authenticate_peer(&state, &headers).await?;
    let handle = state.supervisor.get_owned(id, caller).await?;
    let exited = handle.wait_for(std::time::Duration::from_millis(body.timeout_ms)).await;
    Ok(Json(WaitForResponse { exited }))
}

pub async fn exit_value(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<WaitResponse>, BrokerError> {
    let caller = authenticate_peer(&state, &headers).await?;
    let handle = state.supervisor.get_owned(id, caller).await?;
    Ok(Json(WaitResponse { code: handle.exit_value()? }))
}

#[derive(Debug, Serialize)]
pub struct DestroyResponse {
    destroyed: bool,
}

pub async fn destroy(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<DestroyResponse>, BrokerError> {
    let caller = authenticate_peer(&state, &headers).await?;
    let handle = state.supervisor.get_owned(id, caller).await?;
    handle.destroy().await;
    Ok(Json(DestroyResponse { destroyed: true }))
}
