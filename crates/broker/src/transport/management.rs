// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The privileged management surface: grant listing,
//! single-grant lookup, revoke, revoke-all, and audit queries. Every
//! handler resolves [`ManagementCaps`](crate::management::ManagementCaps)
//! from request headers and lets the engine enforce them.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::model::{AuditEvent, Grant};
use crate::state::BrokerState;

use super::auth::resolve_management_caps;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(rename = "userId")]
    user: u32,
}

pub async fn list_grants(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<Grant>>, BrokerError> {
    let caps = resolve_management_caps(&state, &headers);
    Ok(Json(state.management.list(caps, q.user).await?))
}

#[derive(Debug, Deserialize)]
pub struct PackageUserQuery {
    #[serde(rename = "packageName")]
    package: String,
    #[serde(rename = "userId")]
    user: u32,
}

pub async fn get_grant(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Query(q): Query<PackageUserQuery>,
) -> Result<Json<Option<Grant>>, BrokerError> {
    let caps = resolve_management_caps(&state, &headers);
    Ok(Json(state.management.get(caps, &q.package, q.user).await?))
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    revoked: bool,
}

pub async fn revoke(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(q): Json<PackageUserQuery>,
) -> Result<Json<RevokeResponse>, BrokerError> {
    let caps = resolve_management_caps(&state, &headers);
    // The management surface authenticates by capability token, not by
    // peer identity; there is no Bearer-authenticated caller here to
    // attribute the revoke to.
    state.management.revoke(caps, "management", &q.package, q.user).await?;
    Ok(Json(RevokeResponse { revoked: true }))
}

#[derive(Debug, Serialize)]
pub struct RevokeAllResponse {
    #[serde(rename = "revokedCount")]
    revoked_count: usize,
}

pub async fn revoke_all(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(q): Json<UserQuery>,
) -> Result<Json<RevokeAllResponse>, BrokerError> {
    let caps = resolve_management_caps(&state, &headers);
    let revoked_count = state.management.revoke_all(caps, q.user).await?;
    Ok(Json(RevokeAllResponse { revoked_count }))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(rename = "packageName")]
    package: Option<String>,
    #[serde(rename = "userId")]
    user: u32,
}

pub async fn audit(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEvent>>, BrokerError> {
    let caps = resolve_management_caps(&state, &headers);
    let events = state.management.audit(caps, q.package.as_deref(), q.user).await?;
    Ok(Json(events))
}
