// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the broker HTTP API: the per-engine scenarios the
//! unit tests cover, here run end to end through the transport layer.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use permbroker::config::BrokerConfig;
use permbroker::consent::{
    AutoDenyConsentUi, ConsentCallback, ConsentDecision, ConsentRequest, ConsentUi,
};
use permbroker::events::EventBus;
use permbroker::identity::PackageDatabase;
use permbroker::liveness::LivenessRegistry;
use permbroker::management::ManagementEngine;
use permbroker::permission::PermissionEngine;
use permbroker::session::SessionManager;
use permbroker::state::BrokerState;
use permbroker::store::Store;
use permbroker::supervisor::Supervisor;
use permbroker::transport::build_router;

fn test_config(base_dir: std::path::PathBuf) -> BrokerConfig {
    BrokerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        base_dir,
        management_token: Some("mgmt-test-token".into()),
        cross_user_token: Some("cross-user-test-token".into()),
        max_pending_requests: 3,
        audit_cap: 200,
        audit_query_cap: 100,
        max_global_processes: 64,
        max_per_owner_processes: 8,
        liveness_lease_ms: 30_000,
        liveness_sweep_ms: 5_000,
    }
}

/// Consent double that allows every dispatched dialog, so grant paths can
/// run end to end without a real UI.
struct AllowAllConsentUi;

impl ConsentUi for AllowAllConsentUi {
    fn dispatch(
        &self,
        _request: ConsentRequest,
        callback: Arc<dyn ConsentCallback>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            tokio::spawn(async move {
                callback.resolve(ConsentDecision::Allow).await;
            });
        })
    }
}

fn test_state(consent_ui: Arc<dyn ConsentUi>) -> (tempfile::TempDir, Arc<BrokerState>) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = test_config(dir.path().to_path_buf());

    let store = Store::open(config.base_dir.clone(), config.audit_cap).expect("failed to open store");
    let events = EventBus::new();
    let sessions = SessionManager::new(Arc::clone(&store), Arc::clone(&events));
    let liveness = LivenessRegistry::new(config.liveness_lease());
    let packages = Arc::new(PackageDatabase::new());
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
    let supervisor = Supervisor::new(
        Arc::clone(&store),
        config.max_global_processes,
        config.max_per_owner_processes,
    );

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
        shutdown: CancellationToken::new(),
    });
    (dir, state)
}

fn test_server(state: Arc<BrokerState>) -> TestServer {
    let router = build_router(state);
    TestServer::new(router).expect("failed to create test server")
}

fn bearer(app_id: u32, user: u32) -> String {
    format!("Bearer {app_id}:{user}")
}

/// Re-issue `request_permission` until a terminal status comes back
/// inline (the first call dispatches the dialog; once the consent double
/// resolves, the next call hits the fast path or the deny shortcut).
async fn request_until_terminal(
    server: &TestServer,
    auth: &str,
    package: &str,
    user: u32,
) -> anyhow::Result<serde_json::Value> {
    for _ in 0..100 {
        let resp = server
            .post("/api/v1/permissions/request")
            .add_header("authorization", auth)
            .json(&serde_json::json!({"packageName": package, "userId": user}))
            .await;
        // Re-requesting before the dialog resolves can trip the pending
        // cap; back off and retry.
        if resp.status_code() == axum::http::StatusCode::TOO_MANY_REQUESTS {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            continue;
        }
        resp.assert_status_ok();
        let body: serde_json::Value = resp.json();
        if body["status"] != "pending" {
            return Ok(body);
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    anyhow::bail!("consent dialog never resolved");
}

#[tokio::test]
async fn ping_returns_protocol_version() {
    let (_dir, state) = test_state(Arc::new(AutoDenyConsentUi));
    let server = test_server(state);
    let resp = server.get("/api/v1/ping").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["protocolVersion"], 1);
}

#[tokio::test]
async fn unauthenticated_request_is_rejected() {
    let (_dir, state) = test_state(Arc::new(AutoDenyConsentUi));
    let server = test_server(state);
    let resp = server
        .post("/api/v1/permissions/request")
        .json(&serde_json::json!({"packageName": "com.x", "userId": 0}))
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn request_permission_dispatches_then_reports_deny() -> anyhow::Result<()> {
    let (_dir, state) = test_state(Arc::new(AutoDenyConsentUi));
    let server = test_server(state);
    let resp = server
        .post("/api/v1/permissions/request")
        .add_header("authorization", bearer(10042, 0))
        .json(&serde_json::json!({"packageName": "com.x", "userId": 0}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    // The dialog resolves on a spawned task; the first response only
    // acknowledges the dispatch.
    assert_eq!(body["status"], "pending");

    // The deny is recorded permanently, so a later request short-circuits
    // without a new dialog.
    let body = request_until_terminal(&server, &bearer(10042, 0), "com.x", 0).await?;
    assert_eq!(body["status"], "denied");
    Ok(())
}

#[tokio::test]
async fn grant_flow_end_to_end() -> anyhow::Result<()> {
    let (_dir, state) = test_state(Arc::new(AllowAllConsentUi));
    let server = test_server(state);
    let auth = bearer(10042, 0);

    let body = request_until_terminal(&server, &auth, "com.x", 0).await?;
    assert_eq!(body["status"], "granted");
    assert_eq!(body["grant"]["packageName"], "com.x");
    assert_eq!(body["grant"]["granted"], true);
    let token = body["token"].as_str().context("token missing")?.to_owned();

    // The issued token attaches for the owning peer.
    let resp = server
        .post("/api/v1/sessions/attach")
        .add_header("authorization", auth.clone())
        .json(&serde_json::json!({"token": token}))
        .await;
    resp.assert_status_ok();

    // A different peer cannot attach it.
    let resp = server
        .post("/api/v1/sessions/attach")
        .add_header("authorization", bearer(99999, 0))
        .json(&serde_json::json!({"token": token}))
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);

    let resp = server
        .get("/api/v1/permissions/mine")
        .add_header("authorization", auth)
        .add_query_param("packageName", "com.x")
        .add_query_param("userId", 0)
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["granted"], true);
    assert_eq!(body["flags"], 0x1);
    Ok(())
}

#[tokio::test]
async fn management_revoke_blocks_future_requests() -> anyhow::Result<()> {
    let (_dir, state) = test_state(Arc::new(AllowAllConsentUi));
    let server = test_server(state);
    let auth = bearer(10042, 0);

    let body = request_until_terminal(&server, &auth, "com.x", 0).await?;
    assert_eq!(body["status"], "granted");

    let resp = server
        .post("/api/v1/management/revoke")
        .add_header("x-management-capability", "mgmt-test-token")
        .json(&serde_json::json!({"packageName": "com.x", "userId": 0}))
        .await;
    resp.assert_status_ok();

    // The revoke set the permanent-deny flag; no new dialog runs.
    let resp = server
        .post("/api/v1/permissions/request")
        .add_header("authorization", auth)
        .json(&serde_json::json!({"packageName": "com.x", "userId": 0}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "denied");
    Ok(())
}

#[tokio::test]
async fn management_audit_is_newest_first() -> anyhow::Result<()> {
    let (_dir, state) = test_state(Arc::new(AllowAllConsentUi));
    let server = test_server(state);
    let auth = bearer(10042, 0);

    request_until_terminal(&server, &auth, "com.x", 0).await?;
    server
        .post("/api/v1/management/revoke")
        .add_header("x-management-capability", "mgmt-test-token")
        .json(&serde_json::json!({"packageName": "com.x", "userId": 0}))
        .await
        .assert_status_ok();

    let resp = server
        .get("/api/v1/management/audit")
        .add_header("x-management-capability", "mgmt-test-token")
        .add_query_param("userId", 0)
        .await;
    resp.assert_status_ok();
    let events: Vec<serde_json::Value> = resp.json();
    assert!(events.len() >= 2);
    // REVOKE=2 is newer than GRANT=1.
    assert_eq!(events[0]["eventType"], 2);
    assert_eq!(events.last().context("empty audit")?["eventType"], 1);
    Ok(())
}

#[tokio::test]
async fn compat_shim_shares_grant_state_with_primary_surface() -> anyhow::Result<()> {
    let (_dir, state) = test_state(Arc::new(AllowAllConsentUi));
    let server = test_server(state);
    let auth = bearer(10042, 0);

    let resp = server.get("/api/v1/compat/ping").await;
    resp.assert_status_ok();

    // Grant obtained through the shim is visible on the primary surface.
    let body = request_until_terminal(&server, &auth, "com.x", 0).await?;
    assert_eq!(body["status"], "granted");

    let resp = server
        .get("/api/v1/compat/permissions/mine")
        .add_header("authorization", auth)
        .add_query_param("packageName", "com.x")
        .add_query_param("userId", 0)
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["granted"], true);
    Ok(())
}

#[tokio::test]
async fn get_my_permission_rejects_non_owner() {
    let (_dir, state) = test_state(Arc::new(AutoDenyConsentUi));
    let server = test_server(state);
    // First caller claims ownership of com.x for user 0.
    server
        .post("/api/v1/permissions/request")
        .add_header("authorization", bearer(10042, 0))
        .json(&serde_json::json!({"packageName": "com.x", "userId": 0}))
        .await
        .assert_status_ok();

    let resp = server
        .get("/api/v1/permissions/mine")
        .add_header("authorization", bearer(99999, 0))
        .add_query_param("packageName", "com.x")
        .add_query_param("userId", 0)
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn management_requires_capability_header() {
    let (_dir, state) = test_state(Arc::new(AutoDenyConsentUi));
    let server = test_server(state);
    let resp = server.get("/api/v1/management/grants").add_query_param("userId", 0).await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn management_revoke_is_idempotent_when_absent() {
    let (_dir, state) = test_state(Arc::new(AutoDenyConsentUi));
    let server = test_server(state);

    let resp = server
        .post("/api/v1/management/revoke")
        .add_header("x-management-capability", "mgmt-test-token")
        .json(&serde_json::json!({"packageName": "com.missing", "userId": 0}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["revoked"], true);
}

#[tokio::test]
async fn management_revoke_all_requires_cross_user_token_for_user_all() {
    let (_dir, state) = test_state(Arc::new(AutoDenyConsentUi));
    let server = test_server(state);
    let resp = server
        .post("/api/v1/management/revoke_all")
        .add_header("x-management-capability", "mgmt-test-token")
        .json(&serde_json::json!({"userId": u32::MAX}))
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);

    let resp = server
        .post("/api/v1/management/revoke_all")
        .add_header("x-management-capability", "mgmt-test-token")
        .add_header("x-cross-user-capability", "cross-user-test-token")
        .json(&serde_json::json!({"userId": u32::MAX}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["revokedCount"], 0);
}

#[tokio::test]
async fn process_routes_require_a_grant() {
    let (_dir, state) = test_state(Arc::new(AutoDenyConsentUi));
    let server = test_server(state);
    let resp = server
        .post("/api/v1/processes")
        .add_header("authorization", bearer(10042, 0))
        .json(&serde_json::json!({"packageName": "com.x", "cmd": ["/bin/true"]}))
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "NOT_GRANTED");
}

#[tokio::test]
async fn process_lifecycle_over_http() -> anyhow::Result<()> {
    let (_dir, state) = test_state(Arc::new(AllowAllConsentUi));
    let server = test_server(state);
    let auth = bearer(10042, 0);

    let body = request_until_terminal(&server, &auth, "com.x", 0).await?;
    assert_eq!(body["status"], "granted");

    let resp = server
        .post("/api/v1/processes")
        .add_header("authorization", auth.clone())
        .json(&serde_json::json!({"packageName": "com.x", "cmd": ["/bin/sleep", "60"]}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let id = body["id"].as_str().context("spawn returned a null handle")?.to_owned();

    let resp = server
        .get(&format!("/api/v1/processes/{id}/alive"))
        .add_header("authorization", auth.clone())
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["alive"], true);

    // Still running: exit_value is a conflict, wait_for times out.
    let resp = server
        .get(&format!("/api/v1/processes/{id}/exit"))
        .add_header("authorization", auth.clone())
        .await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);

    let resp = server
        .post(&format!("/api/v1/processes/{id}/wait_for"))
        .add_header("authorization", auth.clone())
        .json(&serde_json::json!({"timeoutMs": 10}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["exited"], false);

    // Another peer cannot touch the process.
    let resp = server
        .post(&format!("/api/v1/processes/{id}/destroy"))
        .add_header("authorization", bearer(99999, 0))
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);

    let resp = server
        .post(&format!("/api/v1/processes/{id}/destroy"))
        .add_header("authorization", auth.clone())
        .await;
    resp.assert_status_ok();
    Ok(())
}
