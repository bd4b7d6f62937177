// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity and capability resolution for the HTTP stand-in transport.
//!
//! The platform IPC transport this broker targets authenticates callers by
//! binder credentials, not a bearer token; that primitive is out of scope
//! here. A caller instead presents `Authorization: Bearer
//! "<appId>:<userId>"`, which this module parses into a [`PeerIdentity`]
//! and uses to renew that peer's liveness lease — there is no dedicated
//! heartbeat endpoint, so every authenticated request doubles as one.

use axum::http::HeaderMap;

use crate::error::BrokerError;
use crate::identity::PeerIdentity;
use crate::management::ManagementCaps;
use crate::state::BrokerState;

/// Compare a presented capability token against the configured one
/// without short-circuiting on the first mismatched byte, so the check's
/// timing leaks nothing about how much of the token was right.
fn constant_time_eq(presented: &str, expected: &str) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    let mismatch = presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |diff, (p, e)| diff | (p ^ e));
    mismatch == 0
}

/// Resolve the caller's [`PeerIdentity`] from its bearer token and renew
/// its liveness lease. Every authenticated endpoint calls this first.
pub async fn authenticate_peer(
    state: &BrokerState,
    headers: &HeaderMap,
) -> Result<PeerIdentity, BrokerError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(BrokerError::NotAuthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(BrokerError::NotAuthorized)?;
    let (app_id, user) = token.split_once(':').ok_or(BrokerError::NotAuthorized)?;
    let app_id: u32 = app_id.parse().map_err(|_| BrokerError::NotAuthorized)?;
    let user: u32 = user.parse().map_err(|_| BrokerError::NotAuthorized)?;

    let peer = PeerIdentity::new(app_id, user);
    state.liveness.heartbeat(&peer.liveness_key()).await;
    Ok(peer)
}

/// Resolve the calling peer's management capabilities from header tokens,
/// compared in constant time against the configured management and
/// cross-user tokens. Absent configuration means the capability is never
/// granted, not always-on.
pub fn resolve_management_caps(state: &BrokerState, headers: &HeaderMap) -> ManagementCaps {
    let management = match (&state.config.management_token, headers.get("x-management-capability")) {
        (Some(expected), Some(presented)) => {
            presented.to_str().map(|p| constant_time_eq(p, expected)).unwrap_or(false)
        }
        _ => false,
    };
    let cross_user = match (&state.config.cross_user_token, headers.get("x-cross-user-capability")) {
        (Some(expected), Some(presented)) => {
            presented.to_str().map(|p| constant_time_eq(p, expected)).unwrap_or(false)
        }
        _ => false,
    };
    ManagementCaps { management, cross_user }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_strings() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
