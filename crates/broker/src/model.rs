// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk and wire data model: grant records, audit events, and the
//! flag bitfield. Unknown JSON fields and unknown flag bits are preserved
//! across read/modify/write cycles so the schema can evolve without a
//! migration step.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Current schema tag written by this broker. Higher values read from disk
/// are tolerated (the record is still parsed structurally); this broker
/// never *writes* a version other than this one.
pub const SCHEMA_VERSION: u32 = 1;

/// `granted=true` implies a persistent grant that survives reboot.
pub const GRANT_PERSISTENT: u32 = 0x1;
/// `granted=true` implies a grant tied to a single live session; revoked
/// when its issuing peer's liveness fails.
pub const GRANT_SESSION_ONLY: u32 = 0x2;
/// Set when the user explicitly denied/revoked; blocks future dialogs.
pub const REVOKED_BY_USER: u32 = 0x4;
/// Set when a platform policy (not the user) revoked the grant.
pub const REVOKED_BY_POLICY: u32 = 0x8;

/// Flag bitfield for a [`Grant`]. A thin newtype so unknown bits set by a
/// newer broker version round-trip through `|=`/`&=` without being masked
/// away by named-accessor code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantFlags(pub u32);

impl GrantFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u32) {
        self.0 &= !bit;
    }

    pub fn is_persistent(self) -> bool {
        self.contains(GRANT_PERSISTENT)
    }

    pub fn is_session_only(self) -> bool {
        self.contains(GRANT_SESSION_ONLY)
    }

    pub fn revoked_by_user(self) -> bool {
        self.contains(REVOKED_BY_USER)
    }

    pub fn revoked_by_policy(self) -> bool {
        self.contains(REVOKED_BY_POLICY)
    }
}

/// A persistent grant record, identified by `(package, user)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(rename = "packageName")]
    pub package: String,
    #[serde(rename = "appId")]
    pub app_id: u32,
    #[serde(rename = "userId")]
    pub user: u32,
    pub granted: bool,
    #[serde(rename = "grantedAt")]
    pub granted_at: u64,
    #[serde(rename = "expiresAt")]
    pub expires_at: u64,
    pub flags: GrantFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Unknown fields from a newer schema version, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Grant {
    pub fn new(package: impl Into<String>, app_id: u32, user: u32) -> Self {
        Self {
            version: SCHEMA_VERSION,
            package: package.into(),
            app_id,
            user,
            granted: false,
            granted_at: 0,
            expires_at: 0,
            flags: GrantFlags::empty(),
            scope: None,
            extra: serde_json::Map::new(),
        }
    }

    /// A null or empty scope means "full".
    pub fn effective_scope(&self) -> &str {
        match &self.scope {
            Some(s) if !s.is_empty() => s.as_str(),
            _ => "full",
        }
    }

    pub fn is_active(&self, now_ms: u64) -> bool {
        self.granted && (self.expires_at == 0 || now_ms <= self.expires_at)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.granted && self.expires_at != 0 && now_ms > self.expires_at
    }

    /// Apply the user-revocation transition: `granted=false`, `REVOKED_BY_USER` set.
    pub fn apply_user_revoke(&mut self) {
        self.granted = false;
        self.flags.set(REVOKED_BY_USER);
    }
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

/// Audit event kind. Serialized as its integer discriminant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum EventType {
    Grant = 1,
    Revoke = 2,
    Use = 3,
    Deny = 4,
    Expire = 5,
}

/// A single append-only audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    #[serde(rename = "packageName")]
    pub package: String,
    #[serde(rename = "appId")]
    pub app_id: u32,
    #[serde(rename = "userId")]
    pub user: u32,
    #[serde(rename = "eventAt")]
    pub event_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        package: impl Into<String>,
        app_id: u32,
        user: u32,
        event_at: u64,
    ) -> Self {
        Self {
            version: SCHEMA_VERSION,
            event_type,
            package: package.into(),
            app_id,
            user,
            event_at,
            detail: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// On-disk envelope for the grants file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantsFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

/// On-disk envelope for the audit file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub events: Vec<AuditEvent>,
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_round_trip() {
        let mut g = Grant::new("com.x", 10042, 0);
        g.extra.insert("futureField".into(), serde_json::json!(true));
        let json = serde_json::to_string(&g).unwrap();
        let back: Grant = serde_json::from_str(&json).unwrap();
        assert_eq!(back.extra.get("futureField"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn unknown_flag_bits_preserved() {
        let mut flags = GrantFlags(0x1 | 0x40); // 0x40 is an unknown future bit
        flags.set(REVOKED_BY_USER);
        assert!(flags.contains(0x40));
        assert!(flags.revoked_by_user());
    }

    #[test]
    fn empty_scope_means_full() {
        let mut g = Grant::new("com.x", 1, 0);
        assert_eq!(g.effective_scope(), "full");
        g.scope = Some(String::new());
        assert_eq!(g.effective_scope(), "full");
        g.scope = Some("camera".into());
        assert_eq!(g.effective_scope(), "camera");
    }
}
