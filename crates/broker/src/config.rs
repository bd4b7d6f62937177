// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

/// Configuration for the permission broker.
#[derive(Debug, Clone, clap::Parser)]
pub struct BrokerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "PERMBROKER_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9700, env = "PERMBROKER_PORT")]
    pub port: u16,

    /// Base directory for encrypted grant/audit storage and the master key.
    #[arg(long, default_value = "/data/system/system_shizuku", env = "PERMBROKER_BASE_DIR")]
    pub base_dir: PathBuf,

    /// Bearer token presented by management-surface callers (the Settings
    /// UI). If unset, the management surface is unreachable.
    #[arg(long, env = "PERMBROKER_MANAGEMENT_TOKEN")]
    pub management_token: Option<String>,

    /// Additional token required for cross-user management operations
    /// (`user == USER_ALL`).
    #[arg(long, env = "PERMBROKER_CROSS_USER_TOKEN")]
    pub cross_user_token: Option<String>,

    /// Maximum pending consent dialogs per (package, user).
    #[arg(long, default_value_t = 3, env = "PERMBROKER_MAX_PENDING")]
    pub max_pending_requests: u32,

    /// Maximum audit entries retained per user.
    #[arg(long, default_value_t = 200, env = "PERMBROKER_AUDIT_CAP")]
    pub audit_cap: usize,

    /// Maximum audit entries returned at the management boundary per query.
    #[arg(long, default_value_t = 100, env = "PERMBROKER_AUDIT_QUERY_CAP")]
    pub audit_query_cap: usize,

    /// Global cap on concurrently supervised child processes.
    #[arg(long, default_value_t = 64, env = "PERMBROKER_MAX_GLOBAL_PROCESSES")]
    pub max_global_processes: usize,

    /// Per-owner cap on concurrently supervised child processes.
    #[arg(long, default_value_t = 8, env = "PERMBROKER_MAX_PER_OWNER_PROCESSES")]
    pub max_per_owner_processes: usize,

    /// Liveness heartbeat lease duration in milliseconds; a peer that does
    /// not renew within this window is treated as dead.
    #[arg(long, default_value_t = 30_000, env = "PERMBROKER_LIVENESS_LEASE_MS")]
    pub liveness_lease_ms: u64,

    /// Liveness reaper sweep interval in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "PERMBROKER_LIVENESS_SWEEP_MS")]
    pub liveness_sweep_ms: u64,
}

impl BrokerConfig {
    pub fn liveness_lease(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.liveness_lease_ms)
    }

    pub fn liveness_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.liveness_sweep_ms)
    }
}
