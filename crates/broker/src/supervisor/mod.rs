// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess Supervisor: the elevated-action surface kept
//! for compatibility with an established elevated-execution API. Spawned
//! children inherit the broker's own privilege; global and per-owner caps
//! bound fan-out, and a dead owning peer triggers cleanup the same way a
//! dead session peer triggers `session_died` (see [`crate::session`]).

mod handle;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use handle::{ProcessHandle, TransferableFd};

use crate::error::BrokerError;
use crate::identity::PeerIdentity;
use crate::liveness::LivenessSubscription;
use crate::model::{epoch_ms, AuditEvent, EventType};
use crate::store::Store;

/// Caps a counter's increment at `max`, returning `true` if the increment
/// was applied. Mirrors the pending-request compare-and-increment discipline.
fn try_bump(counter: &AtomicUsize, max: usize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            if current >= max {
                None
            } else {
                Some(current + 1)
            }
        })
        .is_ok()
}

pub struct Supervisor {
    store: Arc<Store>,
    global_count: Arc<AtomicUsize>,
    owner_counts: RwLock<HashMap<PeerIdentity, Arc<AtomicUsize>>>,
    processes: RwLock<HashMap<Uuid, Arc<ProcessHandle>>>,
    max_global: usize,
    max_per_owner: usize,
}

impl Supervisor {
    pub fn new(store: Arc<Store>, max_global: usize, max_per_owner: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            global_count: Arc::new(AtomicUsize::new(0)),
            owner_counts: RwLock::new(HashMap::new()),
            processes: RwLock::new(HashMap::new()),
            max_global,
            max_per_owner,
        })
    }

    async fn owner_counter(&self, owner: PeerIdentity) -> Arc<AtomicUsize> {
        if let Some(counter) = self.owner_counts.read().await.get(&owner) {
            return Arc::clone(counter);
        }
        let mut counts = self.owner_counts.write().await;
        Arc::clone(counts.entry(owner).or_insert_with(|| Arc::new(AtomicUsize::new(0))))
    }

    pub fn global_count(&self) -> usize {
        self.global_count.load(Ordering::Acquire)
    }

    pub async fn owner_count(&self, owner: PeerIdentity) -> usize {
        self.owner_counter(owner).await.load(Ordering::Acquire)
    }

    /// Spawn a child under the broker's own privilege on behalf of `owner`.
    /// `owner`'s liveness subscription drives automatic cleanup on peer
    /// death. Returns `Ok(None)` — a null handle — if the spawn itself
    /// fails; both counters are already restored by then.
    pub async fn new_process(
        self: &Arc<Self>,
        package: &str,
        owner: PeerIdentity,
        cmd: Vec<String>,
        env: Option<Vec<(String, String)>>,
        cwd: Option<String>,
        liveness: LivenessSubscription,
    ) -> Result<Option<Arc<ProcessHandle>>, BrokerError> {
        let grant = self.store.grant(package, owner.user).await;
        if !grant.map(|g| g.granted).unwrap_or(false) {
            return Err(BrokerError::NotGranted);
        }

        let owner_counter = self.owner_counter(owner).await;
        if !try_bump(&owner_counter, self.max_per_owner) {
            return Err(BrokerError::ResourceExhausted);
        }
        if !try_bump(&self.global_count, self.max_global) {
            owner_counter.fetch_sub(1, Ordering::AcqRel);
            return Err(BrokerError::ResourceExhausted);
        }

        let Some((program, args)) = cmd.split_first() else {
            owner_counter.fetch_sub(1, Ordering::AcqRel);
            self.global_count.fetch_sub(1, Ordering::AcqRel);
            return Ok(None);
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cwd {
            command.current_dir(dir);
        }
        if let Some(vars) = &env {
            command.env_clear();
            for (k, v) in vars {
                command.env(k, v);
            }
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(err = %e, program = %program, "failed to spawn subprocess");
                owner_counter.fetch_sub(1, Ordering::AcqRel);
                self.global_count.fetch_sub(1, Ordering::AcqRel);
                return Ok(None);
            }
        };

        let id = Uuid::new_v4();
        let handle =
            ProcessHandle::new(id, owner, child, owner_counter, Arc::clone(&self.global_count));
        self.processes.write().await.insert(id, Arc::clone(&handle));

        self.store
            .append_audit(
                AuditEvent::new(EventType::Use, package, owner.app_id, owner.user, epoch_ms())
                    .with_detail(redact_command(program, args)),
            )
            .await;

        // Drop the record once the child exits, however it exits.
        let tracker = Arc::clone(self);
        let exited = Arc::clone(&handle);
        tokio::spawn(async move {
            exited.wait().await;
            tracker.processes.write().await.remove(&id);
        });

        let handle_for_death = Arc::clone(&handle);
        tokio::spawn(async move {
            liveness.died().await;
            handle_for_death.destroy().await;
        });

        Ok(Some(handle))
    }

    /// Number of currently tracked process records.
    pub async fn tracked(&self) -> usize {
        self.processes.read().await.len()
    }

    /// Look up a tracked process handle, verifying `caller` is its owner.
    /// "No such id" and "not yours" are deliberately indistinguishable.
    pub async fn get_owned(
        &self,
        id: Uuid,
        caller: PeerIdentity,
    ) -> Result<Arc<ProcessHandle>, BrokerError> {
        let handle =
            self.processes.read().await.get(&id).cloned().ok_or(BrokerError::NotOwner)?;
        if handle.owner != caller {
            return Err(BrokerError::NotOwner);
        }
        Ok(handle)
    }
}

fn redact_command(program: &str, args: &[String]) -> String {
    format!("{program} ({} arg(s))", args.len())
}
