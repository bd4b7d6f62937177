// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single supervised child process.
//!
//! Exactly one monitor task owns the `Child` and reaps it; everything else
//! observes the exit through a level-triggered token. The counter
//! decrement lives solely in the monitor, so it happens exactly once no
//! matter which of `destroy()`, natural exit, or owner-death cleanup
//! terminates the child.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::identity::PeerIdentity;

/// A duplicated file descriptor handed to the transport for passing to
/// the peer. The duplicate is independent of the child's own end of the
/// pipe and closes on drop.
pub struct TransferableFd(OwnedFd);

impl TransferableFd {
    fn duplicate<F: AsFd>(fd: F) -> Option<Self> {
        nix::unistd::dup(fd).ok().map(Self)
    }

    pub fn raw(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for TransferableFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

pub struct ProcessHandle {
    pub id: Uuid,
    pub owner: PeerIdentity,
    pid: Option<u32>,
    exited: CancellationToken,
    exit_code: AtomicI32,
    stdin: Option<TransferableFd>,
    stdout: Option<TransferableFd>,
    stderr: Option<TransferableFd>,
}

impl ProcessHandle {
    /// Wrap a freshly spawned child and start its monitor task. The
    /// monitor reaps the child, records the exit code, decrements both
    /// counters, and trips the exit token — in that order.
    pub fn new(
        id: Uuid,
        owner: PeerIdentity,
        mut child: Child,
        owner_count: Arc<AtomicUsize>,
        global_count: Arc<AtomicUsize>,
    ) -> Arc<Self> {
        let pid = child.id();
        // If the pipe object is unrecognised the stream is null, not a
        // failure of the whole handle.
        let stdin = child.stdin.as_ref().and_then(TransferableFd::duplicate);
        let stdout = child.stdout.as_ref().and_then(TransferableFd::duplicate);
        let stderr = child.stderr.as_ref().and_then(TransferableFd::duplicate);

        let handle = Arc::new(Self {
            id,
            owner,
            pid,
            exited: CancellationToken::new(),
            exit_code: AtomicI32::new(0),
            stdin,
            stdout,
            stderr,
        });

        let monitor = Arc::clone(&handle);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => {
                    status.code().or_else(|| status.signal().map(|s| 128 + s)).unwrap_or(-1)
                }
                Err(e) => {
                    tracing::warn!(id = %monitor.id, err = %e, "failed to reap child");
                    -1
                }
            };
            monitor.exit_code.store(code, Ordering::Release);
            owner_count.fetch_sub(1, Ordering::AcqRel);
            global_count.fetch_sub(1, Ordering::AcqRel);
            monitor.exited.cancel();
        });

        handle
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn stdin(&self) -> Option<&TransferableFd> {
        self.stdin.as_ref()
    }

    pub fn stdout(&self) -> Option<&TransferableFd> {
        self.stdout.as_ref()
    }

    pub fn stderr(&self) -> Option<&TransferableFd> {
        self.stderr.as_ref()
    }

    /// Block until the child exits, returning its exit code (`128 + signal`
    /// for a signal death).
    pub async fn wait(&self) -> i32 {
        self.exited.cancelled().await;
        self.exit_code.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the child to exit. Returns whether it did.
    pub async fn wait_for(&self, timeout: std::time::Duration) -> bool {
        tokio::time::timeout(timeout, self.exited.cancelled()).await.is_ok()
    }

    pub fn exit_value(&self) -> Result<i32, BrokerError> {
        if self.exited.is_cancelled() {
            Ok(self.exit_code.load(Ordering::Acquire))
        } else {
            Err(BrokerError::NotExited)
        }
    }

    pub fn alive(&self) -> bool {
        !self.exited.is_cancelled()
    }

    /// Kill the child and wait for the monitor to reap it, so counters are
    /// already restored when this returns. Idempotent: destroying an
    /// exited child is a no-op.
    pub async fn destroy(&self) {
        if !self.exited.is_cancelled() {
            if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
                let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }
        self.exited.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(cmd: &str, args: &[&str]) -> Option<Child> {
        tokio::process::Command::new(cmd)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .ok()
    }

    #[tokio::test]
    async fn counters_drain_once_despite_wait_then_destroy() {
        let owner_count = Arc::new(AtomicUsize::new(1));
        let global_count = Arc::new(AtomicUsize::new(1));
        let Some(child) = spawn("/bin/true", &[]) else {
            return;
        };

        let handle = ProcessHandle::new(
            Uuid::new_v4(),
            PeerIdentity::new(1, 0),
            child,
            Arc::clone(&owner_count),
            Arc::clone(&global_count),
        );
        handle.wait().await;
        handle.destroy().await;

        assert_eq!(owner_count.load(Ordering::Acquire), 0);
        assert_eq!(global_count.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn destroy_kills_a_running_child() {
        let owner_count = Arc::new(AtomicUsize::new(1));
        let global_count = Arc::new(AtomicUsize::new(1));
        let Some(child) = spawn("/bin/sleep", &["60"]) else {
            return;
        };

        let handle = ProcessHandle::new(
            Uuid::new_v4(),
            PeerIdentity::new(1, 0),
            child,
            Arc::clone(&owner_count),
            Arc::clone(&global_count),
        );
        assert!(handle.alive());
        assert_eq!(handle.exit_value(), Err(BrokerError::NotExited));

        handle.destroy().await;
        assert!(!handle.alive());
        // SIGKILL death is reported as 128 + signal number.
        assert_eq!(handle.exit_value(), Ok(137));
        assert_eq!(global_count.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn stdout_fd_carries_child_output() {
        let owner_count = Arc::new(AtomicUsize::new(1));
        let global_count = Arc::new(AtomicUsize::new(1));
        let Some(child) = spawn("/bin/echo", &["hello"]) else {
            return;
        };

        let handle = ProcessHandle::new(
            Uuid::new_v4(),
            PeerIdentity::new(1, 0),
            child,
            owner_count,
            global_count,
        );
        assert!(handle.stdin().is_some());
        assert!(handle.stderr().is_some());

        handle.wait().await;
        let stdout = handle.stdout().unwrap();
        let mut buf = [0u8; 64];
        let n = nix::unistd::read(stdout, &mut buf).unwrap();
        assert!(n > 0);
        assert!(b"hello\n".starts_with(&buf[..n]));
    }
}
