// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consent UI collaborator: an out-of-scope platform surface the broker
//! dispatches a request to, awaiting exactly one terminal decision through
//! [`ConsentCallback`]. Dispatch itself must never block on the user's
//! decision — only on queuing the dialog.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// One-shot decision handed back by the consent UI. Exactly one variant
/// is ever produced per dispatched dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    Allow,
    Deny,
}

/// A dispatched consent request.
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub package: String,
    pub app_id: u32,
    pub user: u32,
}

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Receives the terminal decision for one dispatched dialog. Implemented
/// by the Permission Engine's wrapped callback (see `permission::WrappedCallback`);
/// `resolve` is called exactly once regardless of how the dialog ends —
/// allow, deny, or the user backgrounding the dialog (also deny).
pub trait ConsentCallback: Send + Sync {
    fn resolve(&self, decision: ConsentDecision) -> BoxFuture<'_>;
}

/// The consent UI collaborator: accepts a dispatched request and a
/// callback to invoke once the user (or an equivalent automated policy)
/// reaches a terminal decision. Returns immediately after queuing.
pub trait ConsentUi: Send + Sync {
    fn dispatch(&self, request: ConsentRequest, callback: Arc<dyn ConsentCallback>) -> BoxFuture<'_>;
}

/// Production placeholder: the real consent UI is a platform surface
/// outside this repository's scope. Until that surface is wired in, every
/// dispatched request resolves to `Deny` on its own task, so the engine
/// never hangs waiting for a UI that doesn't exist here.
pub struct AutoDenyConsentUi;

impl ConsentUi for AutoDenyConsentUi {
    fn dispatch(&self, _request: ConsentRequest, callback: Arc<dyn ConsentCallback>) -> BoxFuture<'_> {
        Box::pin(async move {
            tokio::spawn(async move {
                callback.resolve(ConsentDecision::Deny).await;
            });
        })
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use tokio::sync::{mpsc, Mutex};

    /// Deterministic test double: every dispatched request is queued until
    /// the test explicitly resolves it via [`MockConsentUi::resolve_next`].
    pub struct MockConsentUi {
        inbox_tx: mpsc::UnboundedSender<(ConsentRequest, Arc<dyn ConsentCallback>)>,
        inbox_rx: Mutex<mpsc::UnboundedReceiver<(ConsentRequest, Arc<dyn ConsentCallback>)>>,
    }

    impl MockConsentUi {
        pub fn new() -> Self {
            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            Self { inbox_tx, inbox_rx: Mutex::new(inbox_rx) }
        }

        /// Wait for the next dispatched dialog and resolve it with `decision`.
        pub async fn resolve_next(&self, decision: ConsentDecision) -> ConsentRequest {
            let (request, callback) = self.inbox_rx.lock().await.recv().await.expect("dialog was dispatched");
            callback.resolve(decision).await;
            request
        }
    }

    impl Default for MockConsentUi {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ConsentUi for MockConsentUi {
        fn dispatch(&self, request: ConsentRequest, callback: Arc<dyn ConsentCallback>) -> BoxFuture<'_> {
            Box::pin(async move {
                let _ = self.inbox_tx.send((request, callback));
            })
        }
    }
}
