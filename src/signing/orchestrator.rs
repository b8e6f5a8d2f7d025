//! Signing request orchestrator
//!
//! Holds at most one signing request at a time and turns the user's
//! approve/cancel into a `SigningDecision` for the caller that forwarded
//! it. Each request is answered exactly once.
//!
//! ```text
//! Idle ──present──► Presenting ──approve──► (Approved) ──► Idle
//!                        │
//!                        └────cancel───► (Cancelled) ──► Idle
//! ```
//!
//! While a precondition is unmet the request stays in `Presenting`, the
//! UI shows the warning instead of the prompt, and `approve` is a no-op.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::recovery::result_future::{Resolver, ResultFuture};

use super::preconditions::{ExternalWalletState, PreconditionWarning};
use super::types::{SigningDecision, SigningRequest};

/// Observable orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Idle,
    Presenting,
}

/// What the UI should render right now
#[derive(Debug, Clone, PartialEq)]
pub enum SigningView {
    Idle,
    /// Precondition unmet: show the warning, not the prompt
    Blocked {
        request: SigningRequest,
        warning: PreconditionWarning,
    },
    /// Show the approval prompt
    Approval(SigningRequest),
}

/// Where the decision goes
enum Reply {
    Future(Resolver<SigningDecision>),
    Callback(Box<dyn FnOnce(SigningDecision) + Send>),
}

impl Reply {
    fn is_abandoned(&self) -> bool {
        match self {
            Reply::Future(resolver) => resolver.is_abandoned(),
            Reply::Callback(_) => false,
        }
    }

    fn deliver(self, decision: SigningDecision) -> bool {
        match self {
            Reply::Future(resolver) => resolver.resolve(decision),
            Reply::Callback(callback) => {
                callback(decision);
                true
            }
        }
    }
}

struct ActiveRequest {
    id: Uuid,
    request: SigningRequest,
    reply: Reply,
}

#[derive(Default)]
struct Inner {
    active: Option<ActiveRequest>,
    preconditions: ExternalWalletState,
}

/// Caller's handle on a presented request; resolves to the decision
#[derive(Debug)]
pub struct PendingSigning {
    id: Uuid,
    decision: ResultFuture<SigningDecision>,
}

impl PendingSigning {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for PendingSigning {
    type Output = Result<SigningDecision>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.decision).poll(cx)
    }
}

/// Gatekeeper for message and transaction signing
#[derive(Clone, Default)]
pub struct SigningOrchestrator {
    inner: Arc<Mutex<Inner>>,
}

impl SigningOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn install(&self, request: SigningRequest, reply: Reply) -> Result<Uuid> {
        let mut inner = self.lock();

        if let Some(active) = &inner.active {
            if !active.reply.is_abandoned() {
                warn!(
                    active = %active.id,
                    kind = request.kind(),
                    "Signing request rejected, another request is being presented"
                );
                return Err(Error::SigningBusy);
            }
            debug!(request = %active.id, "Dropping signing request whose caller went away");
        }

        let id = Uuid::new_v4();
        let warning = inner.preconditions.check(request.chain_id());
        match &warning {
            Some(w) => info!(request = %id, kind = request.kind(), chain_id = request.chain_id(), warning = %w, "Signing request blocked by precondition"),
            None => info!(request = %id, kind = request.kind(), chain_id = request.chain_id(), "Presenting signing request"),
        }

        inner.active = Some(ActiveRequest { id, request, reply });
        Ok(id)
    }

    /// Present a request; the returned handle resolves with the decision
    ///
    /// Fails with `SigningBusy` (leaving the current request alone) unless idle.
    pub fn present(&self, request: SigningRequest) -> Result<PendingSigning> {
        let (decision, resolver) = ResultFuture::new();
        let id = self.install(request, Reply::Future(resolver))?;
        Ok(PendingSigning { id, decision })
    }

    /// Present a request, delivering the decision to `on_decision`
    ///
    /// The callback runs exactly once, outside the orchestrator's lock.
    pub fn present_with_callback<F>(&self, request: SigningRequest, on_decision: F) -> Result<Uuid>
    where
        F: FnOnce(SigningDecision) + Send + 'static,
    {
        self.install(request, Reply::Callback(Box::new(on_decision)))
    }

    pub fn state(&self) -> SigningState {
        match self.lock().active {
            Some(_) => SigningState::Presenting,
            None => SigningState::Idle,
        }
    }

    /// Id of the request currently presented
    pub fn active_id(&self) -> Option<Uuid> {
        self.lock().active.as_ref().map(|a| a.id)
    }

    /// Unmet precondition for the current request, if any
    pub fn warning(&self) -> Option<PreconditionWarning> {
        let inner = self.lock();
        let active = inner.active.as_ref()?;
        inner.preconditions.check(active.request.chain_id())
    }

    pub fn view(&self) -> SigningView {
        let inner = self.lock();
        match &inner.active {
            None => SigningView::Idle,
            Some(active) => match inner.preconditions.check(active.request.chain_id()) {
                Some(warning) => SigningView::Blocked {
                    request: active.request.clone(),
                    warning,
                },
                None => SigningView::Approval(active.request.clone()),
            },
        }
    }

    pub fn preconditions(&self) -> ExternalWalletState {
        self.lock().preconditions.clone()
    }

    /// Replace the external wallet state
    pub fn update_preconditions(&self, state: ExternalWalletState) {
        self.modify_preconditions(|current| *current = state);
    }

    /// Edit the external wallet state in place
    pub fn modify_preconditions<F>(&self, edit: F)
    where
        F: FnOnce(&mut ExternalWalletState),
    {
        let mut inner = self.lock();
        edit(&mut inner.preconditions);

        if let Some(active) = &inner.active {
            match inner.preconditions.check(active.request.chain_id()) {
                Some(w) => debug!(request = %active.id, warning = %w, "Signing still blocked"),
                None => debug!(request = %active.id, "Signing preconditions satisfied"),
            }
        }
    }

    /// Approve the presented request
    ///
    /// Returns false (no-op) when idle or while a precondition is unmet.
    pub fn approve(&self) -> bool {
        let active = {
            let mut inner = self.lock();
            let Some(active) = inner.active.as_ref() else {
                debug!("Approve ignored, no signing request presented");
                return false;
            };

            if let Some(warning) = inner.preconditions.check(active.request.chain_id()) {
                debug!(request = %active.id, warning = %warning, "Approve ignored, precondition unmet");
                return false;
            }

            match inner.active.take() {
                Some(active) => active,
                None => return false,
            }
        };

        info!(request = %active.id, kind = active.request.kind(), "Signing request approved");
        Self::finish(active.id, active.reply, SigningDecision::approve(active.request));
        true
    }

    /// Cancel the presented request. Returns false when idle.
    pub fn cancel(&self) -> bool {
        self.cancel_where(|_| true)
    }

    /// Cancel only if `id` is still the presented request
    pub fn cancel_request(&self, id: Uuid) -> bool {
        self.cancel_where(|active| active == id)
    }

    fn cancel_where<P>(&self, matches: P) -> bool
    where
        P: FnOnce(Uuid) -> bool,
    {
        let active = {
            let mut inner = self.lock();
            if inner.active.as_ref().is_some_and(|a| matches(a.id)) {
                inner.active.take()
            } else {
                None
            }
        };

        match active {
            Some(active) => {
                info!(request = %active.id, kind = active.request.kind(), "Signing request cancelled");
                Self::finish(active.id, active.reply, SigningDecision::Cancelled);
                true
            }
            None => {
                debug!("Cancel ignored, no matching signing request");
                false
            }
        }
    }

    fn finish(id: Uuid, reply: Reply, decision: SigningDecision) {
        if !reply.deliver(decision) {
            debug!(request = %id, "Signing caller went away before the decision");
        }
    }

    /// Auto-cancel request `id` if it is still presented after `timeout`
    pub fn cancel_after(&self, id: Uuid, timeout: Duration) -> JoinHandle<()> {
        let orchestrator = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if orchestrator.cancel_request(id) {
                warn!(request = %id, timeout_secs = timeout.as_secs(), "Signing request timed out");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::preconditions::ConnectionKind;
    use crate::signing::types::{MessageRequest, TransactionRequest, TransactionSpec};
    use crate::recovery::types::WalletAddress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(chain_id: u64) -> SigningRequest {
        SigningRequest::Message(MessageRequest {
            message: b"recover me".to_vec(),
            chain_id,
            options: None,
        })
    }

    fn transactions(chain_id: u64) -> SigningRequest {
        SigningRequest::Transactions(TransactionRequest {
            transactions: vec![TransactionSpec {
                to: WalletAddress::parse("0x3333333333333333333333333333333333333333").unwrap(),
                value: Some("1".to_string()),
                data: None,
                extra: Default::default(),
            }],
            chain_id,
            origin: Some("https://dapp.example".to_string()),
            access_key: Some("ak".to_string()),
        })
    }

    fn ready(chain_id: u64) -> SigningOrchestrator {
        let orchestrator = SigningOrchestrator::new();
        orchestrator.update_preconditions(
            ExternalWalletState::connected(ConnectionKind::Injected).with_deployed(chain_id),
        );
        orchestrator
    }

    #[tokio::test]
    async fn test_approve_message() {
        let orchestrator = ready(1);
        let pending = orchestrator.present(message(1)).unwrap();
        assert_eq!(orchestrator.state(), SigningState::Presenting);
        assert!(matches!(orchestrator.view(), SigningView::Approval(_)));

        assert!(orchestrator.approve());
        assert_eq!(orchestrator.state(), SigningState::Idle);

        match pending.await.unwrap() {
            SigningDecision::ApprovedMessage(m) => {
                assert_eq!(m.message, b"recover me");
                assert_eq!(m.chain_id, 1);
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_approve_transactions() {
        let orchestrator = ready(137);
        let pending = orchestrator.present(transactions(137)).unwrap();
        assert!(orchestrator.approve());

        let SigningDecision::ApprovedTransactions(tx) = pending.await.unwrap() else {
            panic!("expected transaction approval");
        };
        assert_eq!(tx.chain_id, 137);
        assert_eq!(tx.origin.as_deref(), Some("https://dapp.example"));
        assert_eq!(tx.access_key.as_deref(), Some("ak"));
        assert_eq!(tx.transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_delivers_no_details() {
        let orchestrator = ready(1);
        let pending = orchestrator.present(message(1)).unwrap();

        assert!(orchestrator.cancel());
        assert_eq!(pending.await.unwrap(), SigningDecision::Cancelled);
        assert_eq!(orchestrator.state(), SigningState::Idle);
    }

    #[test]
    fn test_decision_delivered_once() {
        let orchestrator = ready(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        orchestrator
            .present_with_callback(message(1), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(orchestrator.approve());
        assert!(!orchestrator.approve());
        assert!(!orchestrator.cancel());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_busy_while_presenting() {
        let orchestrator = ready(1);
        let _first = orchestrator.present(message(1)).unwrap();
        let first_id = orchestrator.active_id();

        assert!(matches!(orchestrator.present(message(1)), Err(Error::SigningBusy)));
        assert_eq!(orchestrator.active_id(), first_id);
    }

    #[test]
    fn test_abandoned_request_is_replaced() {
        let orchestrator = ready(1);
        drop(orchestrator.present(message(1)).unwrap());

        let second = orchestrator.present(transactions(1)).unwrap();
        assert_eq!(orchestrator.active_id(), Some(second.id()));
    }

    #[tokio::test]
    async fn test_not_deployed_blocks_approval() {
        let orchestrator = SigningOrchestrator::new();
        orchestrator.update_preconditions(ExternalWalletState::connected(ConnectionKind::Injected));
        let pending = orchestrator.present(message(10)).unwrap();

        assert_eq!(
            orchestrator.warning(),
            Some(PreconditionWarning::NotDeployed { chain_id: 10 })
        );
        assert!(matches!(orchestrator.view(), SigningView::Blocked { .. }));
        assert!(!orchestrator.approve());
        // Not auto-cancelled
        assert_eq!(orchestrator.state(), SigningState::Presenting);

        orchestrator.modify_preconditions(|s| {
            s.deployed_chains.insert(10);
        });
        assert!(orchestrator.warning().is_none());
        assert!(orchestrator.approve());
        assert!(pending.await.unwrap().is_approved());
    }

    #[tokio::test]
    async fn test_cancel_allowed_while_blocked() {
        let orchestrator = SigningOrchestrator::new();
        let pending = orchestrator.present(message(1)).unwrap();
        assert_eq!(orchestrator.warning(), Some(PreconditionWarning::NoProvider));

        assert!(orchestrator.cancel());
        assert!(pending.await.unwrap().is_cancelled());
    }

    #[test]
    fn test_wallet_connect_blocks() {
        let orchestrator = SigningOrchestrator::new();
        orchestrator.update_preconditions(
            ExternalWalletState::connected(ConnectionKind::WalletConnect).with_deployed(1),
        );
        let _pending = orchestrator.present(message(1)).unwrap();

        assert_eq!(orchestrator.warning(), Some(PreconditionWarning::IsWalletConnect));
        assert!(!orchestrator.approve());
    }

    #[test]
    fn test_idle_operations_are_noops() {
        let orchestrator = SigningOrchestrator::new();
        assert!(!orchestrator.approve());
        assert!(!orchestrator.cancel());
        assert_eq!(orchestrator.view(), SigningView::Idle);
        assert!(orchestrator.warning().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_timeout() {
        let orchestrator = ready(1);
        let pending = orchestrator.present(message(1)).unwrap();

        let timer = orchestrator.cancel_after(pending.id(), Duration::from_secs(30));
        assert_eq!(pending.await.unwrap(), SigningDecision::Cancelled);
        timer.await.unwrap();
        assert_eq!(orchestrator.state(), SigningState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_ignores_other_request() {
        let orchestrator = ready(1);
        let first = orchestrator.present(message(1)).unwrap();
        let timer = orchestrator.cancel_after(first.id(), Duration::from_secs(30));

        assert!(orchestrator.approve());
        let second = orchestrator.present(message(1)).unwrap();
        timer.await.unwrap();

        assert_eq!(orchestrator.active_id(), Some(second.id()));
        assert!(first.await.unwrap().is_approved());
    }
}
