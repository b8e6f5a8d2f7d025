//! Credential request bridge
//!
//! Decouples the moment the manager needs the recovery mnemonic from the
//! moment the user types it in. The bridge holds at most one pending
//! request; a newer `await_credential` supersedes the older one, which
//! then resolves with `CredentialRequestSuperseded` instead of hanging.
//!
//! ```text
//! Manager ──provide(respond)──► ProviderRegistration ──await──► CredentialBridge
//!                                                                    ▲
//!                                              UI ──submit_credential┘
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::result_future::{Resolver, ResultFuture};
use super::types::Mnemonic;

/// Armed request: id plus the resolver waiting for the credential
struct PendingRequest {
    id: u64,
    resolver: Resolver<Mnemonic>,
}

#[derive(Default)]
struct BridgeState {
    pending: Option<PendingRequest>,
    next_request_id: u64,
    /// Id of the live provider registration, if any
    provider: Option<u64>,
    next_registration_id: u64,
}

/// Single-slot credential hand-off between UI and manager
#[derive(Clone)]
pub struct CredentialBridge {
    state: Arc<Mutex<BridgeState>>,
    /// Id of the most recently armed request
    armed: Arc<watch::Sender<u64>>,
    /// Applied by `ProviderRegistration::provide`; None waits forever
    timeout: Option<Duration>,
}

impl Default for CredentialBridge {
    fn default() -> Self {
        Self::with_timeout(None)
    }
}

impl CredentialBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridge whose provider waits at most `timeout` for the user
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        let (armed, _) = watch::channel(0);
        Self {
            state: Arc::default(),
            armed: Arc::new(armed),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        // Nothing in the state can be left half-updated by a panic
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn arm(&self) -> (u64, ResultFuture<Mnemonic>) {
        let (future, resolver) = ResultFuture::new();
        let mut state = self.lock();

        state.next_request_id += 1;
        let id = state.next_request_id;

        if let Some(previous) = state.pending.replace(PendingRequest { id, resolver }) {
            debug!(
                superseded = previous.id,
                request = id,
                "Credential request superseded"
            );
            previous.resolver.reject(Error::CredentialRequestSuperseded);
        }
        drop(state);

        self.armed.send_replace(id);
        (id, future)
    }

    /// Wait for the user to submit a credential
    ///
    /// Replaces any request that is still pending.
    pub fn await_credential(&self) -> ResultFuture<Mnemonic> {
        self.arm().1
    }

    /// Like `await_credential`, but gives up after `timeout`
    pub async fn await_credential_timeout(&self, timeout: Duration) -> Result<Mnemonic> {
        let (id, future) = self.arm();

        match tokio::time::timeout(timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                let mut state = self.lock();
                if state.pending.as_ref().is_some_and(|p| p.id == id) {
                    state.pending = None;
                }
                warn!(request = id, "Credential request timed out");
                Err(Error::TimedOut(timeout.as_millis() as u64))
            }
        }
    }

    /// Hand a credential to the pending request
    ///
    /// Returns false (and drops the value) when nothing is waiting.
    pub fn submit_credential(&self, credential: Mnemonic) -> bool {
        let pending = self.lock().pending.take();

        match pending {
            Some(request) => {
                let delivered = request.resolver.resolve(credential);
                if delivered {
                    debug!(request = request.id, "Credential submitted");
                } else {
                    debug!(request = request.id, "Credential request was abandoned");
                }
                delivered
            }
            None => {
                debug!("Credential submitted with no pending request, ignoring");
                false
            }
        }
    }

    /// True while a request is waiting for the user
    pub fn is_pending(&self) -> bool {
        self.lock()
            .pending
            .as_ref()
            .is_some_and(|p| !p.resolver.is_abandoned())
    }

    /// Resolve once a request is waiting for the user
    pub async fn pending(&self) {
        let mut armed = self.armed.subscribe();
        while !self.is_pending() {
            // The sender lives as long as `self`
            if armed.changed().await.is_err() {
                return;
            }
        }
    }

    /// Register the UI as credential provider
    ///
    /// Only one registration may be live at a time; dispose (or drop) the
    /// returned handle before registering again.
    pub fn register_provider(&self) -> Result<ProviderRegistration> {
        let mut state = self.lock();

        if state.provider.is_some() {
            return Err(Error::ProviderAlreadyRegistered);
        }

        state.next_registration_id += 1;
        let id = state.next_registration_id;
        state.provider = Some(id);

        info!(registration = id, "Credential provider registered");

        Ok(ProviderRegistration {
            id,
            bridge: self.clone(),
            status: Mutex::new(RegistrationStatus::Active),
        })
    }

    /// True while a provider registration is live
    pub fn has_provider(&self) -> bool {
        self.lock().provider.is_some()
    }

    fn release(&self, registration: u64) {
        let mut state = self.lock();

        if state.provider != Some(registration) {
            return;
        }
        state.provider = None;

        if let Some(request) = state.pending.take() {
            request.resolver.reject(Error::ProviderDisposed);
        }
    }
}

/// Lifecycle of a provider registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
    Active,
    /// The manager rejected the credential; terminal
    Failed(String),
    Disposed,
}

/// Live provider registration; disposing it unregisters the provider
///
/// Dropping the handle disposes it.
pub struct ProviderRegistration {
    id: u64,
    bridge: CredentialBridge,
    status: Mutex<RegistrationStatus>,
}

impl ProviderRegistration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_usable(&self) -> Result<()> {
        match self.status() {
            RegistrationStatus::Active => Ok(()),
            RegistrationStatus::Failed(reason) => Err(Error::InvalidCredential(reason)),
            RegistrationStatus::Disposed => Err(Error::ProviderDisposed),
        }
    }

    /// Manager entrypoint: wait for the user's credential and pass it to `respond`
    ///
    /// If `respond` fails the registration is terminally failed and
    /// released; the user has to register a new provider to retry.
    pub async fn provide<F, Fut, T>(&self, respond: F) -> Result<T>
    where
        F: FnOnce(Mnemonic) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check_usable()?;

        debug!(registration = self.id, "Manager requested recovery credential");

        let credential = match self.bridge.timeout {
            Some(timeout) => self.bridge.await_credential_timeout(timeout).await?,
            None => self.bridge.await_credential().await?,
        };

        // Disposed while the user was typing
        self.check_usable()?;

        match respond(credential).await {
            Ok(value) => {
                info!(registration = self.id, "Recovery credential accepted");
                Ok(value)
            }
            Err(e) => {
                let reason = match e {
                    Error::InvalidCredential(reason) => reason,
                    other => other.to_string(),
                };
                warn!(
                    registration = self.id,
                    reason = %reason,
                    "Recovery credential rejected, disposing provider"
                );

                *self.status.lock().unwrap_or_else(|e| e.into_inner()) =
                    RegistrationStatus::Failed(reason.clone());
                self.bridge.release(self.id);

                Err(Error::InvalidCredential(reason))
            }
        }
    }

    /// Unregister the provider. Safe to call more than once.
    pub fn dispose(&self) {
        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            if *status == RegistrationStatus::Active {
                *status = RegistrationStatus::Disposed;
                debug!(registration = self.id, "Credential provider disposed");
            }
        }
        self.bridge.release(self.id);
    }
}

impl Drop for ProviderRegistration {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn phrase() -> Mnemonic {
        Mnemonic::parse(
            "legal winner thank year wave sausage worth useful legal winner thank yellow",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_resolves_pending() {
        let bridge = CredentialBridge::new();
        let future = bridge.await_credential();
        assert!(bridge.is_pending());

        assert!(bridge.submit_credential(phrase()));
        assert_eq!(future.await.unwrap(), phrase());
        assert!(!bridge.is_pending());
    }

    #[test]
    fn test_submit_without_request_is_noop() {
        let bridge = CredentialBridge::new();
        assert!(!bridge.submit_credential(phrase()));
        assert!(!bridge.is_pending());
    }

    #[tokio::test]
    async fn test_second_await_supersedes_first() {
        let bridge = CredentialBridge::new();
        let first = bridge.await_credential();
        let second = bridge.await_credential();

        assert!(bridge.submit_credential(phrase()));
        // Only one slot: the second submit finds nothing
        assert!(!bridge.submit_credential(phrase()));

        assert!(matches!(first.await, Err(Error::CredentialRequestSuperseded)));
        assert_eq!(second.await.unwrap(), phrase());
    }

    #[test]
    fn test_dropped_future_is_not_pending() {
        let bridge = CredentialBridge::new();
        drop(bridge.await_credential());
        assert!(!bridge.is_pending());
        assert!(!bridge.submit_credential(phrase()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_timeout_clears_slot() {
        let bridge = CredentialBridge::new();
        let result = bridge
            .await_credential_timeout(Duration::from_secs(30))
            .await;

        assert!(matches!(result, Err(Error::TimedOut(30_000))));
        assert!(!bridge.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_wakes_when_request_armed() {
        let bridge = CredentialBridge::new();

        let ui = bridge.clone();
        let waiter = tokio::spawn(async move { ui.pending().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        let future = bridge.await_credential();
        waiter.await.unwrap();
        assert!(bridge.submit_credential(phrase()));
        assert_eq!(future.await.unwrap(), phrase());
    }

    #[tokio::test]
    async fn test_pending_returns_at_once_when_armed() {
        let bridge = CredentialBridge::new();
        let _future = bridge.await_credential();
        bridge.pending().await;
        assert!(bridge.is_pending());
    }

    #[tokio::test]
    async fn test_provider_forwards_credential() {
        let bridge = CredentialBridge::new();
        let registration = bridge.register_provider().unwrap();

        let ui = bridge.clone();
        tokio::spawn(async move {
            ui.pending().await;
            ui.submit_credential(phrase());
        });

        let words = registration
            .provide(|credential| async move { Ok(credential.word_count()) })
            .await
            .unwrap();

        assert_eq!(words, 12);
        assert_eq!(registration.status(), RegistrationStatus::Active);
    }

    #[tokio::test]
    async fn test_rejected_credential_is_terminal() {
        let bridge = CredentialBridge::new();
        let registration = bridge.register_provider().unwrap();

        let ui = bridge.clone();
        tokio::spawn(async move {
            ui.pending().await;
            ui.submit_credential(phrase());
        });

        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<()> = registration
            .provide(move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidCredential("unknown recovery signer".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidCredential(ref r)) if r == "unknown recovery signer"));
        assert!(matches!(registration.status(), RegistrationStatus::Failed(_)));
        assert!(!bridge.has_provider());

        // Retrying on the failed registration never reaches respond
        let retry: Result<()> = registration
            .provide(move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(retry, Err(Error::InvalidCredential(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // A fresh registration is allowed
        assert!(bridge.register_provider().is_ok());
    }

    #[test]
    fn test_single_live_registration() {
        let bridge = CredentialBridge::new();
        let first = bridge.register_provider().unwrap();
        assert!(matches!(
            bridge.register_provider(),
            Err(Error::ProviderAlreadyRegistered)
        ));

        first.dispose();
        first.dispose();
        assert_eq!(first.status(), RegistrationStatus::Disposed);

        let second = bridge.register_provider().unwrap();
        drop(second);
        assert!(!bridge.has_provider());
    }

    #[tokio::test]
    async fn test_dispose_rejects_pending_request() {
        let bridge = CredentialBridge::new();
        let registration = bridge.register_provider().unwrap();
        let future = bridge.await_credential();

        registration.dispose();

        assert!(matches!(future.await, Err(Error::ProviderDisposed)));
        let result: Result<()> = registration.provide(|_| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::ProviderDisposed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout() {
        let bridge = CredentialBridge::with_timeout(Some(Duration::from_secs(5)));
        let registration = bridge.register_provider().unwrap();

        let result: Result<()> = registration.provide(|_| async { Ok(()) }).await;

        assert!(matches!(result, Err(Error::TimedOut(5_000))));
        // Timing out is not a credential rejection
        assert_eq!(registration.status(), RegistrationStatus::Active);
    }
}
