//! Recovery session coordinator
//!
//! Wires the credential bridge, the recovery queue and the signing
//! orchestrator around one manager:
//!
//! ```text
//! Manager ──► CredentialBridge ──► wallet address ──► RecoveryQueue
//!                                        │
//!                                        └──► SigningOrchestrator ──► caller
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::recovery::credential::CredentialBridge;
use crate::recovery::manager::RecoveryManager;
use crate::recovery::queue::{RecoveryQueue, RefreshOutcome};
use crate::recovery::types::{ChainId, WalletAddress};
use crate::signing::orchestrator::{PendingSigning, SigningOrchestrator};
use crate::signing::preconditions::ConnectionKind;
use crate::signing::types::SigningRequest;

/// Timeouts applied at the session boundary; None waits forever
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionTimeouts {
    pub credential: Option<Duration>,
    pub fetch: Option<Duration>,
    pub approval: Option<Duration>,
}

impl From<&Config> for SessionTimeouts {
    fn from(config: &Config) -> Self {
        Self {
            credential: config.credential.timeout(),
            fetch: config.queue.fetch_timeout(),
            approval: config.signing.approval_timeout(),
        }
    }
}

/// One user's recovery session
pub struct RecoverySession {
    manager: Arc<dyn RecoveryManager>,
    bridge: CredentialBridge,
    queue: RecoveryQueue,
    signing: SigningOrchestrator,
    wallet: RwLock<Option<WalletAddress>>,
    approval_timeout: Option<Duration>,
}

impl RecoverySession {
    pub fn new(manager: Arc<dyn RecoveryManager>, timeouts: SessionTimeouts) -> Self {
        Self {
            bridge: CredentialBridge::with_timeout(timeouts.credential),
            queue: RecoveryQueue::new(manager.clone()).with_fetch_timeout(timeouts.fetch),
            signing: SigningOrchestrator::new(),
            wallet: RwLock::new(None),
            approval_timeout: timeouts.approval,
            manager,
        }
    }

    /// UI side of the credential hand-off
    pub fn credentials(&self) -> &CredentialBridge {
        &self.bridge
    }

    pub fn queue(&self) -> &RecoveryQueue {
        &self.queue
    }

    pub fn signing(&self) -> &SigningOrchestrator {
        &self.signing
    }

    pub async fn wallet(&self) -> Option<WalletAddress> {
        self.wallet.read().await.clone()
    }

    async fn require_wallet(&self) -> Result<WalletAddress> {
        self.wallet().await.ok_or(Error::WalletNotRecovered)
    }

    /// Let the manager pull the mnemonic and resolve the wallet
    ///
    /// The user supplies the mnemonic through `credentials()`. A rejected
    /// mnemonic ends this attempt; call `recover` again to retry.
    pub async fn recover(&self) -> Result<WalletAddress> {
        let registration = self.bridge.register_provider()?;
        let wallet = self.manager.request_credential(&registration).await;
        registration.dispose();
        let wallet = wallet?;

        let mut current = self.wallet.write().await;
        // Clears the queue when it held another wallet; pollers for that
        // wallet stop on their next tick
        self.queue.bind(&wallet).await;
        if current.as_ref() != Some(&wallet) {
            // Deployment knowledge belonged to the previous wallet
            self.signing
                .modify_preconditions(|state| state.deployed_chains.clear());
            info!(wallet = %wallet, "Wallet recovered");
        }
        *current = Some(wallet.clone());

        Ok(wallet)
    }

    /// Refresh the recovery queue for the recovered wallet
    pub async fn refresh(&self, chain_id: Option<ChainId>) -> Result<RefreshOutcome> {
        let wallet = self.require_wallet().await?;
        Ok(self.queue.refresh(&wallet, chain_id).await)
    }

    /// Refresh one chain; nothing happens without a chain id
    pub async fn refresh_by_chain(&self, chain_id: Option<ChainId>) -> Result<Option<RefreshOutcome>> {
        let wallet = self.require_wallet().await?;
        Ok(self.queue.refresh_by_chain(&wallet, chain_id).await)
    }

    /// Poll the queue for the recovered wallet until `cancel` fires
    pub async fn watch(
        &self,
        chain_id: Option<ChainId>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let wallet = self.require_wallet().await?;
        Ok(self.queue.spawn_poller(wallet, chain_id, interval, cancel))
    }

    /// Record the external wallet connection used for signing
    pub fn connect_external(&self, connection: Option<ConnectionKind>) {
        match connection {
            Some(kind) => info!(connection = ?kind, "External wallet connected"),
            None => info!("External wallet disconnected"),
        }
        self.signing
            .modify_preconditions(|state| state.connection = connection);
    }

    /// Ask the manager whether the wallet is deployed and record the answer
    pub async fn sync_deployment(&self, chain_id: ChainId) -> Result<bool> {
        let wallet = self.require_wallet().await?;
        let deployed = self.manager.is_deployed(&wallet, chain_id).await?;

        self.signing.modify_preconditions(|state| {
            if deployed {
                state.deployed_chains.insert(chain_id);
            } else {
                state.deployed_chains.remove(&chain_id);
            }
        });

        if !deployed {
            warn!(wallet = %wallet, chain_id, "Wallet not deployed on chain");
        }
        Ok(deployed)
    }

    /// Fail with `Error::Precondition` while a signing precondition is unmet on `chain_id`
    pub fn check_signable(&self, chain_id: ChainId) -> Result<()> {
        match self.signing.preconditions().check(chain_id) {
            Some(warning) => Err(warning.into()),
            None => Ok(()),
        }
    }

    /// Present a signing request after refreshing deployment state
    ///
    /// Applies the configured approval timeout, if any.
    pub async fn present_signing(&self, request: SigningRequest) -> Result<PendingSigning> {
        self.sync_deployment(request.chain_id()).await?;

        let pending = self.signing.present(request)?;
        if let Some(timeout) = self.approval_timeout {
            self.signing.cancel_after(pending.id(), timeout);
        }
        Ok(pending)
    }
}
