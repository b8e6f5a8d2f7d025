//! Wallet-management runtime ("manager") contract
//!
//! The manager performs the actual on-chain recovery. The coordinator only
//! needs three things from it: the queued payloads for a wallet, a way to
//! pull the recovery credential, and whether the wallet is deployed on a
//! chain.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::credential::ProviderRegistration;
use super::types::{ChainId, Mnemonic, RecoveryPayload, WalletAddress};

/// Operations the coordinator consumes from the manager
#[async_trait]
pub trait RecoveryManager: Send + Sync {
    /// Complete snapshot of queued payloads, filtered to one chain when given
    async fn fetch_queued_payloads(
        &self,
        wallet: &WalletAddress,
        chain_id: Option<ChainId>,
    ) -> Result<Vec<RecoveryPayload>>;

    /// Pull the recovery credential through `registration` and resolve the wallet
    ///
    /// Implementations call `registration.provide(respond)`; `respond`
    /// failing marks the credential as rejected.
    async fn request_credential(&self, registration: &ProviderRegistration)
        -> Result<WalletAddress>;

    /// Whether the wallet contract is deployed on `chain_id`
    async fn is_deployed(&self, wallet: &WalletAddress, chain_id: ChainId) -> Result<bool>;
}

/// Manager state file (`manager_state.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerState {
    #[serde(default)]
    pub wallets: Vec<ManagedWallet>,
}

/// One recoverable wallet known to the local manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedWallet {
    /// Hex SHA-256 of the normalized mnemonic
    pub mnemonic_sha256: String,
    pub address: WalletAddress,
    #[serde(default)]
    pub deployed_chains: Vec<ChainId>,
    #[serde(default)]
    pub payloads: Vec<RecoveryPayload>,
}

/// File-backed manager
///
/// Re-reads the state file on every call, so each fetch is a fresh
/// snapshot of whatever is on disk.
#[derive(Debug, Clone)]
pub struct LocalManager {
    state_path: PathBuf,
}

impl LocalManager {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }
}

async fn load_state(path: &Path) -> Result<ManagerState> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Io(format!("Failed to read {}: {}", path.display(), e)))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Serialization(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Resolve the wallet whose stored fingerprint matches `credential`
async fn match_credential(path: PathBuf, credential: Mnemonic) -> Result<WalletAddress> {
    let state = load_state(&path).await?;
    let fingerprint = credential.fingerprint();

    let wallet = state
        .wallets
        .into_iter()
        .find(|w| w.mnemonic_sha256.eq_ignore_ascii_case(&fingerprint))
        .ok_or_else(|| {
            Error::InvalidCredential("no recoverable wallet matches this mnemonic".to_string())
        })?;

    info!(wallet = %wallet.address, "Recovery signer matched wallet");
    Ok(wallet.address)
}

#[async_trait]
impl RecoveryManager for LocalManager {
    async fn fetch_queued_payloads(
        &self,
        wallet: &WalletAddress,
        chain_id: Option<ChainId>,
    ) -> Result<Vec<RecoveryPayload>> {
        let state = load_state(&self.state_path)
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;

        let payloads: Vec<RecoveryPayload> = state
            .wallets
            .into_iter()
            .find(|w| &w.address == wallet)
            .map(|w| w.payloads)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| chain_id.map_or(true, |c| p.chain_id == c))
            .collect();

        debug!(
            wallet = %wallet,
            chain_id = ?chain_id,
            count = payloads.len(),
            "Fetched queued payloads"
        );

        Ok(payloads)
    }

    async fn request_credential(
        &self,
        registration: &ProviderRegistration,
    ) -> Result<WalletAddress> {
        let path = self.state_path.clone();

        registration
            .provide(move |credential| match_credential(path, credential))
            .await
    }

    async fn is_deployed(&self, wallet: &WalletAddress, chain_id: ChainId) -> Result<bool> {
        let state = load_state(&self.state_path).await?;

        Ok(state
            .wallets
            .iter()
            .any(|w| &w.address == wallet && w.deployed_chains.contains(&chain_id)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted manager for unit tests

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// One scripted fetch response
    pub struct ScriptedFetch {
        pub delay: Duration,
        pub result: std::result::Result<Vec<RecoveryPayload>, String>,
    }

    impl ScriptedFetch {
        pub fn ok(payloads: Vec<RecoveryPayload>) -> Self {
            Self {
                delay: Duration::ZERO,
                result: Ok(payloads),
            }
        }

        pub fn err(message: &str) -> Self {
            Self {
                delay: Duration::ZERO,
                result: Err(message.to_string()),
            }
        }

        pub fn after(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    /// Manager whose fetches replay a script in call order
    ///
    /// Once the script runs out, fetches return the standing payloads of
    /// the requested wallet.
    pub struct ScriptedManager {
        pub fetches: Mutex<VecDeque<ScriptedFetch>>,
        pub standing: Mutex<HashMap<WalletAddress, Vec<RecoveryPayload>>>,
        pub fingerprint: String,
        /// Wallet the next accepted credential resolves to
        pub address: Mutex<WalletAddress>,
        pub deployed_chains: Mutex<Vec<ChainId>>,
        pub fetch_calls: Mutex<Vec<(WalletAddress, Option<ChainId>)>>,
    }

    impl ScriptedManager {
        pub fn new(fingerprint: String, address: WalletAddress) -> Self {
            Self {
                fetches: Mutex::new(VecDeque::new()),
                standing: Mutex::new(HashMap::new()),
                fingerprint,
                address: Mutex::new(address),
                deployed_chains: Mutex::new(Vec::new()),
                fetch_calls: Mutex::new(Vec::new()),
            }
        }

        pub fn push(&self, fetch: ScriptedFetch) {
            self.fetches.lock().unwrap().push_back(fetch);
        }

        pub fn set_standing(&self, wallet: &WalletAddress, payloads: Vec<RecoveryPayload>) {
            self.standing.lock().unwrap().insert(wallet.clone(), payloads);
        }
    }

    #[async_trait]
    impl RecoveryManager for ScriptedManager {
        async fn fetch_queued_payloads(
            &self,
            wallet: &WalletAddress,
            chain_id: Option<ChainId>,
        ) -> Result<Vec<RecoveryPayload>> {
            self.fetch_calls
                .lock()
                .unwrap()
                .push((wallet.clone(), chain_id));

            let next = self.fetches.lock().unwrap().pop_front();
            let Some(fetch) = next else {
                let standing = self.standing.lock().unwrap();
                return Ok(standing.get(wallet).cloned().unwrap_or_default());
            };

            if !fetch.delay.is_zero() {
                tokio::time::sleep(fetch.delay).await;
            }
            fetch.result.map_err(Error::Fetch)
        }

        async fn request_credential(
            &self,
            registration: &ProviderRegistration,
        ) -> Result<WalletAddress> {
            let expected = self.fingerprint.clone();
            let address = self.address.lock().unwrap().clone();

            registration
                .provide(move |credential| async move {
                    if credential.fingerprint() == expected {
                        Ok(address)
                    } else {
                        Err(Error::InvalidCredential("wrong mnemonic".to_string()))
                    }
                })
                .await
        }

        async fn is_deployed(&self, _wallet: &WalletAddress, chain_id: ChainId) -> Result<bool> {
            Ok(self.deployed_chains.lock().unwrap().contains(&chain_id))
        }
    }
}
