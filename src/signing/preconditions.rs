//! Preconditions gating a signing request
//!
//! Checked in a fixed order; the first unmet one is what the user sees.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::recovery::types::ChainId;

/// How the external wallet is connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Browser-injected provider, can sign for the recovering wallet
    Injected,
    /// WalletConnect session; cannot co-sign recovery actions
    WalletConnect,
}

/// What the orchestrator knows about the external wallet and deployments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalWalletState {
    pub connection: Option<ConnectionKind>,
    /// Chains the recovering wallet is deployed on
    pub deployed_chains: BTreeSet<ChainId>,
}

impl ExternalWalletState {
    pub fn connected(kind: ConnectionKind) -> Self {
        Self {
            connection: Some(kind),
            deployed_chains: BTreeSet::new(),
        }
    }

    pub fn with_deployed(mut self, chain_id: ChainId) -> Self {
        self.deployed_chains.insert(chain_id);
        self
    }

    /// First unmet precondition for signing on `chain_id`
    pub fn check(&self, chain_id: ChainId) -> Option<PreconditionWarning> {
        match self.connection {
            None => Some(PreconditionWarning::NoProvider),
            Some(ConnectionKind::WalletConnect) => Some(PreconditionWarning::IsWalletConnect),
            Some(ConnectionKind::Injected) if !self.deployed_chains.contains(&chain_id) => {
                Some(PreconditionWarning::NotDeployed { chain_id })
            }
            Some(ConnectionKind::Injected) => None,
        }
    }
}

/// Unmet signing precondition, shown instead of the approval prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "camelCase")]
pub enum PreconditionWarning {
    NoProvider,
    IsWalletConnect,
    NotDeployed { chain_id: ChainId },
}

impl fmt::Display for PreconditionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreconditionWarning::NoProvider => {
                write!(f, "No external wallet connected. Connect a wallet to sign.")
            }
            PreconditionWarning::IsWalletConnect => write!(
                f,
                "The connected wallet uses WalletConnect, which cannot sign this request. Connect an injected wallet instead."
            ),
            PreconditionWarning::NotDeployed { chain_id } => write!(
                f,
                "The recovered wallet is not deployed on chain {}. Deploy it before signing.",
                chain_id
            ),
        }
    }
}

impl From<PreconditionWarning> for Error {
    fn from(warning: PreconditionWarning) -> Self {
        Error::Precondition(warning.to_string())
    }
}
