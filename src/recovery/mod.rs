//! Wallet recovery module
//!
//! Provides the recovery side of a session:
//! - Credential hand-off between UI and manager (single pending request)
//! - Recovery queue reconciliation across chains
//! - Manager contract and a file-backed implementation
//!
//! # Architecture
//!
//! ```text
//! CredentialBridge → RecoveryManager → RecoveryQueue
//!        ↑                                  ↑
//!   ResultFuture                     merge_payloads
//! ```
//!
//! # Security
//!
//! The mnemonic never leaves the bridge except through the manager's
//! `respond` callback, and is redacted from all `Debug`/`Display` output.

pub mod credential;
pub mod manager;
pub mod queue;
pub mod result_future;
pub mod types;

pub use credential::{CredentialBridge, ProviderRegistration, RegistrationStatus};
pub use manager::{LocalManager, ManagedWallet, ManagerState, RecoveryManager};
pub use queue::{merge_payloads, QueueSnapshot, RecoveryQueue, RefreshOutcome};
pub use result_future::{Resolver, ResultFuture};
pub use types::{ChainId, Mnemonic, RecoveryPayload, WalletAddress};
