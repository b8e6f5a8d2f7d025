//! Wallet Recovery Library
//!
//! Coordinates a wallet recovery session: hands the recovery mnemonic to
//! the wallet manager, keeps the queue of pending recovery payloads in
//! sync, and gates signing requests behind user approval.

pub mod cli;
pub mod config;
pub mod error;
pub mod recovery;
pub mod session;
pub mod signing;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use session::{RecoverySession, SessionTimeouts};
