//! Signing approval module
//!
//! Gates message and transaction signing requests coming from an external
//! wallet connection behind an explicit user decision.

pub mod orchestrator;
pub mod preconditions;
pub mod types;

pub use orchestrator::{PendingSigning, SigningOrchestrator, SigningState, SigningView};
pub use preconditions::{ConnectionKind, ExternalWalletState, PreconditionWarning};
pub use types::{
    MessageRequest, SignerOptions, SigningDecision, SigningRequest, TransactionRequest,
    TransactionSpec,
};
