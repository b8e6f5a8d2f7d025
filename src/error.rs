//! Error types for the recovery coordinator

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the recovery coordinator
#[derive(Error, Debug)]
pub enum Error {
    // Credential errors
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("Recovery credential rejected: {0}")]
    InvalidCredential(String),

    #[error("Credential request superseded by a newer request")]
    CredentialRequestSuperseded,

    #[error("Request abandoned before it was completed")]
    RequestAbandoned,

    #[error("A credential provider is already registered")]
    ProviderAlreadyRegistered,

    #[error("Credential provider has been disposed")]
    ProviderDisposed,

    // Queue errors
    #[error("Failed to fetch recovery queue: {0}")]
    Fetch(String),

    #[error("Discarded stale response (token {token}, latest {latest})")]
    StaleResponse { token: u64, latest: u64 },

    // Signing errors
    #[error("Signing blocked: {0}")]
    Precondition(String),

    #[error("A signing request is already being presented")]
    SigningBusy,

    // Session errors
    #[error("Timed out after {0}ms")]
    TimedOut(u64),

    #[error("No wallet has been recovered yet")]
    WalletNotRecovered,

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Fetch(_) | Error::TimedOut(_))
    }

    /// Check if this error ends the current credential registration
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::InvalidCredential(_) | Error::ProviderDisposed)
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
