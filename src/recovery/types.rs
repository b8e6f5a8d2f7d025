//! Core types for wallet recovery
//!
//! Defines the recovery credential, wallet addresses and queued payloads.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// EVM-style chain identifier
pub type ChainId = u64;

/// Word counts accepted for a recovery phrase
const VALID_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

static WORD_PATTERN: OnceLock<Regex> = OnceLock::new();

fn word_pattern() -> &'static Regex {
    WORD_PATTERN.get_or_init(|| Regex::new(r"^[a-z]+$").expect("Invalid mnemonic word regex"))
}

/// Recovery credential (mnemonic phrase held by the recovery signer)
///
/// Never printed: `Debug` and `Display` are redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Mnemonic(String);

impl Mnemonic {
    /// Parse and normalize a phrase
    ///
    /// Trims, lowercases and collapses whitespace, then checks the word
    /// count and that every word is plain ASCII letters.
    pub fn parse(input: &str) -> Result<Self> {
        let words: Vec<String> = input
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        if !VALID_WORD_COUNTS.contains(&words.len()) {
            return Err(Error::InvalidMnemonic(format!(
                "expected 12, 15, 18, 21 or 24 words, got {}",
                words.len()
            )));
        }

        if let Some(pos) = words.iter().position(|w| !word_pattern().is_match(w)) {
            return Err(Error::InvalidMnemonic(format!(
                "word {} contains invalid characters",
                pos + 1
            )));
        }

        Ok(Self(words.join(" ")))
    }

    /// The normalized phrase
    pub fn phrase(&self) -> &str {
        &self.0
    }

    /// Number of words in the phrase
    pub fn word_count(&self) -> usize {
        self.0.split(' ').count()
    }

    /// Hex SHA-256 digest of the normalized phrase
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mnemonic(<{} words redacted>)", self.word_count())
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

/// Address of the wallet being recovered
///
/// Always lowercase; deserializing goes through `parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Parse a 0x-prefixed, 20-byte hex address (case-insensitive)
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| Error::InvalidAddress(format!("must start with 0x: {}", trimmed)))?;

        let bytes = hex::decode(hex_part)
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", trimmed, e)))?;
        if bytes.len() != 20 {
            return Err(Error::InvalidAddress(format!(
                "must be 20 bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A queued, not-yet-executed recovery operation
///
/// Only `id` and `chain_id` are interpreted; everything else the manager
/// sends is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPayload {
    pub id: String,
    pub chain_id: ChainId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RecoveryPayload {
    pub fn new(id: impl Into<String>, chain_id: ChainId) -> Self {
        Self {
            id: id.into(),
            chain_id,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}
