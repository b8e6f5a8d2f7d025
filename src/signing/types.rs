//! Signing request and decision types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::recovery::types::{ChainId, WalletAddress};

/// Hex (`0x...`) encoding for raw message bytes
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(digits).map_err(serde::de::Error::custom)
    }
}

/// Options forwarded to the signer with a message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerOptions {
    /// Wrap the signature for counterfactual (not yet deployed) wallets
    #[serde(default)]
    pub eip6492: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request to sign an arbitrary message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(with = "hex_bytes")]
    pub message: Vec<u8>,
    pub chain_id: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SignerOptions>,
}

impl MessageRequest {
    /// Message as UTF-8 when it is printable text
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.message).ok()
    }
}

/// One transaction in a transaction set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSpec {
    pub to: WalletAddress,
    /// Wei amount as a decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Calldata as 0x-prefixed hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request to send one or more transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub transactions: Vec<TransactionSpec>,
    pub chain_id: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
}

/// Pending signing request forwarded by the external connection layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SigningRequest {
    Message(MessageRequest),
    Transactions(TransactionRequest),
}

impl SigningRequest {
    pub fn chain_id(&self) -> ChainId {
        match self {
            SigningRequest::Message(m) => m.chain_id,
            SigningRequest::Transactions(t) => t.chain_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SigningRequest::Message(_) => "message",
            SigningRequest::Transactions(_) => "transactions",
        }
    }
}

/// Decision delivered to the caller that forwarded the request
///
/// Approvals carry the details that were on screen; a cancellation
/// carries nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SigningDecision {
    ApprovedMessage(MessageRequest),
    ApprovedTransactions(TransactionRequest),
    Cancelled,
}

impl SigningDecision {
    /// Approval for the given request, echoing its details
    pub fn approve(request: SigningRequest) -> Self {
        match request {
            SigningRequest::Message(m) => SigningDecision::ApprovedMessage(m),
            SigningRequest::Transactions(t) => SigningDecision::ApprovedTransactions(t),
        }
    }

    pub fn is_approved(&self) -> bool {
        !self.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SigningDecision::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_request() {
        let json = r#"{
            "kind": "message",
            "message": "0x68656c6c6f",
            "chainId": 1,
            "options": {"eip6492": true, "app": "dapp.example"}
        }"#;

        let request: SigningRequest = serde_json::from_str(json).unwrap();
        let SigningRequest::Message(message) = &request else {
            panic!("expected message request");
        };
        assert_eq!(message.as_text(), Some("hello"));
        let options = message.options.as_ref().unwrap();
        assert!(options.eip6492);
        assert_eq!(options.extra["app"], "dapp.example");
        assert_eq!(request.chain_id(), 1);
    }

    #[test]
    fn test_parse_transaction_request() {
        let json = r#"{
            "kind": "transactions",
            "chainId": 137,
            "origin": "https://dapp.example",
            "accessKey": "key-1",
            "transactions": [
                {"to": "0x1111111111111111111111111111111111111111", "value": "1000", "gasLimit": "21000"}
            ]
        }"#;

        let request: SigningRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.kind(), "transactions");
        let SigningRequest::Transactions(tx) = request else {
            panic!("expected transaction request");
        };
        assert_eq!(tx.origin.as_deref(), Some("https://dapp.example"));
        assert_eq!(tx.transactions[0].value.as_deref(), Some("1000"));
        assert_eq!(tx.transactions[0].extra["gasLimit"], "21000");
    }

    #[test]
    fn test_decision_shapes() {
        let request = SigningRequest::Message(MessageRequest {
            message: b"hi".to_vec(),
            chain_id: 10,
            options: None,
        });

        let approved = SigningDecision::approve(request);
        assert!(approved.is_approved());
        let json = serde_json::to_value(&approved).unwrap();
        assert_eq!(json["decision"], "approved_message");
        assert_eq!(json["message"], "0x6869");
        assert_eq!(json["chainId"], 10);

        let cancelled = serde_json::to_value(SigningDecision::Cancelled).unwrap();
        assert_eq!(cancelled, serde_json::json!({"decision": "cancelled"}));
    }
}
