//! Wire and data model for the x402 challenge/verification protocol.
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::PAYMENT_REQUIRED_HEADER;

/// A named Solana ledger environment.
///
/// Known environments imply a default public RPC endpoint; a custom
/// environment must be paired with an explicit endpoint at configuration time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Network {
    Devnet,
    Testnet,
    Mainnet,
    Custom(String),
}

impl Network {
    pub fn custom(label: impl Into<String>) -> Self {
        Network::Custom(label.into())
    }

    /// The default public RPC endpoint for this network, if it has one.
    pub fn default_rpc(&self) -> Option<&'static str> {
        match self {
            Network::Devnet => Some(crate::constants::SOLANA_DEVNET_RPC),
            Network::Testnet => Some(crate::constants::SOLANA_TESTNET_RPC),
            Network::Mainnet => Some(crate::constants::SOLANA_MAINNET_RPC),
            Network::Custom(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Network::Devnet => "devnet",
            Network::Testnet => "testnet",
            Network::Mainnet => "mainnet-beta",
            Network::Custom(label) => label,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown network name: {0}")]
pub struct NetworkParseError(pub String);

impl FromStr for Network {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "devnet" => Ok(Network::Devnet),
            "testnet" => Ok(Network::Testnet),
            "mainnet" | "mainnet-beta" => Ok(Network::Mainnet),
            other => Err(NetworkParseError(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        // Echoed requirements for a custom environment must round-trip, so an
        // unrecognized name deserializes as that custom label.
        Ok(Network::from_str(&s).unwrap_or(Network::Custom(s)))
    }
}

/// How deeply the cluster has committed a transaction.
///
/// Variant order matters: `Ord` is used to compare against the configured
/// minimum finality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationLevel {
    Processed,
    Confirmed,
    Finalized,
}

/// A settlement method offered to the client, with any method-specific
/// parameters. The set is closed so verification can match exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum PaymentOption {
    /// The payer signs and submits a system-program transfer to the recipient.
    DirectTransfer,
    /// A relayer submits and pays fees on the payer's behalf; the credit is
    /// judged by the recipient's balance change rather than a specific
    /// transfer instruction.
    RelayedTransfer {
        #[serde(skip_serializing_if = "Option::is_none")]
        relayer: Option<String>,
    },
}

impl PaymentOption {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentOption::DirectTransfer => PaymentMethod::DirectTransfer,
            PaymentOption::RelayedTransfer { .. } => PaymentMethod::RelayedTransfer,
        }
    }
}

/// Bare identifier of a settlement method, as submitted in a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    DirectTransfer,
    RelayedTransfer,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::DirectTransfer => f.write_str("direct-transfer"),
            PaymentMethod::RelayedTransfer => f.write_str("relayed-transfer"),
        }
    }
}

/// What the client must pay to satisfy a challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub version: u8,
    pub network: Network,
    /// Base58 recipient account.
    pub recipient: String,
    /// Amount in lamports.
    pub amount: u64,
    /// Single-use unguessable token binding this challenge to one acceptance.
    pub nonce: String,
    /// Unix seconds.
    pub issued_at: u64,
    /// Unix seconds; strictly greater than `issued_at`.
    pub expires_at: u64,
    pub options: Vec<PaymentOption>,
}

impl PaymentRequirements {
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires_at
    }

    /// Whether the given settlement method is among the offered options.
    pub fn offers(&self, method: PaymentMethod) -> bool {
        self.options.iter().any(|o| o.method() == method)
    }
}

/// Client-submitted proof of settlement: the chosen method and the ledger
/// transaction signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub method: PaymentMethod,
    pub transaction_reference: String,
}

/// Headers and body for an HTTP 402 response. A pure projection of
/// `PaymentRequirements`; the caller sets the status code and writes both
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X402Response {
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl X402Response {
    /// Decodes the requirements back out of the `X-Payment-Required` header.
    pub fn header_requirements(&self) -> Option<PaymentRequirements> {
        use base64::Engine;
        let raw = self.headers.get(PAYMENT_REQUIRED_HEADER)?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(raw).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Why a verification attempt was rejected.
///
/// Rejections are expected, frequent outcomes; they are returned as data in
/// the verdict, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Expired,
    AlreadyConsumed,
    TransactionNotFound,
    TransactionFailed,
    AmountMismatch,
    RecipientMismatch,
    NotYetFinal,
    /// The ledger gateway exhausted its retries; the whole verification may
    /// be retried later, unlike a definitive rejection.
    GatewayUnavailable,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::Expired => "expired",
            RejectReason::AlreadyConsumed => "already_consumed",
            RejectReason::TransactionNotFound => "transaction_not_found",
            RejectReason::TransactionFailed => "transaction_failed",
            RejectReason::AmountMismatch => "amount_mismatch",
            RejectReason::RecipientMismatch => "recipient_mismatch",
            RejectReason::NotYetFinal => "not_yet_final",
            RejectReason::GatewayUnavailable => "gateway_unavailable",
        };
        f.write_str(s)
    }
}

/// Current wall-clock time in unix seconds.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// The verdict of one verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    /// Nonce of the requirements this verdict is about.
    pub nonce: String,
    /// The transaction signature consulted, when one was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_reference: Option<String>,
    /// Block time of the settling transaction, on acceptance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<i64>,
}

impl PaymentVerification {
    pub fn accepted(nonce: &str, reference: &str, confirmed_at: Option<i64>) -> Self {
        Self {
            accepted: true,
            reason: None,
            nonce: nonce.to_string(),
            transaction_reference: Some(reference.to_string()),
            confirmed_at,
        }
    }

    pub fn rejected(nonce: &str, reason: RejectReason, reference: Option<&str>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
            nonce: nonce.to_string(),
            transaction_reference: reference.map(str::to_string),
            confirmed_at: None,
        }
    }
}
