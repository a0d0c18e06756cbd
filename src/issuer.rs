//! Challenge issuance: build the `PaymentRequirements` behind an HTTP 402.
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::constants::{
    LAMPORTS_PER_SOL, PAYMENT_OPTIONS_HEADER, PAYMENT_REQUIRED_HEADER, X402_VERSION,
};
use crate::types::{PaymentRequirements, X402Response, unix_now};

/// Recoverable issuance-input problems, reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("payment amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("amount {0} does not convert to a whole number of lamports")]
    SubLamportAmount(Decimal),
    #[error("amount {0} overflows the lamport range")]
    AmountOverflow(Decimal),
    #[error("failed to serialize requirements: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Converts a decimal SOL amount to lamports, rejecting conversions that
/// produce zero, a fractional lamport, or an overflow.
pub fn lamports_from_decimal(amount: Decimal) -> Result<u64, IssueError> {
    if amount <= Decimal::ZERO {
        return Err(IssueError::NonPositiveAmount(amount));
    }
    let scaled = amount
        .checked_mul(Decimal::from(LAMPORTS_PER_SOL))
        .ok_or(IssueError::AmountOverflow(amount))?;
    if !scaled.fract().is_zero() {
        return Err(IssueError::SubLamportAmount(amount));
    }
    scaled.to_u64().ok_or(IssueError::AmountOverflow(amount))
}

/// Issues payment challenges and remembers them, keyed by nonce, until they
/// expire.
///
/// Issuance has no side effect on replay state: a requirement is "issued",
/// not "consumed".
pub struct ChallengeIssuer {
    config: Arc<ServerConfig>,
    issued: DashMap<String, PaymentRequirements>,
}

impl ChallengeIssuer {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            issued: DashMap::new(),
        }
    }

    /// Builds fresh `PaymentRequirements` for the given decimal SOL amount
    /// and records them in the issued store.
    pub fn issue(&self, amount: Decimal) -> Result<PaymentRequirements, IssueError> {
        let lamports = lamports_from_decimal(amount)?;
        let now = unix_now();
        let requirements = PaymentRequirements {
            version: X402_VERSION,
            network: self.config.network().clone(),
            recipient: self.config.recipient().to_string(),
            amount: lamports,
            nonce: generate_nonce(),
            issued_at: now,
            expires_at: now + self.config.challenge_ttl().as_secs(),
            options: self.config.options().to_vec(),
        };
        self.sweep_issued(now);
        self.issued
            .insert(requirements.nonce.clone(), requirements.clone());
        tracing::debug!(
            nonce = %requirements.nonce,
            lamports,
            expires_at = requirements.expires_at,
            "issued payment challenge"
        );
        Ok(requirements)
    }

    /// Issues a challenge and projects it into the headers and body of an
    /// HTTP 402 response. Header and body decode to identical requirements.
    pub fn create_402_response(&self, amount: Decimal) -> Result<X402Response, IssueError> {
        let requirements = self.issue(amount)?;
        let body = serde_json::to_value(&requirements)?;
        let mut headers = HashMap::new();
        headers.insert(
            PAYMENT_REQUIRED_HEADER.to_string(),
            BASE64.encode(serde_json::to_vec(&requirements)?),
        );
        headers.insert(
            PAYMENT_OPTIONS_HEADER.to_string(),
            BASE64.encode(serde_json::to_vec(&requirements.options)?),
        );
        Ok(X402Response { headers, body })
    }

    /// The not-yet-expired requirements issued under this nonce, if any.
    pub fn issued(&self, nonce: &str) -> Option<PaymentRequirements> {
        self.issued
            .get(nonce)
            .map(|r| r.value().clone())
            .filter(|r| !r.is_expired_at(unix_now()))
    }

    fn sweep_issued(&self, now: u64) {
        self.issued.retain(|_, r| !r.is_expired_at(now));
    }
}

fn generate_nonce() -> String {
    // 128 bits from the OS-seeded generator: enough that guessing an issued
    // nonce is infeasible.
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::X402ServerConfig;
    use crate::types::Network;
    use std::collections::HashSet;
    use std::str::FromStr;

    const RECIPIENT: &str = "8qEoLvRsumJpNCn7Q5PT19W5X5g62TKjCaMBDVBpu1hr";

    fn issuer() -> ChallengeIssuer {
        let config = X402ServerConfig::new(Network::Devnet, RECIPIENT)
            .validate()
            .unwrap();
        ChallengeIssuer::new(Arc::new(config))
    }

    #[test]
    fn converts_decimal_sol_to_lamports() {
        let amount = Decimal::from_str("0.01").unwrap();
        assert_eq!(lamports_from_decimal(amount).unwrap(), 10_000_000);
        assert_eq!(
            lamports_from_decimal(Decimal::from_str("1.5").unwrap()).unwrap(),
            1_500_000_000
        );
        assert_eq!(
            lamports_from_decimal(Decimal::from_str("0.000000001").unwrap()).unwrap(),
            1
        );
    }

    #[test]
    fn rejects_unconvertible_amounts() {
        assert!(matches!(
            lamports_from_decimal(Decimal::ZERO),
            Err(IssueError::NonPositiveAmount(_))
        ));
        assert!(matches!(
            lamports_from_decimal(Decimal::from_str("-0.5").unwrap()),
            Err(IssueError::NonPositiveAmount(_))
        ));
        assert!(matches!(
            lamports_from_decimal(Decimal::from_str("0.0000000005").unwrap()),
            Err(IssueError::SubLamportAmount(_))
        ));
    }

    #[test]
    fn round_trips_amount_through_decimals() {
        let amount = Decimal::from_str("0.25").unwrap();
        let lamports = lamports_from_decimal(amount).unwrap();
        let back = Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL);
        assert_eq!(back, amount);
    }

    #[test]
    fn stamps_version_expiry_and_options() {
        let issuer = issuer();
        let requirements = issuer.issue(Decimal::from_str("0.01").unwrap()).unwrap();
        assert_eq!(requirements.version, X402_VERSION);
        assert_eq!(requirements.amount, 10_000_000);
        assert_eq!(requirements.recipient, RECIPIENT);
        assert!(requirements.expires_at > requirements.issued_at);
        assert!(!requirements.options.is_empty());
        assert_eq!(issuer.issued(&requirements.nonce), Some(requirements));
    }

    #[test]
    fn nonces_are_pairwise_distinct() {
        let issuer = issuer();
        let amount = Decimal::from_str("0.01").unwrap();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let requirements = issuer.issue(amount).unwrap();
            assert_eq!(requirements.nonce.len(), 32);
            assert!(seen.insert(requirements.nonce), "nonce repeated");
        }
    }

    #[test]
    fn header_and_body_decode_to_identical_requirements() {
        let issuer = issuer();
        let response = issuer
            .create_402_response(Decimal::from_str("0.01").unwrap())
            .unwrap();
        let from_header = response.header_requirements().unwrap();
        let from_body: PaymentRequirements =
            serde_json::from_value(response.body.clone()).unwrap();
        assert_eq!(from_header, from_body);
        assert_eq!(from_header.amount, 10_000_000);
        assert!(response.headers.contains_key(PAYMENT_OPTIONS_HEADER));
    }

    #[test]
    fn unknown_nonce_is_not_issued() {
        let issuer = issuer();
        assert!(issuer.issued("deadbeefdeadbeefdeadbeefdeadbeef").is_none());
    }
}
