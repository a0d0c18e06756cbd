//! Payment verification: does a submitted transaction satisfy previously
//! issued requirements?
use solana_signature::Signature;
use std::str::FromStr;
use std::sync::Arc;

use crate::gateway::{FetchOutcome, LedgerGateway};
use crate::replay::{ReplayCache, ReplayEntry};
use crate::types::{
    ConfirmationLevel, PaymentMethod, PaymentProof, PaymentRequirements, PaymentVerification,
    RejectReason, unix_now,
};

/// Malformed proof input. Unlike a [`RejectReason`] verdict this is a caller
/// error: the proof could never verify against these requirements no matter
/// what the ledger says.
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("transaction reference is not a valid signature: {0}")]
    InvalidTransactionReference(String),
    #[error("settlement method {0} is not offered by these requirements")]
    MethodNotOffered(PaymentMethod),
}

/// Runs the ordered verification pipeline against the ledger and the replay
/// cache. Owns the only write path into the replay cache.
pub struct PaymentVerifier {
    gateway: Arc<dyn LedgerGateway>,
    replay: Arc<dyn ReplayCache>,
    min_finality: ConfirmationLevel,
}

impl PaymentVerifier {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        replay: Arc<dyn ReplayCache>,
        min_finality: ConfirmationLevel,
    ) -> Self {
        Self {
            gateway,
            replay,
            min_finality,
        }
    }

    /// Checks the proof against the requirements, short-circuiting at the
    /// first failed step: freshness, replay, existence, on-chain success,
    /// amount/recipient per the chosen settlement method, finality, and
    /// finally the atomic replay consume.
    ///
    /// Every rejection is returned as a verdict; only malformed proof input
    /// is an `Err`.
    pub async fn verify(
        &self,
        requirements: &PaymentRequirements,
        proof: &PaymentProof,
    ) -> Result<PaymentVerification, ProofError> {
        let nonce = requirements.nonce.as_str();
        if !requirements.offers(proof.method) {
            return Err(ProofError::MethodNotOffered(proof.method));
        }
        let signature = Signature::from_str(&proof.transaction_reference).map_err(|_| {
            ProofError::InvalidTransactionReference(proof.transaction_reference.clone())
        })?;
        let reference = proof.transaction_reference.as_str();

        if requirements.is_expired_at(unix_now()) {
            return Ok(PaymentVerification::rejected(
                nonce,
                RejectReason::Expired,
                Some(reference),
            ));
        }

        // Cheap pre-check before touching the ledger; the authoritative
        // exclusion happens at the consume below.
        if self.replay.contains(nonce) {
            return Ok(PaymentVerification::rejected(
                nonce,
                RejectReason::AlreadyConsumed,
                Some(reference),
            ));
        }

        let record = match self.gateway.fetch_transaction(&signature).await {
            Err(err) => {
                tracing::warn!(%err, %signature, "ledger gateway unavailable during verification");
                return Ok(PaymentVerification::rejected(
                    nonce,
                    RejectReason::GatewayUnavailable,
                    Some(reference),
                ));
            }
            Ok(FetchOutcome::NotFound) => {
                return Ok(PaymentVerification::rejected(
                    nonce,
                    RejectReason::TransactionNotFound,
                    Some(reference),
                ));
            }
            Ok(FetchOutcome::Pending) => {
                return Ok(PaymentVerification::rejected(
                    nonce,
                    RejectReason::NotYetFinal,
                    Some(reference),
                ));
            }
            Ok(FetchOutcome::Found(record)) => record,
        };

        if record.failed {
            return Ok(PaymentVerification::rejected(
                nonce,
                RejectReason::TransactionFailed,
                Some(reference),
            ));
        }

        let recipient = requirements.recipient.as_str();
        let paid = match proof.method {
            PaymentMethod::DirectTransfer => record.lamports_transferred_to(recipient),
            PaymentMethod::RelayedTransfer => record.credit_to(recipient),
        };
        if paid == 0 {
            return Ok(PaymentVerification::rejected(
                nonce,
                RejectReason::RecipientMismatch,
                Some(reference),
            ));
        }
        if paid < requirements.amount {
            return Ok(PaymentVerification::rejected(
                nonce,
                RejectReason::AmountMismatch,
                Some(reference),
            ));
        }

        if record.confirmation < self.min_finality {
            return Ok(PaymentVerification::rejected(
                nonce,
                RejectReason::NotYetFinal,
                Some(reference),
            ));
        }

        // Exclusive insertion: of any concurrent verifications for this
        // nonce, exactly one reaches the entry first and wins.
        let consumed = self.replay.try_consume(ReplayEntry {
            nonce: nonce.to_string(),
            transaction_reference: reference.to_string(),
            consumed_at: unix_now(),
        });
        if !consumed {
            return Ok(PaymentVerification::rejected(
                nonce,
                RejectReason::AlreadyConsumed,
                Some(reference),
            ));
        }
        tracing::info!(%nonce, %signature, paid, "payment accepted");
        Ok(PaymentVerification::accepted(
            nonce,
            reference,
            record.block_time,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::InMemoryReplayCache;
    use crate::testutil::MockLedgerGateway;
    use crate::types::{Network, PaymentOption};

    const PAYER: &str = "6VW3CableJodHM2CLZQcsBSBhLWyezufXtmRU1GHgm8V";
    const RECIPIENT: &str = "8qEoLvRsumJpNCn7Q5PT19W5X5g62TKjCaMBDVBpu1hr";
    const OTHER: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";

    fn requirements(nonce: &str, amount: u64, expires_in: i64) -> PaymentRequirements {
        let now = unix_now();
        PaymentRequirements {
            version: 1,
            network: Network::Devnet,
            recipient: RECIPIENT.to_string(),
            amount,
            nonce: nonce.to_string(),
            issued_at: now.saturating_sub(1),
            expires_at: now.saturating_add_signed(expires_in),
            options: vec![
                PaymentOption::DirectTransfer,
                PaymentOption::RelayedTransfer { relayer: None },
            ],
        }
    }

    fn proof(signature: &Signature) -> PaymentProof {
        PaymentProof {
            method: PaymentMethod::DirectTransfer,
            transaction_reference: signature.to_string(),
        }
    }

    fn verifier(
        gateway: MockLedgerGateway,
        min_finality: ConfirmationLevel,
    ) -> (PaymentVerifier, Arc<InMemoryReplayCache>) {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = PaymentVerifier::new(
            Arc::new(gateway),
            Arc::clone(&replay) as Arc<dyn ReplayCache>,
            min_finality,
        );
        (verifier, replay)
    }

    #[tokio::test]
    async fn accepts_once_then_reports_already_consumed() {
        let signature = Signature::from([1u8; 64]);
        let gateway = MockLedgerGateway::new();
        gateway.script(
            &signature,
            FetchOutcome::Found(MockLedgerGateway::transfer_record(
                PAYER,
                RECIPIENT,
                10_000_000,
                ConfirmationLevel::Finalized,
                false,
            )),
        );
        let (verifier, replay) = verifier(gateway, ConfirmationLevel::Confirmed);
        let requirements = requirements("nonce-a", 10_000_000, 60);

        let first = verifier.verify(&requirements, &proof(&signature)).await.unwrap();
        assert!(first.accepted);
        assert_eq!(first.confirmed_at, Some(1_700_000_000));
        assert!(replay.contains("nonce-a"));

        for _ in 0..3 {
            let again = verifier.verify(&requirements, &proof(&signature)).await.unwrap();
            assert!(!again.accepted);
            assert_eq!(again.reason, Some(RejectReason::AlreadyConsumed));
        }
    }

    #[tokio::test]
    async fn expired_requirements_reject_even_a_valid_proof() {
        let signature = Signature::from([2u8; 64]);
        let gateway = MockLedgerGateway::new();
        gateway.script(
            &signature,
            FetchOutcome::Found(MockLedgerGateway::transfer_record(
                PAYER,
                RECIPIENT,
                10_000_000,
                ConfirmationLevel::Finalized,
                false,
            )),
        );
        let (verifier, replay) = verifier(gateway, ConfirmationLevel::Confirmed);
        let requirements = requirements("nonce-b", 10_000_000, -5);

        let verdict = verifier.verify(&requirements, &proof(&signature)).await.unwrap();
        assert_eq!(verdict.reason, Some(RejectReason::Expired));
        assert!(!replay.contains("nonce-b"));
    }

    #[tokio::test]
    async fn unknown_signature_is_transaction_not_found() {
        let signature = Signature::from([3u8; 64]);
        let (verifier, _) = verifier(MockLedgerGateway::new(), ConfirmationLevel::Confirmed);
        let verdict = verifier
            .verify(&requirements("nonce-c", 1, 60), &proof(&signature))
            .await
            .unwrap();
        assert_eq!(verdict.reason, Some(RejectReason::TransactionNotFound));
    }

    #[tokio::test]
    async fn exhausted_gateway_is_surfaced_distinctly() {
        let signature = Signature::from([4u8; 64]);
        let (verifier, _) = verifier(MockLedgerGateway::unavailable(), ConfirmationLevel::Confirmed);
        let verdict = verifier
            .verify(&requirements("nonce-d", 1, 60), &proof(&signature))
            .await
            .unwrap();
        assert_eq!(verdict.reason, Some(RejectReason::GatewayUnavailable));
    }

    #[tokio::test]
    async fn failed_transaction_is_rejected() {
        let signature = Signature::from([5u8; 64]);
        let gateway = MockLedgerGateway::new();
        gateway.script(
            &signature,
            FetchOutcome::Found(MockLedgerGateway::transfer_record(
                PAYER,
                RECIPIENT,
                10_000_000,
                ConfirmationLevel::Finalized,
                true,
            )),
        );
        let (verifier, _) = verifier(gateway, ConfirmationLevel::Confirmed);
        let verdict = verifier
            .verify(&requirements("nonce-e", 10_000_000, 60), &proof(&signature))
            .await
            .unwrap();
        assert_eq!(verdict.reason, Some(RejectReason::TransactionFailed));
    }

    #[tokio::test]
    async fn underpayment_is_amount_mismatch() {
        let signature = Signature::from([6u8; 64]);
        let gateway = MockLedgerGateway::new();
        gateway.script(
            &signature,
            FetchOutcome::Found(MockLedgerGateway::transfer_record(
                PAYER,
                RECIPIENT,
                9_999_999,
                ConfirmationLevel::Finalized,
                false,
            )),
        );
        let (verifier, _) = verifier(gateway, ConfirmationLevel::Confirmed);
        let verdict = verifier
            .verify(&requirements("nonce-f", 10_000_000, 60), &proof(&signature))
            .await
            .unwrap();
        assert_eq!(verdict.reason, Some(RejectReason::AmountMismatch));
    }

    #[tokio::test]
    async fn payment_to_someone_else_is_recipient_mismatch() {
        let signature = Signature::from([7u8; 64]);
        let gateway = MockLedgerGateway::new();
        gateway.script(
            &signature,
            FetchOutcome::Found(MockLedgerGateway::transfer_record(
                PAYER,
                OTHER,
                20_000_000,
                ConfirmationLevel::Finalized,
                false,
            )),
        );
        let (verifier, _) = verifier(gateway, ConfirmationLevel::Confirmed);
        let verdict = verifier
            .verify(&requirements("nonce-g", 10_000_000, 60), &proof(&signature))
            .await
            .unwrap();
        assert_eq!(verdict.reason, Some(RejectReason::RecipientMismatch));
    }

    #[tokio::test]
    async fn below_minimum_finality_is_not_yet_final() {
        let signature = Signature::from([8u8; 64]);
        let gateway = MockLedgerGateway::new();
        gateway.script(
            &signature,
            FetchOutcome::Found(MockLedgerGateway::transfer_record(
                PAYER,
                RECIPIENT,
                10_000_000,
                ConfirmationLevel::Confirmed,
                false,
            )),
        );
        let (verifier, replay) = verifier(gateway, ConfirmationLevel::Finalized);
        let requirements = requirements("nonce-h", 10_000_000, 60);
        let verdict = verifier.verify(&requirements, &proof(&signature)).await.unwrap();
        assert_eq!(verdict.reason, Some(RejectReason::NotYetFinal));
        // Not a consuming rejection: the caller may retry later.
        assert!(!replay.contains("nonce-h"));
    }

    #[tokio::test]
    async fn pending_visibility_is_not_yet_final() {
        let signature = Signature::from([9u8; 64]);
        let gateway = MockLedgerGateway::new();
        gateway.script(&signature, FetchOutcome::Pending);
        let (verifier, _) = verifier(gateway, ConfirmationLevel::Confirmed);
        let verdict = verifier
            .verify(&requirements("nonce-i", 1, 60), &proof(&signature))
            .await
            .unwrap();
        assert_eq!(verdict.reason, Some(RejectReason::NotYetFinal));
    }

    #[tokio::test]
    async fn relayed_credit_satisfies_relayed_method_only() {
        let signature = Signature::from([10u8; 64]);
        let gateway = MockLedgerGateway::new();
        gateway.script(
            &signature,
            FetchOutcome::Found(MockLedgerGateway::credit_record(
                RECIPIENT,
                10_000_000,
                ConfirmationLevel::Finalized,
            )),
        );
        let (verifier, _) = verifier(gateway, ConfirmationLevel::Confirmed);
        let requirements = requirements("nonce-j", 10_000_000, 60);

        let direct = verifier.verify(&requirements, &proof(&signature)).await.unwrap();
        assert_eq!(direct.reason, Some(RejectReason::RecipientMismatch));

        let relayed = PaymentProof {
            method: PaymentMethod::RelayedTransfer,
            transaction_reference: signature.to_string(),
        };
        let verdict = verifier.verify(&requirements, &relayed).await.unwrap();
        assert!(verdict.accepted);
    }

    #[tokio::test]
    async fn malformed_proof_is_an_error_not_a_verdict() {
        let (verifier, _) = verifier(MockLedgerGateway::new(), ConfirmationLevel::Confirmed);
        let requirements = requirements("nonce-k", 1, 60);

        let bad_reference = PaymentProof {
            method: PaymentMethod::DirectTransfer,
            transaction_reference: "not-base58!".to_string(),
        };
        assert!(matches!(
            verifier.verify(&requirements, &bad_reference).await,
            Err(ProofError::InvalidTransactionReference(_))
        ));

        let mut direct_only = requirements.clone();
        direct_only.options = vec![PaymentOption::DirectTransfer];
        let relayed = PaymentProof {
            method: PaymentMethod::RelayedTransfer,
            transaction_reference: Signature::from([11u8; 64]).to_string(),
        };
        assert!(matches!(
            verifier.verify(&direct_only, &relayed).await,
            Err(ProofError::MethodNotOffered(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_verifications_have_a_single_winner() {
        let signature = Signature::from([12u8; 64]);
        let gateway = MockLedgerGateway::new();
        gateway.script(
            &signature,
            FetchOutcome::Found(MockLedgerGateway::transfer_record(
                PAYER,
                RECIPIENT,
                10_000_000,
                ConfirmationLevel::Finalized,
                false,
            )),
        );
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = Arc::new(PaymentVerifier::new(
            Arc::new(gateway),
            Arc::clone(&replay) as Arc<dyn ReplayCache>,
            ConfirmationLevel::Confirmed,
        ));
        let requirements = Arc::new(requirements("nonce-l", 10_000_000, 60));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let verifier = Arc::clone(&verifier);
            let requirements = Arc::clone(&requirements);
            let proof = proof(&signature);
            tasks.spawn(async move { verifier.verify(&requirements, &proof).await.unwrap() });
        }
        let mut accepted = 0;
        let mut consumed = 0;
        while let Some(verdict) = tasks.join_next().await {
            let verdict = verdict.unwrap();
            if verdict.accepted {
                accepted += 1;
            } else {
                assert_eq!(verdict.reason, Some(RejectReason::AlreadyConsumed));
                consumed += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(consumed, 15);
    }
}
