//! Shared test doubles.
use async_trait::async_trait;
use dashmap::DashMap;
use solana_signature::Signature;

use crate::gateway::{
    BalanceChange, FetchOutcome, GatewayError, LedgerGateway, LedgerTransfer, TransactionRecord,
};
use crate::types::ConfirmationLevel;

/// In-memory [`LedgerGateway`] scripted with per-signature outcomes.
/// Unscripted signatures resolve to [`FetchOutcome::NotFound`].
pub(crate) struct MockLedgerGateway {
    outcomes: DashMap<String, FetchOutcome>,
    unavailable: bool,
}

impl MockLedgerGateway {
    pub(crate) fn new() -> Self {
        Self {
            outcomes: DashMap::new(),
            unavailable: false,
        }
    }

    /// A gateway whose every call fails as if retries were exhausted.
    pub(crate) fn unavailable() -> Self {
        Self {
            outcomes: DashMap::new(),
            unavailable: true,
        }
    }

    pub(crate) fn script(&self, signature: &Signature, outcome: FetchOutcome) {
        self.outcomes.insert(signature.to_string(), outcome);
    }

    /// A record holding one system transfer plus the matching balance
    /// changes, the shape a simple paid-in-full transaction has on chain.
    pub(crate) fn transfer_record(
        source: &str,
        destination: &str,
        lamports: u64,
        confirmation: ConfirmationLevel,
        failed: bool,
    ) -> TransactionRecord {
        TransactionRecord {
            transfers: vec![LedgerTransfer {
                source: source.to_string(),
                destination: destination.to_string(),
                lamports,
            }],
            balance_changes: vec![
                BalanceChange {
                    account: source.to_string(),
                    before: lamports * 2,
                    after: lamports * 2 - lamports,
                },
                BalanceChange {
                    account: destination.to_string(),
                    before: 0,
                    after: lamports,
                },
            ],
            failed,
            confirmation,
            slot: 42,
            block_time: Some(1_700_000_000),
        }
    }

    /// A record where the recipient is credited without any system-program
    /// transfer instruction, as a program-mediated relayed payment looks.
    pub(crate) fn credit_record(
        destination: &str,
        lamports: u64,
        confirmation: ConfirmationLevel,
    ) -> TransactionRecord {
        TransactionRecord {
            transfers: vec![],
            balance_changes: vec![BalanceChange {
                account: destination.to_string(),
                before: 100,
                after: 100 + lamports,
            }],
            failed: false,
            confirmation,
            slot: 42,
            block_time: Some(1_700_000_000),
        }
    }
}

#[async_trait]
impl LedgerGateway for MockLedgerGateway {
    async fn fetch_transaction(&self, signature: &Signature) -> Result<FetchOutcome, GatewayError> {
        if self.unavailable {
            return Err(GatewayError::Unavailable {
                attempts: 3,
                last_error: "connection refused".to_string(),
            });
        }
        Ok(self
            .outcomes
            .get(&signature.to_string())
            .map(|o| o.value().clone())
            .unwrap_or(FetchOutcome::NotFound))
    }

    async fn probe(&self) -> Result<(), GatewayError> {
        if self.unavailable {
            return Err(GatewayError::Unavailable {
                attempts: 1,
                last_error: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}
