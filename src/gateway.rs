//! Read access to the ledger: fetch a transaction, its parsed transfers, and
//! how deeply the cluster has committed it.
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_signature::Signature;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, TransactionConfirmationStatus,
    UiInstruction, UiMessage, UiParsedInstruction, UiTransactionEncoding,
};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::constants::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_WINDOW_MS, DEFAULT_RPC_BACKOFF_MS,
    DEFAULT_RPC_MAX_ATTEMPTS,
};
use crate::types::ConfirmationLevel;

/// One system-program transfer parsed out of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransfer {
    pub source: String,
    pub destination: String,
    pub lamports: u64,
}

/// Pre/post lamport balance of one account touched by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub account: String,
    pub before: u64,
    pub after: u64,
}

impl BalanceChange {
    /// Lamports the account gained; zero when it was debited.
    pub fn credit(&self) -> u64 {
        self.after.saturating_sub(self.before)
    }
}

/// Everything verification needs to know about a fetched transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transfers: Vec<LedgerTransfer>,
    pub balance_changes: Vec<BalanceChange>,
    /// The transaction itself failed on-chain.
    pub failed: bool,
    pub confirmation: ConfirmationLevel,
    pub slot: u64,
    pub block_time: Option<i64>,
}

impl TransactionRecord {
    /// Total lamports moved to `recipient` by system-program transfer
    /// instructions.
    pub fn lamports_transferred_to(&self, recipient: &str) -> u64 {
        self.transfers
            .iter()
            .filter(|t| t.destination == recipient)
            .map(|t| t.lamports)
            .sum()
    }

    /// Net lamports credited to `recipient`, regardless of which instruction
    /// moved them.
    pub fn credit_to(&self, recipient: &str) -> u64 {
        self.balance_changes
            .iter()
            .filter(|b| b.account == recipient)
            .map(BalanceChange::credit)
            .sum()
    }

    /// Whether the transaction touches `recipient` at all.
    pub fn touches(&self, recipient: &str) -> bool {
        self.balance_changes.iter().any(|b| b.account == recipient)
            || self.transfers.iter().any(|t| t.destination == recipient)
    }
}

/// Outcome of resolving a transaction reference against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not visible after the entire polling window; treated as nonexistent.
    NotFound,
    /// Seen by the cluster but still below confirmed commitment, where
    /// transfer details are not yet queryable.
    Pending,
    Found(TransactionRecord),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("ledger RPC unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
    #[error("ledger returned transaction data in an unexpected encoding")]
    UnexpectedEncoding,
}

/// Bounds on RPC retries and on how long a signature may stay invisible.
#[derive(Debug, Clone)]
pub struct GatewayRetryPolicy {
    pub max_attempts: u32,
    /// First retry delay; doubled on each further attempt.
    pub backoff: Duration,
    pub poll_window: Duration,
    pub poll_interval: Duration,
}

impl Default for GatewayRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RPC_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_RPC_BACKOFF_MS),
            poll_window: Duration::from_millis(DEFAULT_POLL_WINDOW_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Stateless query facade over ledger read access.
///
/// The trait seam keeps verification testable against an in-memory fake and
/// keeps the bounded-retry policy in one place.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Resolves a transaction reference, polling within a bounded window
    /// before concluding the transaction does not exist. Never blocks
    /// indefinitely.
    async fn fetch_transaction(&self, signature: &Signature) -> Result<FetchOutcome, GatewayError>;

    /// One-shot reachability check.
    async fn probe(&self) -> Result<(), GatewayError>;
}

/// [`LedgerGateway`] over a Solana JSON-RPC node.
pub struct SolanaLedgerGateway {
    rpc: RpcClient,
    retry: GatewayRetryPolicy,
}

impl SolanaLedgerGateway {
    pub fn new(endpoint: &Url) -> Self {
        Self::with_retry_policy(endpoint, GatewayRetryPolicy::default())
    }

    pub fn with_retry_policy(endpoint: &Url, retry: GatewayRetryPolicy) -> Self {
        tracing::info!(rpc = %endpoint, "initialized Solana ledger gateway");
        Self {
            rpc: RpcClient::new(endpoint.to_string()),
            retry,
        }
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<solana_transaction_status::TransactionStatus>, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.rpc.get_signature_statuses_with_history(&[*signature]).await {
                Ok(response) => return Ok(response.value.into_iter().next().flatten()),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(GatewayError::Unavailable {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                    let delay = self.retry.backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(%err, attempt, "signature status query failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn transaction_details(
        &self,
        signature: &Signature,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta, GatewayError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let mut attempt = 0;
        loop {
            match self
                .rpc
                .get_transaction_with_config(signature, config.clone())
                .await
            {
                Ok(tx) => return Ok(tx),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(GatewayError::Unavailable {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                    let delay = self.retry.backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(%err, attempt, "transaction fetch failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn confirmation_level(
        status: Option<&TransactionConfirmationStatus>,
    ) -> ConfirmationLevel {
        match status {
            Some(TransactionConfirmationStatus::Finalized) => ConfirmationLevel::Finalized,
            Some(TransactionConfirmationStatus::Confirmed) => ConfirmationLevel::Confirmed,
            Some(TransactionConfirmationStatus::Processed) | None => ConfirmationLevel::Processed,
        }
    }

    fn record_from(
        tx: EncodedConfirmedTransactionWithStatusMeta,
        confirmation: ConfirmationLevel,
    ) -> Result<TransactionRecord, GatewayError> {
        let slot = tx.slot;
        let block_time = tx.block_time;
        let meta = tx.transaction.meta;
        let failed = meta.as_ref().is_some_and(|m| m.err.is_some());

        let message = match tx.transaction.transaction {
            EncodedTransaction::Json(ui) => ui.message,
            _ => return Err(GatewayError::UnexpectedEncoding),
        };
        let parsed = match message {
            UiMessage::Parsed(parsed) => parsed,
            UiMessage::Raw(_) => return Err(GatewayError::UnexpectedEncoding),
        };

        let mut transfers = Vec::new();
        for instruction in &parsed.instructions {
            let UiInstruction::Parsed(UiParsedInstruction::Parsed(pi)) = instruction else {
                continue;
            };
            if pi.program != "system" {
                continue;
            }
            let kind = pi.parsed.get("type").and_then(|t| t.as_str());
            if !matches!(kind, Some("transfer") | Some("transferWithSeed")) {
                continue;
            }
            let Some(info) = pi.parsed.get("info") else {
                continue;
            };
            let (Some(source), Some(destination), Some(lamports)) = (
                info.get("source").and_then(|v| v.as_str()),
                info.get("destination").and_then(|v| v.as_str()),
                info.get("lamports").and_then(|v| v.as_u64()),
            ) else {
                continue;
            };
            transfers.push(LedgerTransfer {
                source: source.to_string(),
                destination: destination.to_string(),
                lamports,
            });
        }

        let mut balance_changes = Vec::new();
        if let Some(meta) = &meta {
            for (index, account) in parsed.account_keys.iter().enumerate() {
                let (Some(before), Some(after)) = (
                    meta.pre_balances.get(index).copied(),
                    meta.post_balances.get(index).copied(),
                ) else {
                    continue;
                };
                balance_changes.push(BalanceChange {
                    account: account.pubkey.clone(),
                    before,
                    after,
                });
            }
        }

        Ok(TransactionRecord {
            transfers,
            balance_changes,
            failed,
            confirmation,
            slot,
            block_time,
        })
    }
}

#[async_trait]
impl LedgerGateway for SolanaLedgerGateway {
    async fn fetch_transaction(&self, signature: &Signature) -> Result<FetchOutcome, GatewayError> {
        let deadline = Instant::now() + self.retry.poll_window;
        loop {
            match self.signature_status(signature).await? {
                None => {
                    // Not visible yet: distinguish still-propagating from
                    // nonexistent only by the polling window.
                    if Instant::now() + self.retry.poll_interval > deadline {
                        tracing::debug!(%signature, "signature not visible within polling window");
                        return Ok(FetchOutcome::NotFound);
                    }
                    tokio::time::sleep(self.retry.poll_interval).await;
                }
                Some(status) => {
                    let confirmation = Self::confirmation_level(status.confirmation_status.as_ref());
                    if confirmation < ConfirmationLevel::Confirmed {
                        // Transfer details are not queryable below confirmed
                        // commitment; give it the rest of the window.
                        if Instant::now() + self.retry.poll_interval > deadline {
                            return Ok(FetchOutcome::Pending);
                        }
                        tokio::time::sleep(self.retry.poll_interval).await;
                        continue;
                    }
                    let details = self.transaction_details(signature).await?;
                    let record = Self::record_from(details, confirmation)?;
                    tracing::debug!(
                        %signature,
                        slot = record.slot,
                        failed = record.failed,
                        transfers = record.transfers.len(),
                        "resolved ledger transaction"
                    );
                    return Ok(FetchOutcome::Found(record));
                }
            }
        }
    }

    async fn probe(&self) -> Result<(), GatewayError> {
        let version = self
            .rpc
            .get_version()
            .await
            .map_err(|err| GatewayError::Unavailable {
                attempts: 1,
                last_error: err.to_string(),
            })?;
        tracing::info!(node_version = %version.solana_core, "ledger RPC reachable");
        Ok(())
    }
}
