//! The server facade: one object the embedding HTTP application talks to.
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::{ConfigError, ServerConfig, X402ServerConfig};
use crate::gateway::{GatewayError, LedgerGateway, SolanaLedgerGateway};
use crate::issuer::{ChallengeIssuer, IssueError};
use crate::replay::{InMemoryReplayCache, ReplayCache};
use crate::types::{
    PaymentProof, PaymentRequirements, PaymentVerification, RejectReason, X402Response, unix_now,
};
use crate::verifier::{PaymentVerifier, ProofError};

/// Fatal startup failures.
#[derive(Debug, thiserror::Error)]
pub enum InitializationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("ledger gateway probe failed: {0}")]
    Probe(#[from] GatewayError),
}

/// Server side of the x402 protocol on Solana.
///
/// The HTTP layer around it stays thin: ask for a challenge and write it out
/// as a 402, or hand in a client proof and translate the verdict into
/// 200/402/403.
///
/// ```no_run
/// use rust_decimal::Decimal;
/// use solana_x402_server::{Network, SolanaX402Server, X402ServerConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = X402ServerConfig::new(
///     Network::Devnet,
///     "8qEoLvRsumJpNCn7Q5PT19W5X5g62TKjCaMBDVBpu1hr",
/// );
/// let server = SolanaX402Server::initialize(config).await?;
///
/// // Gate an endpoint: 0.01 SOL to get in.
/// let challenge = server.create_402_response(Decimal::new(1, 2))?;
/// // respond with status 402, challenge.headers, challenge.body
/// # Ok(())
/// # }
/// ```
pub struct SolanaX402Server {
    config: Arc<ServerConfig>,
    issuer: ChallengeIssuer,
    verifier: PaymentVerifier,
    replay: Arc<dyn ReplayCache>,
}

impl SolanaX402Server {
    /// Validates the configuration, connects a Solana RPC gateway for its
    /// network, and probes it once for reachability.
    pub async fn initialize(config: X402ServerConfig) -> Result<Self, InitializationError> {
        let config = Arc::new(config.validate()?);
        let gateway: Arc<dyn LedgerGateway> =
            Arc::new(SolanaLedgerGateway::new(config.rpc_endpoint()));
        gateway.probe().await?;
        tracing::info!(
            network = %config.network(),
            recipient = %config.recipient(),
            "x402 server initialized"
        );
        Ok(Self::assemble(
            config,
            gateway,
            Arc::new(InMemoryReplayCache::new()),
        ))
    }

    /// Builds a server around injected collaborators without probing, for
    /// tests and for deployments bringing their own gateway or replay store.
    pub fn with_gateway(
        config: X402ServerConfig,
        gateway: Arc<dyn LedgerGateway>,
        replay: Arc<dyn ReplayCache>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::assemble(Arc::new(config.validate()?), gateway, replay))
    }

    fn assemble(
        config: Arc<ServerConfig>,
        gateway: Arc<dyn LedgerGateway>,
        replay: Arc<dyn ReplayCache>,
    ) -> Self {
        let issuer = ChallengeIssuer::new(Arc::clone(&config));
        let verifier = PaymentVerifier::new(gateway, Arc::clone(&replay), config.min_finality());
        Self {
            config,
            issuer,
            verifier,
            replay,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Issues a challenge for the given decimal SOL amount and projects it
    /// into 402 headers and body for the caller to relay verbatim.
    pub fn create_402_response(&self, amount: Decimal) -> Result<X402Response, IssueError> {
        self.issuer.create_402_response(amount)
    }

    /// Issues a challenge without the HTTP projection.
    pub fn issue(&self, amount: Decimal) -> Result<PaymentRequirements, IssueError> {
        self.issuer.issue(amount)
    }

    /// Verifies a proof against the requirements this server issued under
    /// `nonce`. A nonce that was never issued, or whose challenge has
    /// expired out of the store, verifies as `Expired` — the two are
    /// indistinguishable from outside.
    pub async fn verify_payment(
        &self,
        nonce: &str,
        proof: &PaymentProof,
    ) -> Result<PaymentVerification, ProofError> {
        match self.issuer.issued(nonce) {
            Some(requirements) => self.verifier.verify(&requirements, proof).await,
            None => Ok(PaymentVerification::rejected(
                nonce,
                RejectReason::Expired,
                Some(&proof.transaction_reference),
            )),
        }
    }

    /// Verifies a proof against caller-supplied requirements, for callers
    /// that echo the challenge back instead of relying on the issued store.
    pub async fn verify(
        &self,
        requirements: &PaymentRequirements,
        proof: &PaymentProof,
    ) -> Result<PaymentVerification, ProofError> {
        self.verifier.verify(requirements, proof).await
    }

    /// Drops replay entries old enough that their challenges are long
    /// expired. Optional housekeeping; the cache is correct without it.
    pub fn sweep_replay(&self) -> usize {
        self.replay
            .sweep_expired(unix_now(), self.config.challenge_ttl().as_secs())
    }
}
