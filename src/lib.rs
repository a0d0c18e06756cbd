//! Server-side x402 micropayments on Solana.
//!
//! The x402 flow turns HTTP 402 into a working payment loop: a server gates
//! a resource behind a priced challenge, the client pays on chain and retries
//! with a proof, and the server verifies the payment against the ledger
//! before serving the resource.
//!
//! This crate is the server half, framework-agnostic: it issues challenges
//! as ready-to-send headers and bodies, and verifies proofs over Solana RPC
//! with replay protection built in. Plug [`SolanaX402Server`] into whatever
//! HTTP stack the application already runs.
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use solana_x402_server::{Network, PaymentProof, SolanaX402Server, X402ServerConfig};
//!
//! # async fn example(proof: PaymentProof) -> Result<(), Box<dyn std::error::Error>> {
//! let server = SolanaX402Server::initialize(X402ServerConfig::new(
//!     Network::Devnet,
//!     "8qEoLvRsumJpNCn7Q5PT19W5X5g62TKjCaMBDVBpu1hr",
//! ))
//! .await?;
//!
//! let challenge = server.create_402_response(Decimal::new(1, 2))?;
//! let requirements = challenge.header_requirements().unwrap();
//!
//! // ...client pays and comes back with a proof...
//! let verdict = server.verify_payment(&requirements.nonce, &proof).await?;
//! if verdict.accepted {
//!     // serve the resource
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod core;
pub mod gateway;
pub mod issuer;
pub mod replay;
pub mod types;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::config::{ConfigError, ServerConfig, X402ServerConfig};
pub use crate::constants::{
    LAMPORTS_PER_SOL, PAYMENT_OPTIONS_HEADER, PAYMENT_REQUIRED_HEADER, SOL_DECIMALS,
    SOLANA_DEVNET_RPC, SOLANA_MAINNET_RPC, SOLANA_TESTNET_RPC, X402_VERSION,
};
pub use crate::core::{InitializationError, SolanaX402Server};
pub use crate::gateway::{
    FetchOutcome, GatewayError, GatewayRetryPolicy, LedgerGateway, SolanaLedgerGateway,
    TransactionRecord,
};
pub use crate::issuer::{ChallengeIssuer, IssueError, lamports_from_decimal};
pub use crate::replay::{InMemoryReplayCache, ReplayCache, ReplayEntry};
pub use crate::types::{
    ConfirmationLevel, Network, NetworkParseError, PaymentMethod, PaymentOption, PaymentProof,
    PaymentRequirements, PaymentVerification, RejectReason, X402Response,
};
pub use crate::verifier::{PaymentVerifier, ProofError};
