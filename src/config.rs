//! Server configuration and its startup validation.
use solana_pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::constants::DEFAULT_CHALLENGE_TTL_SECS;
use crate::types::{ConfirmationLevel, Network, NetworkParseError, PaymentOption};

/// Fatal configuration problems, surfaced at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    UnknownNetwork(#[from] NetworkParseError),
    #[error("recipient is not a valid base58 account address: {0}")]
    InvalidRecipient(String),
    #[error("network {0} has no default RPC endpoint, supply one explicitly")]
    EndpointRequired(Network),
    #[error("invalid RPC endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("challenge TTL must be greater than zero")]
    ZeroTtl,
    #[error("at least one payment option must be offered")]
    NoPaymentOptions,
    #[error("minimum finality must be at least confirmed")]
    FinalityBelowConfirmed,
}

/// Unvalidated server configuration, as supplied by the embedding
/// application. Pass it through [`X402ServerConfig::validate`] to obtain a
/// [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct X402ServerConfig {
    pub network: Network,
    pub recipient_address: String,
    /// Overrides the network's default RPC endpoint when set.
    pub rpc_endpoint: Option<String>,
    pub challenge_ttl_secs: u64,
    pub min_finality: ConfirmationLevel,
    pub options: Vec<PaymentOption>,
}

impl X402ServerConfig {
    pub fn new(network: Network, recipient_address: impl Into<String>) -> Self {
        Self {
            network,
            recipient_address: recipient_address.into(),
            rpc_endpoint: None,
            challenge_ttl_secs: DEFAULT_CHALLENGE_TTL_SECS,
            min_finality: ConfirmationLevel::Confirmed,
            options: vec![PaymentOption::DirectTransfer],
        }
    }

    /// Like [`X402ServerConfig::new`] but takes the network by name,
    /// rejecting names that do not identify a known environment.
    pub fn for_named_network(
        name: &str,
        recipient_address: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let network = Network::from_str(name)?;
        Ok(Self::new(network, recipient_address))
    }

    pub fn with_rpc_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.rpc_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_challenge_ttl(mut self, secs: u64) -> Self {
        self.challenge_ttl_secs = secs;
        self
    }

    pub fn with_min_finality(mut self, level: ConfirmationLevel) -> Self {
        self.min_finality = level;
        self
    }

    pub fn with_options(mut self, options: Vec<PaymentOption>) -> Self {
        self.options = options;
        self
    }

    /// Validates and normalizes the configuration.
    ///
    /// Checks the recipient parses as a 32-byte base58 account for the target
    /// ledger and resolves a concrete RPC endpoint from the network unless
    /// one was supplied. No side effects beyond the returned struct.
    pub fn validate(self) -> Result<ServerConfig, ConfigError> {
        let recipient = Pubkey::from_str(&self.recipient_address)
            .map_err(|_| ConfigError::InvalidRecipient(self.recipient_address.clone()))?;
        let endpoint = match &self.rpc_endpoint {
            Some(raw) => Url::parse(raw)?,
            None => {
                let default = self
                    .network
                    .default_rpc()
                    .ok_or_else(|| ConfigError::EndpointRequired(self.network.clone()))?;
                Url::parse(default)?
            }
        };
        if self.challenge_ttl_secs == 0 {
            return Err(ConfigError::ZeroTtl);
        }
        if self.options.is_empty() {
            return Err(ConfigError::NoPaymentOptions);
        }
        if self.min_finality < ConfirmationLevel::Confirmed {
            return Err(ConfigError::FinalityBelowConfirmed);
        }
        Ok(ServerConfig {
            network: self.network,
            recipient,
            rpc_endpoint: endpoint,
            challenge_ttl: Duration::from_secs(self.challenge_ttl_secs),
            min_finality: self.min_finality,
            options: self.options,
        })
    }
}

/// Validated, normalized server configuration. Immutable once built.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    network: Network,
    recipient: Pubkey,
    rpc_endpoint: Url,
    challenge_ttl: Duration,
    min_finality: ConfirmationLevel,
    options: Vec<PaymentOption>,
}

impl ServerConfig {
    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn recipient(&self) -> &Pubkey {
        &self.recipient
    }

    pub fn rpc_endpoint(&self) -> &Url {
        &self.rpc_endpoint
    }

    pub fn challenge_ttl(&self) -> Duration {
        self.challenge_ttl
    }

    pub fn min_finality(&self) -> ConfirmationLevel {
        self.min_finality
    }

    pub fn options(&self) -> &[PaymentOption] {
        &self.options
    }
}
