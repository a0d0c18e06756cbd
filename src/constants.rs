//! Protocol constants.
//!
//! These values are advertised in every challenge and must stay stable across
//! a protocol version so independently-implemented clients keep interoperating.

/// x402 protocol version advertised in every `PaymentRequirements`.
pub const X402_VERSION: u8 = 1;

/// Decimal places of the native currency (1 SOL = 10^9 lamports).
pub const SOL_DECIMALS: u32 = 9;

/// Lamports per SOL, the fixed-point conversion factor.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Default public RPC endpoint for Solana devnet.
pub const SOLANA_DEVNET_RPC: &str = "https://api.devnet.solana.com";

/// Default public RPC endpoint for Solana testnet.
pub const SOLANA_TESTNET_RPC: &str = "https://api.testnet.solana.com";

/// Default public RPC endpoint for Solana mainnet-beta.
pub const SOLANA_MAINNET_RPC: &str = "https://api.mainnet-beta.solana.com";

/// Response header carrying the base64-encoded `PaymentRequirements` JSON.
pub const PAYMENT_REQUIRED_HEADER: &str = "X-Payment-Required";

/// Response header carrying the base64-encoded list of payment options.
pub const PAYMENT_OPTIONS_HEADER: &str = "X-Payment-Options";

/// How long an issued challenge stays valid, in seconds.
pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 300;

/// RPC calls that fail transiently are retried this many times.
pub const DEFAULT_RPC_MAX_ATTEMPTS: u32 = 3;

/// First retry delay; doubles on each subsequent attempt.
pub const DEFAULT_RPC_BACKOFF_MS: u64 = 250;

/// How long a submitted signature may stay invisible before it is treated as
/// nonexistent rather than still-propagating.
pub const DEFAULT_POLL_WINDOW_MS: u64 = 8_000;

/// Pause between signature-status polls inside the window.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
