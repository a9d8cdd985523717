use alloy::primitives::{address, Address};

/// x402 protocol version spoken by this crate.
pub const X402_VERSION: u32 = 2;

/// Base mainnet chain ID.
pub const BASE_CHAIN_ID: u64 = 8453;

/// CAIP-2 network identifier for Base mainnet.
pub const BASE_NETWORK: &str = "eip155:8453";

/// x402 scheme name for exact-amount payments.
pub const SCHEME_EXACT: &str = "exact";

/// USDC on Base mainnet.
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// USDC has 6 decimal places.
pub const TOKEN_DECIMALS: u32 = 6;

/// Request header carrying the base64-encoded payment payload.
pub const PAYMENT_HEADER: &str = "PAYMENT-SIGNATURE";

/// Response header carrying the base64-encoded settlement receipt.
pub const SETTLEMENT_HEADER: &str = "PAYMENT-RESPONSE";

/// Request header carrying the HMAC of a facilitator request body.
pub const FACILITATOR_AUTH_HEADER: &str = "X-Facilitator-Auth";

/// Default validity window for a signed authorization.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 60;

/// Runtime chain configuration. Decouples scheme implementations from
/// compile-time constants, enabling multi-chain support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub network: String,
    pub scheme_name: String,
    pub default_token: Address,
    pub token_decimals: u32,
    /// EIP-712 domain name of the token contract (e.g. "USD Coin").
    pub eip712_domain_name: String,
    /// EIP-712 domain version of the token contract.
    pub eip712_domain_version: String,
}

impl Default for ChainConfig {
    /// Defaults to USDC on Base mainnet.
    fn default() -> Self {
        Self {
            chain_id: BASE_CHAIN_ID,
            network: BASE_NETWORK.to_string(),
            scheme_name: SCHEME_EXACT.to_string(),
            default_token: USDC_BASE,
            token_decimals: TOKEN_DECIMALS,
            eip712_domain_name: "USD Coin".to_string(),
            eip712_domain_version: "2".to_string(),
        }
    }
}

impl ChainConfig {
    /// Parse the chain ID out of a CAIP-2 `eip155:<id>` identifier.
    pub fn chain_id_from_network(network: &str) -> Option<u64> {
        network.strip_prefix("eip155:")?.parse().ok()
    }
}
