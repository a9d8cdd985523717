//! x402 HTTP payment protocol: per-request micropayments over HTTP 402.
//!
//! A resource server answers an unpaid request with `402 Payment Required` and a
//! [`Challenge`] listing accepted [`PaymentRequirement`]s. The client signs an
//! authorization for one of them and retries with a `PAYMENT-SIGNATURE` header; the
//! server verifies it through a [`Facilitator`], runs the handler, settles, and returns
//! a [`SettlementReceipt`] in `PAYMENT-RESPONSE`.
//!
//! # Three-party model
//!
//! - **Client** ([`ExactEvmSchemeClient`]): signs ERC-3009 authorizations
//! - **Server** ([`ExactEvmSchemeServer`]): prices routes and checks payload shape
//! - **Facilitator** ([`ExactEvmFacilitator`]): verifies signatures and settles exactly once
//!
//! Each side registers its schemes in a [`SchemeRegistry`] keyed by scheme identifier.

// Core types and traits
pub mod constants;
pub mod error;
pub mod headers;
pub mod hmac;
pub mod payment;
pub mod response;
pub mod scheme;
pub mod security;
pub mod signer;

// `exact` EVM scheme
pub mod backend;
pub mod eip712;
pub mod nonce_store;
pub mod scheme_client;
pub mod scheme_facilitator;
pub mod scheme_server;

// Facilitator boundary
pub mod facilitator;
pub mod facilitator_client;

use alloy::sol;

// ERC-3009 authorization as signed under the token's EIP-712 domain.
sol! {
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

// Re-exports
pub use constants::*;
pub use error::X402Error;
pub use payment::*;
pub use response::*;
pub use scheme::*;

pub use backend::{LedgerBackend, SettlementBackend, TransferRequest};
pub use facilitator::{Facilitator, LocalFacilitator};
pub use facilitator_client::{HttpFacilitatorClient, RetryPolicy};
pub use headers::{decode_payment, decode_receipt, encode_payment, encode_receipt};
pub use nonce_store::{InMemoryNonceStore, NonceStore, SqliteNonceStore};
pub use scheme_client::ExactEvmSchemeClient;
pub use scheme_facilitator::ExactEvmFacilitator;
pub use scheme_server::ExactEvmSchemeServer;
pub use signer::{signer_from_hex, PaymentSigner};
