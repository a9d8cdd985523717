use alloy::primitives::{Address, FixedBytes};
use serde::{Deserialize, Serialize};

use crate::error::X402Error;

/// One accepted way to pay for a resource (an entry in the `accepts` array of a 402).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub scheme: String,
    /// CAIP-2 network identifier, e.g. `eip155:8453`.
    pub network: String,
    pub pay_to: String,
    pub asset: String,
    /// Exact price in the asset's smallest unit, as a decimal integer string.
    pub amount: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub max_timeout_seconds: u64,
    /// Scheme-specific data (for `exact` EVM: the token's EIP-712 domain name and version).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirement {
    /// Whether a payload targets this requirement's scheme and network.
    pub fn matches(&self, payload: &PaymentPayload) -> bool {
        self.scheme == payload.scheme && self.network == payload.network
    }

    /// Read a string field out of `extra`.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.as_ref()?.get(key)?.as_str()
    }
}

/// The 402 response body returned by the resource server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub x402_version: u32,
    /// Accepted requirements in server preference order.
    pub accepts: Vec<PaymentRequirement>,
    /// Why a previous authorization was rejected, if one was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Challenge {
    pub fn new(accepts: Vec<PaymentRequirement>) -> Self {
        Self {
            x402_version: crate::X402_VERSION,
            accepts,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A signed promise to pay (sent in the PAYMENT-SIGNATURE header, base64-encoded JSON).
///
/// The envelope is scheme-agnostic; `payload` is owned by the scheme named in `scheme`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: serde_json::Value,
}

impl PaymentPayload {
    /// Best-effort payer identifier for logging; schemes that carry a `from` field expose it.
    pub fn payer_hint(&self) -> Option<&str> {
        self.payload.get("from")?.as_str()
    }
}

/// Payload of the `exact` EVM scheme: an ERC-3009 `transferWithAuthorization` signed via EIP-712.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub from: Address,
    pub to: Address,
    pub value: String,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: FixedBytes<32>,
    pub signature: String,
}

impl ExactEvmPayload {
    /// Decode the scheme payload out of an envelope.
    pub fn from_payload(payload: &PaymentPayload) -> Result<Self, X402Error> {
        serde_json::from_value(payload.payload.clone())
            .map_err(|e| X402Error::MalformedPayment(format!("invalid exact payload: {e}")))
    }

    /// Wrap into an envelope for the given scheme and network.
    pub fn into_payload(
        self,
        x402_version: u32,
        scheme: &str,
        network: &str,
    ) -> Result<PaymentPayload, X402Error> {
        Ok(PaymentPayload {
            x402_version,
            scheme: scheme.to_string(),
            network: network.to_string(),
            payload: serde_json::to_value(self)?,
        })
    }
}
