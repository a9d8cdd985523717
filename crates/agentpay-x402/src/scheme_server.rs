use crate::payment::{ExactEvmPayload, PaymentPayload};
use crate::{ChainConfig, SchemeServer, X402Error};

/// Server-side `exact` EVM scheme: parses prices and checks payload shape.
pub struct ExactEvmSchemeServer {
    config: ChainConfig,
}

impl ExactEvmSchemeServer {
    pub fn new() -> Self {
        Self {
            config: ChainConfig::default(),
        }
    }

    pub fn with_chain_config(config: ChainConfig) -> Self {
        Self { config }
    }

    fn invalid(price: &str, detail: impl std::fmt::Display) -> X402Error {
        X402Error::ConfigError(format!("invalid price '{price}': {detail}"))
    }
}

impl Default for ExactEvmSchemeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemeServer for ExactEvmSchemeServer {
    fn scheme(&self) -> &str {
        &self.config.scheme_name
    }

    fn network(&self) -> &str {
        &self.config.network
    }

    /// Integer-only conversion of "$X.YZ" into the token's smallest unit.
    fn parse_price(&self, price: &str) -> Result<(String, String), X402Error> {
        let cleaned = price.trim().trim_start_matches('$');
        if cleaned.is_empty() {
            return Err(Self::invalid(price, "no numeric content"));
        }
        if !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(Self::invalid(price, "unexpected characters"));
        }

        let decimals = self.config.token_decimals as usize;
        let (integer_part, fractional_part) = cleaned.split_once('.').unwrap_or((cleaned, ""));
        if fractional_part.contains('.') {
            return Err(Self::invalid(price, "more than one decimal point"));
        }
        if fractional_part.len() > decimals {
            return Err(Self::invalid(
                price,
                format!("more than {decimals} decimal places"),
            ));
        }

        let integer: u64 = if integer_part.is_empty() {
            0
        } else {
            integer_part
                .parse()
                .map_err(|e| Self::invalid(price, format!("integer part: {e}")))?
        };
        // Right-pad the fraction to exactly `decimals` digits.
        let fractional: u64 = if fractional_part.is_empty() {
            0
        } else {
            format!("{fractional_part:0<decimals$}")
                .parse()
                .map_err(|e| Self::invalid(price, format!("fractional part: {e}")))?
        };

        let amount = 10u64
            .checked_pow(self.config.token_decimals)
            .and_then(|m| integer.checked_mul(m))
            .and_then(|i| i.checked_add(fractional))
            .ok_or_else(|| Self::invalid(price, "overflow"))?;
        if amount == 0 {
            return Err(Self::invalid(price, "price must be non-zero"));
        }

        Ok((amount.to_string(), self.config.default_token.to_string()))
    }

    fn extra(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "name": self.config.eip712_domain_name,
            "version": self.config.eip712_domain_version,
        }))
    }

    fn validate_payload(&self, payload: &PaymentPayload) -> Result<(), X402Error> {
        let exact = ExactEvmPayload::from_payload(payload)?;
        crate::eip712::decode_signature_hex(&exact.signature)
            .map_err(|e| X402Error::MalformedPayment(e.to_string()))?;
        Ok(())
    }
}
