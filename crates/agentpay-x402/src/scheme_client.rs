use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use crate::eip712::{domain_for_requirement, encode_signature_hex, random_nonce, signing_hash};
use crate::payment::{ExactEvmPayload, PaymentPayload, PaymentRequirement};
use crate::signer::PaymentSigner;
use crate::{ChainConfig, SchemeClient, TransferWithAuthorization, X402Error};

/// Client-side `exact` EVM scheme: signs ERC-3009 authorizations with EIP-712.
pub struct ExactEvmSchemeClient<S> {
    signer: S,
    config: ChainConfig,
}

impl<S: PaymentSigner> ExactEvmSchemeClient<S> {
    /// Create a new client for USDC on Base.
    pub fn new(signer: S) -> Self {
        Self {
            signer,
            config: ChainConfig::default(),
        }
    }

    pub fn with_chain_config(signer: S, config: ChainConfig) -> Self {
        Self { signer, config }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

#[async_trait]
impl<S: PaymentSigner> SchemeClient for ExactEvmSchemeClient<S> {
    fn scheme(&self) -> &str {
        &self.config.scheme_name
    }

    fn supports(&self, requirement: &PaymentRequirement) -> bool {
        requirement.scheme == self.config.scheme_name
            && ChainConfig::chain_id_from_network(&requirement.network)
                == Some(self.config.chain_id)
            && requirement.asset.parse::<Address>().is_ok()
            && requirement.pay_to.parse::<Address>().is_ok()
    }

    async fn create_payment_payload(
        &self,
        x402_version: u32,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentPayload, X402Error> {
        let pay_to: Address = requirement.pay_to.parse().map_err(|e| {
            X402Error::MalformedPayment(format!("invalid payTo '{}': {e}", requirement.pay_to))
        })?;
        let value = requirement.amount.parse::<U256>().map_err(|e| {
            X402Error::MalformedPayment(format!("invalid amount '{}': {e}", requirement.amount))
        })?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| X402Error::ConfigError(format!("system time error: {e}")))?
            .as_secs();

        // Backdated to tolerate clock skew against the facilitator.
        let valid_after = now.saturating_sub(60);
        let valid_before = now.checked_add(requirement.max_timeout_seconds).ok_or_else(|| {
            X402Error::MalformedPayment(format!(
                "maxTimeoutSeconds {} is out of range",
                requirement.max_timeout_seconds
            ))
        })?;
        let nonce = random_nonce();

        let auth = TransferWithAuthorization {
            from: self.signer.address(),
            to: pay_to,
            value,
            validAfter: U256::from(valid_after),
            validBefore: U256::from(valid_before),
            nonce,
        };
        let domain = domain_for_requirement(requirement, &self.config)?;
        let sig = self.signer.sign_hash(&signing_hash(&auth, &domain))?;

        ExactEvmPayload {
            from: auth.from,
            to: pay_to,
            value: requirement.amount.clone(),
            valid_after,
            valid_before,
            nonce,
            signature: encode_signature_hex(&sig),
        }
        .into_payload(x402_version, &requirement.scheme, &requirement.network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BASE_NETWORK, SCHEME_EXACT, USDC_BASE};
    use alloy::signers::local::PrivateKeySigner;

    fn requirement() -> PaymentRequirement {
        PaymentRequirement {
            scheme: SCHEME_EXACT.to_string(),
            network: BASE_NETWORK.to_string(),
            pay_to: Address::repeat_byte(0x33).to_string(),
            asset: USDC_BASE.to_string(),
            amount: "1000".to_string(),
            resource: "/weather".to_string(),
            description: None,
            mime_type: None,
            max_timeout_seconds: 30,
            extra: None,
        }
    }

    #[tokio::test]
    async fn test_create_payment_payload() {
        let signer = PrivateKeySigner::random();
        let client = ExactEvmSchemeClient::new(signer.clone());

        let payload = client
            .create_payment_payload(2, &requirement())
            .await
            .unwrap();
        assert_eq!(payload.x402_version, 2);
        assert_eq!(payload.network, BASE_NETWORK);

        let exact = ExactEvmPayload::from_payload(&payload).unwrap();
        assert_eq!(exact.from, signer.address());
        assert_eq!(exact.value, "1000");
        assert_eq!(exact.valid_before - exact.valid_after, 90);
        assert_eq!(exact.signature.len(), 132);
    }

    #[tokio::test]
    async fn test_fresh_nonce_per_payload() {
        let client = ExactEvmSchemeClient::new(PrivateKeySigner::random());
        let a = client.create_payment_payload(2, &requirement()).await.unwrap();
        let b = client.create_payment_payload(2, &requirement()).await.unwrap();
        assert_ne!(
            ExactEvmPayload::from_payload(&a).unwrap().nonce,
            ExactEvmPayload::from_payload(&b).unwrap().nonce
        );
    }

    #[tokio::test]
    async fn test_overflowing_timeout_is_malformed() {
        let client = ExactEvmSchemeClient::new(PrivateKeySigner::random());
        let mut hostile = requirement();
        hostile.max_timeout_seconds = u64::MAX;

        let err = client.create_payment_payload(2, &hostile).await.unwrap_err();
        assert!(matches!(err, X402Error::MalformedPayment(ref m) if m.contains("maxTimeoutSeconds")));
    }

    #[test]
    fn test_supports_only_configured_chain() {
        let client = ExactEvmSchemeClient::new(PrivateKeySigner::random());
        assert!(client.supports(&requirement()));

        let mut other_chain = requirement();
        other_chain.network = "eip155:1".to_string();
        assert!(!client.supports(&other_chain));

        let mut other_scheme = requirement();
        other_scheme.scheme = "upto".to_string();
        assert!(!client.supports(&other_scheme));
    }
}
