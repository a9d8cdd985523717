//! EIP-712 typed-data signing for ERC-3009 `TransferWithAuthorization`.
//!
//! Provides functions for:
//! - Building the token's EIP-712 domain ([`authorization_domain`], [`domain_for_requirement`])
//! - Computing signing hashes ([`signing_hash`])
//! - Verifying signatures with EIP-2 malleability protection ([`verify_signature`])
//! - Generating cryptographically secure random nonces ([`random_nonce`])
//! - Encoding and decoding hex signatures

use alloy::primitives::{Address, FixedBytes, Signature, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};

use crate::payment::PaymentRequirement;
use crate::TransferWithAuthorization;
use crate::{ChainConfig, X402Error};

/// Build the EIP-712 domain of a token contract.
pub fn authorization_domain(
    name: &str,
    version: &str,
    chain_id: u64,
    token: Address,
) -> Eip712Domain {
    Eip712Domain {
        name: Some(std::borrow::Cow::Owned(name.to_string())),
        version: Some(std::borrow::Cow::Owned(version.to_string())),
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(token),
        salt: None,
    }
}

/// Build the domain a requirement asks the payer to sign under.
///
/// The token's domain `name`/`version` come from `requirement.extra`, falling back to
/// the chain config; the chain ID comes from the CAIP-2 network.
pub fn domain_for_requirement(
    requirement: &PaymentRequirement,
    config: &ChainConfig,
) -> Result<Eip712Domain, X402Error> {
    let chain_id = ChainConfig::chain_id_from_network(&requirement.network).ok_or_else(|| {
        X402Error::UnsupportedScheme(format!(
            "network '{}' is not an eip155 chain",
            requirement.network
        ))
    })?;
    let token: Address = requirement.asset.parse().map_err(|e| {
        X402Error::MalformedPayment(format!("invalid asset '{}': {e}", requirement.asset))
    })?;
    let name = requirement
        .extra_str("name")
        .unwrap_or(&config.eip712_domain_name);
    let version = requirement
        .extra_str("version")
        .unwrap_or(&config.eip712_domain_version);
    Ok(authorization_domain(name, version, chain_id, token))
}

/// Compute the EIP-712 signing hash of an authorization under `domain`.
pub fn signing_hash(auth: &TransferWithAuthorization, domain: &Eip712Domain) -> B256 {
    auth.eip712_signing_hash(domain)
}

/// secp256k1 curve order N / 2. Signatures with s > this are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xDFE92F46681B20A0,
    0x5D576E7357A4501D,
    0xFFFFFFFFFFFFFFFF,
    0x7FFFFFFFFFFFFFFF,
]);

/// Recover the signer of an authorization. Rejects high-s signatures (EIP-2).
pub fn verify_signature(
    auth: &TransferWithAuthorization,
    signature_bytes: &[u8],
    domain: &Eip712Domain,
) -> Result<Address, X402Error> {
    if signature_bytes.len() != 65 {
        return Err(X402Error::SignatureError(format!(
            "signature must be 65 bytes, got {}",
            signature_bytes.len()
        )));
    }

    let sig = Signature::from_raw(signature_bytes)
        .map_err(|e| X402Error::SignatureError(format!("invalid signature: {e}")))?;

    if sig.s() > SECP256K1_N_DIV_2 {
        return Err(X402Error::SignatureError(
            "high-s signature rejected (EIP-2 malleability)".to_string(),
        ));
    }

    let hash = signing_hash(auth, domain);
    sig.recover_address_from_prehash(&hash)
        .map_err(|e| X402Error::SignatureError(format!("recovery failed: {e}")))
}

/// Generate a random 32-byte nonce (keccak256 of 32 random bytes from the OS CSPRNG).
pub fn random_nonce() -> FixedBytes<32> {
    use alloy::primitives::keccak256;
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    keccak256(bytes)
}

/// Encode a Signature to a hex string with 0x prefix (65 bytes -> 0x + 130 hex).
pub fn encode_signature_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

/// Decode a 0x-prefixed (or bare) hex signature.
pub fn decode_signature_hex(signature: &str) -> Result<Vec<u8>, X402Error> {
    alloy::hex::decode(signature.strip_prefix("0x").unwrap_or(signature))
        .map_err(|e| X402Error::SignatureError(format!("invalid hex signature: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn domain() -> Eip712Domain {
        let config = ChainConfig::default();
        authorization_domain(
            &config.eip712_domain_name,
            &config.eip712_domain_version,
            config.chain_id,
            config.default_token,
        )
    }

    fn auth(from: Address) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from,
            to: Address::repeat_byte(0x22),
            value: U256::from(1000u64),
            validAfter: U256::ZERO,
            validBefore: U256::from(u64::MAX),
            nonce: FixedBytes::ZERO,
        }
    }

    #[test]
    fn test_sign_and_recover() {
        let signer = PrivateKeySigner::random();
        let auth = auth(signer.address());

        let sig = signer.sign_hash_sync(&signing_hash(&auth, &domain())).unwrap();
        let sig_bytes = decode_signature_hex(&encode_signature_hex(&sig)).unwrap();

        let recovered = verify_signature(&auth, &sig_bytes, &domain()).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn test_domain_binds_chain() {
        let signer = PrivateKeySigner::random();
        let auth = auth(signer.address());
        let sig = signer.sign_hash_sync(&signing_hash(&auth, &domain())).unwrap();

        let config = ChainConfig::default();
        let other_chain = authorization_domain(
            &config.eip712_domain_name,
            &config.eip712_domain_version,
            84532,
            config.default_token,
        );
        let recovered = verify_signature(&auth, &sig.as_bytes(), &other_chain).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn test_rejects_short_signature() {
        let result = verify_signature(&auth(Address::ZERO), &[0xde, 0xad], &domain());
        assert!(matches!(result, Err(X402Error::SignatureError(_))));
    }

    #[test]
    fn test_rejects_high_s() {
        let high_s = SECP256K1_N_DIV_2 + U256::from(1u64);
        let sig = Signature::new(U256::from(42u64), high_s, false);
        let result = verify_signature(&auth(Address::ZERO), &sig.as_bytes(), &domain());
        assert!(matches!(result, Err(X402Error::SignatureError(_))));
    }

    #[test]
    fn test_random_nonce_is_unique() {
        assert_ne!(random_nonce(), random_nonce());
    }

    #[test]
    fn test_domain_for_requirement_prefers_extra() {
        let requirement = PaymentRequirement {
            scheme: "exact".to_string(),
            network: "eip155:84532".to_string(),
            pay_to: Address::ZERO.to_string(),
            asset: crate::USDC_BASE.to_string(),
            amount: "1".to_string(),
            resource: "/weather".to_string(),
            description: None,
            mime_type: None,
            max_timeout_seconds: 60,
            extra: Some(serde_json::json!({ "name": "USDC", "version": "2" })),
        };
        let domain = domain_for_requirement(&requirement, &ChainConfig::default()).unwrap();
        assert_eq!(domain.name.as_deref(), Some("USDC"));
        assert_eq!(domain.chain_id, Some(U256::from(84532u64)));
    }
}
