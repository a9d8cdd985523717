use alloy::primitives::{Address, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

use crate::X402Error;

/// Signing capability bound to one account.
///
/// Implementations must tolerate concurrent use: the client signs one
/// authorization per paid request, each with a fresh nonce.
pub trait PaymentSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Sign a 32-byte prehash (an EIP-712 signing hash).
    fn sign_hash(&self, hash: &B256) -> Result<Signature, X402Error>;
}

impl PaymentSigner for PrivateKeySigner {
    fn address(&self) -> Address {
        PrivateKeySigner::address(self)
    }

    fn sign_hash(&self, hash: &B256) -> Result<Signature, X402Error> {
        self.sign_hash_sync(hash)
            .map_err(|e| X402Error::SignatureError(format!("signing failed: {e}")))
    }
}

/// Parse a hex private key (with or without 0x prefix) into a local signer.
pub fn signer_from_hex(key: &str) -> Result<PrivateKeySigner, X402Error> {
    key.trim()
        .parse()
        .map_err(|e| X402Error::ConfigError(format!("invalid private key: {e}")))
}
