//! Core trait definitions for the three-party payment model.
//!
//! - [`SchemeClient`]: client-side: creates signed payment payloads
//! - [`SchemeServer`]: server-side: parses prices and checks payload shape
//! - [`SchemeFacilitator`]: facilitator-side: verifies and settles payments
//!
//! Each side keeps a [`SchemeRegistry`] keyed by scheme identifier, so the
//! middleware and the client never branch on concrete scheme types.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::X402Error;
use crate::payment::{PaymentPayload, PaymentRequirement};
use crate::response::{SettlementReceipt, VerifyResponse};

/// Client-side scheme: creates signed payment payloads.
#[async_trait]
pub trait SchemeClient: Send + Sync {
    /// Scheme identifier this implementation handles (e.g. `"exact"`).
    fn scheme(&self) -> &str;

    /// Whether this client can pay the given requirement (network, asset, ...).
    fn supports(&self, requirement: &PaymentRequirement) -> bool;

    /// Create a signed payment payload for the given requirement.
    async fn create_payment_payload(
        &self,
        x402_version: u32,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentPayload, X402Error>;
}

/// Server-side scheme: parses prices into on-chain amounts and checks payload shape.
pub trait SchemeServer: Send + Sync {
    fn scheme(&self) -> &str;

    /// Network this server-side scheme builds requirements for.
    fn network(&self) -> &str;

    /// Parse a human-readable price string (e.g. "$0.001") into an amount and asset.
    fn parse_price(&self, price: &str) -> Result<(String, String), X402Error>;

    /// Scheme-specific `extra` data attached to every requirement.
    fn extra(&self) -> Option<serde_json::Value> {
        None
    }

    /// Reject payloads whose scheme-defined structure cannot be decoded.
    fn validate_payload(&self, payload: &PaymentPayload) -> Result<(), X402Error>;
}

/// Facilitator-side scheme: verifies and settles payments.
#[async_trait]
pub trait SchemeFacilitator: Send + Sync {
    fn scheme(&self) -> &str;

    /// Verify a payment payload against the requirement. Side-effect free.
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerifyResponse, X402Error>;

    /// Settle a payment exactly once per nonce; repeat calls return the stored receipt.
    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementReceipt, X402Error>;

    /// Outcome of an earlier settlement of this payload, if one was recorded.
    async fn settlement_status(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<Option<SettlementReceipt>, X402Error>;
}

/// Registry of schemes keyed by scheme identifier.
pub struct SchemeRegistry<T: ?Sized> {
    schemes: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> SchemeRegistry<T> {
    pub fn new() -> Self {
        Self {
            schemes: HashMap::new(),
        }
    }

    /// Register `scheme` under `id`, replacing any previous registration.
    pub fn register_as(&mut self, id: impl Into<String>, scheme: Arc<T>) {
        self.schemes.insert(id.into(), scheme);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<T>> {
        self.schemes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schemes.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.schemes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }
}

impl<T: ?Sized> Default for SchemeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for SchemeRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            schemes: self.schemes.clone(),
        }
    }
}

impl SchemeRegistry<dyn SchemeClient> {
    pub fn with(mut self, scheme: impl SchemeClient + 'static) -> Self {
        self.register_as(scheme.scheme().to_string(), Arc::new(scheme));
        self
    }
}

impl SchemeRegistry<dyn SchemeServer> {
    pub fn with(mut self, scheme: impl SchemeServer + 'static) -> Self {
        self.register_as(scheme.scheme().to_string(), Arc::new(scheme));
        self
    }
}

impl SchemeRegistry<dyn SchemeFacilitator> {
    pub fn with(mut self, scheme: impl SchemeFacilitator + 'static) -> Self {
        self.register_as(scheme.scheme().to_string(), Arc::new(scheme));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str);

    impl SchemeServer for Dummy {
        fn scheme(&self) -> &str {
            self.0
        }
        fn network(&self) -> &str {
            "test:1"
        }
        fn parse_price(&self, _price: &str) -> Result<(String, String), X402Error> {
            Ok(("1".to_string(), "asset".to_string()))
        }
        fn validate_payload(&self, _payload: &PaymentPayload) -> Result<(), X402Error> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_keyed_by_scheme_id() {
        let registry = SchemeRegistry::<dyn SchemeServer>::new()
            .with(Dummy("exact"))
            .with(Dummy("upto"));

        assert!(registry.contains("exact"));
        assert!(registry.contains("upto"));
        assert!(!registry.contains("stream"));
        assert_eq!(registry.get("upto").map(|s| s.scheme()), Some("upto"));

        let mut ids: Vec<_> = registry.ids().collect();
        ids.sort();
        assert_eq!(ids, vec!["exact", "upto"]);
    }

    #[test]
    fn test_registry_replaces_same_id() {
        let registry = SchemeRegistry::<dyn SchemeServer>::new()
            .with(Dummy("exact"))
            .with(Dummy("exact"));
        assert_eq!(registry.ids().count(), 1);
    }
}
