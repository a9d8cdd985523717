//! The verification/settlement boundary as seen by a resource server.
//!
//! [`Facilitator`] is implemented by [`LocalFacilitator`] (schemes running in-process)
//! and by [`HttpFacilitatorClient`](crate::facilitator_client::HttpFacilitatorClient)
//! (a remote facilitator service).

use std::time::Duration;

use async_trait::async_trait;

use crate::payment::{PaymentPayload, PaymentRequirement};
use crate::response::{SettlementReceipt, VerifyResponse};
use crate::scheme::{SchemeFacilitator, SchemeRegistry};
use crate::X402Error;

#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Check an authorization against a requirement. Never moves funds.
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerifyResponse, X402Error>;

    /// Settle an authorization. Repeat calls with the same authorization return the
    /// recorded receipt without a second transfer.
    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementReceipt, X402Error>;

    /// Receipt of a completed settlement of this authorization, if any.
    async fn settlement_status(
        &self,
        _payload: &PaymentPayload,
        _requirement: &PaymentRequirement,
    ) -> Result<Option<SettlementReceipt>, X402Error> {
        Ok(None)
    }
}

/// In-process facilitator dispatching to registered facilitator schemes.
pub struct LocalFacilitator {
    schemes: SchemeRegistry<dyn SchemeFacilitator>,
    timeout: Duration,
}

impl LocalFacilitator {
    pub fn new(schemes: SchemeRegistry<dyn SchemeFacilitator>) -> Self {
        Self {
            schemes,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn schemes(&self) -> &SchemeRegistry<dyn SchemeFacilitator> {
        &self.schemes
    }

    fn scheme_for(
        &self,
        payload: &PaymentPayload,
    ) -> Result<&std::sync::Arc<dyn SchemeFacilitator>, X402Error> {
        self.schemes
            .get(&payload.scheme)
            .ok_or_else(|| X402Error::UnsupportedScheme(payload.scheme.clone()))
    }
}

#[async_trait]
impl Facilitator for LocalFacilitator {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerifyResponse, X402Error> {
        let scheme = self.scheme_for(payload)?;
        tokio::time::timeout(self.timeout, scheme.verify(payload, requirement))
            .await
            .map_err(|_| {
                X402Error::FacilitatorUnreachable(format!(
                    "verify timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementReceipt, X402Error> {
        let scheme = self.scheme_for(payload)?;
        tokio::time::timeout(self.timeout, scheme.settle(payload, requirement))
            .await
            .map_err(|_| {
                X402Error::SettlementFailed(format!(
                    "indeterminate: settle timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
    }

    async fn settlement_status(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<Option<SettlementReceipt>, X402Error> {
        let scheme = self.scheme_for(payload)?;
        scheme.settlement_status(payload, requirement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    #[async_trait]
    impl SchemeFacilitator for Stalled {
        fn scheme(&self) -> &str {
            "exact"
        }

        async fn verify(
            &self,
            _payload: &PaymentPayload,
            _requirement: &PaymentRequirement,
        ) -> Result<VerifyResponse, X402Error> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(VerifyResponse::valid("0x0"))
        }

        async fn settle(
            &self,
            _payload: &PaymentPayload,
            _requirement: &PaymentRequirement,
        ) -> Result<SettlementReceipt, X402Error> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(SettlementReceipt::failure("eip155:8453", "unreachable"))
        }

        async fn settlement_status(
            &self,
            _payload: &PaymentPayload,
            _requirement: &PaymentRequirement,
        ) -> Result<Option<SettlementReceipt>, X402Error> {
            Ok(None)
        }
    }

    fn payload(scheme: &str) -> PaymentPayload {
        PaymentPayload {
            x402_version: 2,
            scheme: scheme.to_string(),
            network: "eip155:8453".to_string(),
            payload: serde_json::json!({}),
        }
    }

    fn requirement() -> PaymentRequirement {
        PaymentRequirement {
            scheme: "exact".to_string(),
            network: "eip155:8453".to_string(),
            pay_to: "0x0000000000000000000000000000000000000001".to_string(),
            asset: crate::USDC_BASE.to_string(),
            amount: "1".to_string(),
            resource: "/".to_string(),
            description: None,
            mime_type: None,
            max_timeout_seconds: 60,
            extra: None,
        }
    }

    fn stalled() -> LocalFacilitator {
        LocalFacilitator::new(SchemeRegistry::<dyn SchemeFacilitator>::new().with(Stalled))
            .with_timeout(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_verify_timeout_is_unreachable() {
        let err = stalled()
            .verify(&payload("exact"), &requirement())
            .await
            .unwrap_err();
        assert!(matches!(err, X402Error::FacilitatorUnreachable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_settle_timeout_is_indeterminate() {
        let err = stalled()
            .settle(&payload("exact"), &requirement())
            .await
            .unwrap_err();
        assert!(matches!(err, X402Error::SettlementFailed(ref m) if m.starts_with("indeterminate")));
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        let err = stalled()
            .verify(&payload("upto"), &requirement())
            .await
            .unwrap_err();
        assert!(matches!(err, X402Error::UnsupportedScheme(_)));
    }
}
