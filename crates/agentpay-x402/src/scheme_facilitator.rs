use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::Eip712Domain;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::backend::{SettlementBackend, TransferRequest};
use crate::eip712::{decode_signature_hex, domain_for_requirement, signing_hash, verify_signature};
use crate::nonce_store::{InMemoryNonceStore, NonceKey, NonceState, NonceStore};
use crate::payment::{ExactEvmPayload, PaymentPayload, PaymentRequirement};
use crate::response::{SettlementReceipt, VerifyResponse};
use crate::{ChainConfig, SchemeFacilitator, TransferWithAuthorization, X402Error, X402_VERSION};

/// A decoded `exact` authorization, bound to the requirement it is checked against.
struct Authorization {
    exact: ExactEvmPayload,
    auth: TransferWithAuthorization,
    domain: Eip712Domain,
    token: Address,
    key: NonceKey,
    /// EIP-712 signing hash; identifies the authorization for idempotent settlement.
    fingerprint: B256,
}

/// Facilitator-side `exact` EVM scheme: verifies ERC-3009 authorizations and settles
/// them exactly once through a [`SettlementBackend`].
pub struct ExactEvmFacilitator<B> {
    backend: Arc<B>,
    config: ChainConfig,
    nonce_store: Arc<dyn NonceStore>,
    /// Per-payer mutex so a payer's settle calls run one at a time.
    payer_locks: Arc<DashMap<Address, Arc<Mutex<()>>>>,
    /// Upper bound on `validBefore - validAfter`, also the nonce retention period.
    max_timeout_seconds: u64,
    /// Accepted token addresses. Empty = accept any token.
    accepted_tokens: Vec<Address>,
    /// Unix seconds used for the validity-window checks.
    clock: fn() -> Result<u64, X402Error>,
}

impl<B> ExactEvmFacilitator<B> {
    /// Create a facilitator for USDC on Base with an in-memory nonce store.
    ///
    /// # Warning
    /// The in-memory store loses settlement records on restart. For production use,
    /// chain `.with_nonce_store(sqlite_store)`.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_chain_config(backend, ChainConfig::default())
    }

    pub fn with_chain_config(backend: Arc<B>, config: ChainConfig) -> Self {
        Self {
            backend,
            config,
            nonce_store: Arc::new(InMemoryNonceStore::new()),
            payer_locks: Arc::new(DashMap::new()),
            max_timeout_seconds: 300,
            accepted_tokens: vec![],
            clock: unix_now,
        }
    }

    /// Set a custom nonce store (e.g. SqliteNonceStore for persistence).
    pub fn with_nonce_store(mut self, store: Arc<dyn NonceStore>) -> Self {
        self.nonce_store = store;
        self
    }

    pub fn with_max_timeout_seconds(mut self, secs: u64) -> Self {
        self.max_timeout_seconds = secs;
        self
    }

    /// Restrict accepted token addresses.
    pub fn with_accepted_tokens(mut self, tokens: Vec<Address>) -> Self {
        self.accepted_tokens = tokens;
        self
    }

    /// Replace the wall clock used for validity-window checks.
    pub fn with_clock(mut self, clock: fn() -> Result<u64, X402Error>) -> Self {
        self.clock = clock;
        self
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Start a background task that purges expired settlement records and idle payer
    /// locks every 60 seconds.
    pub fn start_nonce_cleanup(&self) {
        let store = Arc::clone(&self.nonce_store);
        let payer_locks = Arc::clone(&self.payer_locks);
        let expiry_secs = self.max_timeout_seconds.saturating_add(60);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let purged = store.purge_expired(expiry_secs);
                if purged > 0 {
                    tracing::info!(purged, "purged expired settlement records");
                }

                // A lock is idle when only the map holds it and nobody has it locked.
                let before = payer_locks.len();
                payer_locks
                    .retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
                let removed = before - payer_locks.len();
                if removed > 0 {
                    tracing::info!(removed, "cleaned up idle payer locks");
                }
            }
        });
    }

    const MAX_PAYER_LOCKS: usize = 100_000;

    fn payer_lock(&self, payer: Address) -> Result<Arc<Mutex<()>>, X402Error> {
        if self.payer_locks.len() >= Self::MAX_PAYER_LOCKS && !self.payer_locks.contains_key(&payer)
        {
            return Err(X402Error::SettlementFailed(
                "too many concurrent payers, try again later".to_string(),
            ));
        }
        Ok(self
            .payer_locks
            .entry(payer)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Envelope checks and payload decoding. `Err` carries the rejection reason.
    fn decode(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<Authorization, String> {
        if payload.x402_version != X402_VERSION {
            return Err(format!(
                "Unsupported x402 version: {} (expected {X402_VERSION})",
                payload.x402_version
            ));
        }
        if requirement.scheme != self.config.scheme_name || payload.scheme != requirement.scheme {
            return Err(format!(
                "Scheme mismatch: expected '{}', got '{}'",
                requirement.scheme, payload.scheme
            ));
        }
        if requirement.network != self.config.network || payload.network != requirement.network {
            return Err(format!(
                "Network mismatch: expected '{}', got '{}'",
                self.config.network, requirement.network
            ));
        }

        let exact = ExactEvmPayload::from_payload(payload).map_err(|e| e.to_string())?;
        let value = exact
            .value
            .parse::<U256>()
            .map_err(|e| format!("Invalid payment value: {e}"))?;
        let domain = domain_for_requirement(requirement, &self.config).map_err(|e| e.to_string())?;
        let token = domain.verifying_contract.unwrap_or(Address::ZERO);

        let auth = TransferWithAuthorization {
            from: exact.from,
            to: exact.to,
            value,
            validAfter: U256::from(exact.valid_after),
            validBefore: U256::from(exact.valid_before),
            nonce: exact.nonce,
        };
        let fingerprint = signing_hash(&auth, &domain);
        let key = NonceKey {
            payer: exact.from,
            network: payload.network.clone(),
            nonce: exact.nonce,
        };

        Ok(Authorization {
            exact,
            auth,
            domain,
            token,
            key,
            fingerprint,
        })
    }

    /// Everything between decoding and the nonce lookup. Returns the rejection reason.
    fn check(
        &self,
        a: &Authorization,
        requirement: &PaymentRequirement,
        now: u64,
    ) -> Option<String> {
        let p = &a.exact;

        if now < p.valid_after {
            return Some("Authorization not yet valid".to_string());
        }
        if now > p.valid_before {
            return Some("Authorization expired".to_string());
        }

        // Bounds how long a nonce must be remembered.
        let max_window = self
            .max_timeout_seconds
            .min(requirement.max_timeout_seconds.saturating_add(60));
        let validity_window = p.valid_before.saturating_sub(p.valid_after);
        if validity_window > max_window {
            return Some(format!(
                "Validity window too large: {validity_window}s exceeds max {max_window}s"
            ));
        }

        if p.from == Address::ZERO {
            return Some("Payer address cannot be zero".to_string());
        }
        if p.to == Address::ZERO {
            return Some("Recipient address is zero".to_string());
        }
        if a.token == Address::ZERO {
            return Some("Token address is zero".to_string());
        }
        if p.from == p.to {
            return Some("Self-payment not allowed".to_string());
        }
        if !self.accepted_tokens.is_empty() && !self.accepted_tokens.contains(&a.token) {
            return Some("Token not in facilitator's accepted token list".to_string());
        }

        let recovered = decode_signature_hex(&p.signature)
            .and_then(|bytes| verify_signature(&a.auth, &bytes, &a.domain));
        match recovered {
            Ok(signer) if signer == p.from => {}
            Ok(_) => return Some("Invalid signature".to_string()),
            Err(e) => return Some(format!("Invalid signature: {e}")),
        }

        match requirement.pay_to.parse::<Address>() {
            Ok(pay_to) if pay_to == p.to => {}
            _ => return Some("Recipient mismatch".to_string()),
        }

        let required = match requirement.amount.parse::<U256>() {
            Ok(required) if !required.is_zero() => required,
            _ => return Some("Required amount must be a non-zero integer".to_string()),
        };
        if a.auth.value < required {
            return Some("Payment amount below required".to_string());
        }
        if a.auth.value > required {
            return Some("Payment amount exceeds required".to_string());
        }

        None
    }
}

fn unix_now() -> Result<u64, X402Error> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| X402Error::ConfigError(format!("system time error: {e}")))?
        .as_secs())
}

#[async_trait]
impl<B> SchemeFacilitator for ExactEvmFacilitator<B>
where
    B: SettlementBackend + 'static,
{
    fn scheme(&self) -> &str {
        &self.config.scheme_name
    }

    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerifyResponse, X402Error> {
        let a = match self.decode(payload, requirement) {
            Ok(a) => a,
            Err(reason) => return Ok(VerifyResponse::invalid(reason)),
        };
        let payer = a.exact.from.to_string();

        if let Some(reason) = self.check(&a, requirement, (self.clock)()?) {
            tracing::debug!(payer = %payer, reason = %reason, "payment verification failed");
            return Ok(VerifyResponse::invalid(reason).with_payer(payer));
        }

        if self.nonce_store.get(&a.key).is_some() {
            tracing::warn!(
                nonce = %format!("{:.8}", a.exact.nonce),
                payer = %payer,
                "replayed nonce rejected"
            );
            return Ok(VerifyResponse::invalid("Nonce already used").with_payer(payer));
        }

        tracing::info!(
            payer = %payer,
            amount = %a.auth.value,
            nonce = %format!("{:.8}", a.exact.nonce),
            "payment verification succeeded"
        );
        Ok(VerifyResponse::valid(payer))
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementReceipt, X402Error> {
        let network = requirement.network.clone();
        let a = match self.decode(payload, requirement) {
            Ok(a) => a,
            Err(reason) => return Ok(SettlementReceipt::failure(network, reason)),
        };
        let payer = a.exact.from.to_string();
        let parties = (Some(payer.clone()), Some(a.exact.to.to_string()));

        let lock = self.payer_lock(a.exact.from)?;
        let _guard = lock.lock().await;

        if let Some(record) = self.nonce_store.get(&a.key) {
            if record.fingerprint != a.fingerprint {
                tracing::warn!(
                    nonce = %format!("{:.8}", a.exact.nonce),
                    payer = %payer,
                    "nonce reused by a different authorization"
                );
                return Ok(SettlementReceipt::failure(network, "Nonce already used")
                    .with_parties(parties.0, parties.1));
            }
            return match record.state {
                NonceState::Settled(receipt) => {
                    tracing::info!(
                        nonce = %format!("{:.8}", a.exact.nonce),
                        payer = %payer,
                        "returning recorded settlement"
                    );
                    Ok(receipt)
                }
                NonceState::Pending => Err(X402Error::SettlementFailed(
                    "indeterminate: an earlier settlement of this authorization did not complete"
                        .to_string(),
                )),
            };
        }

        if let Some(reason) = self.check(&a, requirement, (self.clock)()?) {
            tracing::warn!(payer = %payer, reason = %reason, "settlement rejected after re-verification");
            return Ok(SettlementReceipt::failure(network, reason).with_parties(parties.0, parties.1));
        }

        if !self.nonce_store.try_claim(&a.key, a.fingerprint) {
            tracing::warn!(
                nonce = %format!("{:.8}", a.exact.nonce),
                payer = %payer,
                "nonce race: another request claimed it first"
            );
            return Ok(
                SettlementReceipt::failure(network, "Nonce already used (concurrent request)")
                    .with_parties(parties.0, parties.1),
            );
        }

        let request = TransferRequest {
            network: network.clone(),
            token: a.token,
            from: a.exact.from,
            to: a.exact.to,
            value: a.auth.value,
            nonce: a.exact.nonce,
            signature: a.exact.signature.clone(),
        };
        // The nonce stays claimed on failure: the transfer may still land.
        let tx = match self.backend.transfer(&request).await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(
                    nonce = %format!("{:.8}", a.exact.nonce),
                    payer = %payer,
                    error = %e,
                    "transfer failed, nonce remains claimed"
                );
                return Err(X402Error::SettlementFailed(format!("indeterminate: {e}")));
            }
        };

        let receipt = SettlementReceipt {
            success: true,
            error_reason: None,
            transaction: Some(tx),
            network,
            payer: parties.0,
            payee: parties.1,
        };
        self.nonce_store.complete(&a.key, &receipt);

        tracing::info!(
            payer = %payer,
            amount = %a.auth.value,
            nonce = %format!("{:.8}", a.exact.nonce),
            tx = receipt.transaction.as_deref().unwrap_or_default(),
            "payment settled successfully"
        );
        Ok(receipt)
    }

    async fn settlement_status(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<Option<SettlementReceipt>, X402Error> {
        let Ok(a) = self.decode(payload, requirement) else {
            return Ok(None);
        };
        Ok(match self.nonce_store.get(&a.key) {
            Some(record) if record.fingerprint == a.fingerprint => match record.state {
                NonceState::Settled(receipt) => Some(receipt),
                NonceState::Pending => None,
            },
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LedgerBackend;
    use crate::scheme_client::ExactEvmSchemeClient;
    use crate::{SchemeClient, USDC_BASE};
    use alloy::signers::local::PrivateKeySigner;

    fn requirement(pay_to: Address) -> PaymentRequirement {
        PaymentRequirement {
            scheme: "exact".to_string(),
            network: "eip155:8453".to_string(),
            pay_to: pay_to.to_string(),
            asset: USDC_BASE.to_string(),
            amount: "1000".to_string(),
            resource: "/weather".to_string(),
            description: None,
            mime_type: None,
            max_timeout_seconds: 60,
            extra: Some(serde_json::json!({ "name": "USD Coin", "version": "2" })),
        }
    }

    async fn signed(req: &PaymentRequirement) -> PaymentPayload {
        ExactEvmSchemeClient::new(PrivateKeySigner::random())
            .create_payment_payload(X402_VERSION, req)
            .await
            .unwrap()
    }

    fn facilitator() -> ExactEvmFacilitator<LedgerBackend> {
        ExactEvmFacilitator::new(Arc::new(LedgerBackend::new()))
    }

    #[tokio::test]
    async fn test_verify_valid() {
        let req = requirement(Address::repeat_byte(0x22));
        let payload = signed(&req).await;
        let resp = facilitator().verify(&payload, &req).await.unwrap();
        assert!(resp.is_valid, "{:?}", resp.invalid_reason);
        assert!(resp
            .payer
            .as_deref()
            .unwrap()
            .eq_ignore_ascii_case(payload.payer_hint().unwrap()));
    }

    #[tokio::test]
    async fn test_verify_survives_huge_requirement_timeout() {
        let req = requirement(Address::repeat_byte(0x22));
        let payload = signed(&req).await;

        let mut huge = req.clone();
        huge.max_timeout_seconds = u64::MAX;
        let resp = facilitator().verify(&payload, &huge).await.unwrap();
        assert!(resp.is_valid, "{:?}", resp.invalid_reason);
    }

    #[tokio::test]
    async fn test_verify_rejects_mismatched_amount() {
        let req = requirement(Address::repeat_byte(0x22));
        let fac = facilitator();

        let mut cheaper = req.clone();
        cheaper.amount = "999".to_string();
        let payload = signed(&cheaper).await;
        let resp = fac.verify(&payload, &req).await.unwrap();
        assert_eq!(
            resp.invalid_reason.as_deref(),
            Some("Payment amount below required")
        );

        let mut pricier = req.clone();
        pricier.amount = "1001".to_string();
        let payload = signed(&pricier).await;
        let resp = fac.verify(&payload, &req).await.unwrap();
        assert_eq!(
            resp.invalid_reason.as_deref(),
            Some("Payment amount exceeds required")
        );
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let req = requirement(Address::repeat_byte(0x22));
        let payload = signed(&req).await;
        let fac = facilitator();

        let first = fac.settle(&payload, &req).await.unwrap();
        let second = fac.settle(&payload, &req).await.unwrap();
        assert!(first.success);
        assert_eq!(first, second);
        assert_eq!(fac.backend().transfers().len(), 1);

        let status = fac.settlement_status(&payload, &req).await.unwrap();
        assert_eq!(status, Some(first));

        let resp = fac.verify(&payload, &req).await.unwrap();
        assert_eq!(resp.invalid_reason.as_deref(), Some("Nonce already used"));
    }

    #[tokio::test]
    async fn test_status_unknown_before_settle() {
        let req = requirement(Address::repeat_byte(0x22));
        let payload = signed(&req).await;
        assert!(facilitator()
            .settlement_status(&payload, &req)
            .await
            .unwrap()
            .is_none());
    }

    struct FailingBackend;

    #[async_trait]
    impl SettlementBackend for FailingBackend {
        async fn transfer(&self, _request: &TransferRequest) -> Result<String, X402Error> {
            Err(X402Error::SettlementFailed("rpc timeout".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_failure_is_indeterminate_and_never_retransfers() {
        let req = requirement(Address::repeat_byte(0x22));
        let payload = signed(&req).await;
        let fac = ExactEvmFacilitator::new(Arc::new(FailingBackend));

        let err = fac.settle(&payload, &req).await.unwrap_err();
        assert!(err.to_string().contains("indeterminate"));

        let err = fac.settle(&payload, &req).await.unwrap_err();
        assert!(err.to_string().contains("indeterminate"));
        assert!(fac.settlement_status(&payload, &req).await.unwrap().is_none());
    }
}
