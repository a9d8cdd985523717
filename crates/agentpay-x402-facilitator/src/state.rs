use std::sync::Arc;

use x402::{
    ExactEvmFacilitator, LocalFacilitator, SchemeFacilitator, SchemeRegistry, SettlementBackend,
    SupportedKind, SupportedResponse, X402_VERSION,
};

/// Shared application state for the facilitator server.
pub struct AppState {
    pub facilitator: LocalFacilitator,
    supported: Vec<SupportedKind>,
    /// HMAC shared secret for authenticating verify/settle requests.
    /// `None` only when started with `X402_INSECURE_NO_HMAC=true`.
    pub hmac_secret: Option<Vec<u8>>,
    /// Bearer token for /metrics (separate from the HMAC secret).
    pub metrics_token: Option<String>,
    pub public_metrics: bool,
}

impl AppState {
    /// State serving one `exact` EVM facilitator.
    pub fn new<B>(exact: Arc<ExactEvmFacilitator<B>>, hmac_secret: Option<Vec<u8>>) -> Self
    where
        B: SettlementBackend + 'static,
    {
        let scheme = exact.chain_config().scheme_name.clone();
        let supported = vec![SupportedKind {
            x402_version: X402_VERSION,
            scheme: scheme.clone(),
            network: exact.chain_config().network.clone(),
        }];

        let mut schemes: SchemeRegistry<dyn SchemeFacilitator> = SchemeRegistry::new();
        schemes.register_as(scheme, exact);

        Self {
            facilitator: LocalFacilitator::new(schemes),
            supported,
            hmac_secret,
            metrics_token: None,
            public_metrics: false,
        }
    }

    pub fn with_metrics_access(mut self, token: Option<String>, public: bool) -> Self {
        self.metrics_token = token;
        self.public_metrics = public;
        self
    }

    pub fn supported(&self) -> SupportedResponse {
        SupportedResponse {
            kinds: self.supported.clone(),
        }
    }
}
