//! x402 resource server: gates HTTP endpoints behind per-request payments.
//!
//! # Modules
//!
//! - [`config`]: route pricing ([`PaymentConfigBuilder`](config::PaymentConfigBuilder)) and env settings
//! - [`middleware`]: the payment gate ([`payment_middleware`](middleware::payment_middleware))
//! - [`outbox`]: reconciliation of settlements that failed after the response
//! - [`routes`]: the paid weather API
//! - [`metrics`]: Prometheus metrics

pub mod config;
pub mod metrics;
pub mod middleware;
pub mod outbox;
pub mod routes;

use std::sync::Arc;

pub use config::{
    demo_payment_config, PaymentConfig, PaymentConfigBuilder, PriceTag, RoutePaymentConfig,
    ServerConfig,
};
pub use middleware::{payment_middleware, PaymentGate};
pub use outbox::SettlementOutbox;

/// Facilitator described by the server settings: HTTP client with retries and
/// optional HMAC signing.
pub fn facilitator_from_config(
    config: &ServerConfig,
) -> Result<Arc<dyn x402::Facilitator>, x402::X402Error> {
    let mut client =
        x402::HttpFacilitatorClient::new(&config.facilitator_url, config.facilitator_timeout)?
            .with_retry_policy(x402::RetryPolicy {
                max_attempts: config.facilitator_max_attempts,
                ..x402::RetryPolicy::default()
            });
    if let Some(secret) = &config.hmac_secret {
        client = client.with_hmac_secret(secret.clone());
    }
    Ok(Arc::new(client))
}
