use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::middleware::from_fn;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;

use x402_server::routes::{self, MetricsAccess, ServiceInfo};
use x402_server::{demo_payment_config, facilitator_from_config, payment_middleware};
use x402_server::{PaymentGate, ServerConfig, SettlementOutbox};

fn build_cors(origins: &[String]) -> Cors {
    let cors = if origins.is_empty() {
        Cors::default().allowed_origin_fn(|origin, _| {
            origin
                .to_str()
                .map(|o| o == "http://localhost" || o.starts_with("http://localhost:"))
                .unwrap_or(false)
        })
    } else {
        origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };
    cors.allow_any_method()
        .allow_any_header()
        .expose_headers([x402::SETTLEMENT_HEADER])
        .max_age(3600)
}

fn invalid_input(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .init();

    let config = ServerConfig::from_env().map_err(invalid_input)?;
    if config.hmac_secret.is_none() {
        tracing::warn!("FACILITATOR_SHARED_SECRET not set, facilitator requests are unsigned");
    }

    let facilitator = facilitator_from_config(&config).map_err(invalid_input)?;
    let payment_config = demo_payment_config(&config.payee_address).map_err(invalid_input)?;

    let outbox = Arc::new(SettlementOutbox::default());
    outbox.start_reconciler(facilitator.clone(), Duration::from_secs(30));

    let gate = web::Data::new(PaymentGate::new(payment_config, facilitator).with_outbox(outbox));
    let info = web::Data::new(ServiceInfo {
        network: x402::BASE_NETWORK.to_string(),
        payee: config.payee_address.clone(),
    });
    let metrics_access = web::Data::new(MetricsAccess {
        token: config.metrics_token.clone(),
        public: config.public_metrics,
    });

    tracing::info!(
        payee = %config.payee_address,
        network = x402::BASE_NETWORK,
        facilitator = %config.facilitator_url,
        "x402 server listening at http://localhost:{}",
        config.port
    );
    tracing::info!("Paid: GET /weather ($0.001), GET /premium-data ($0.01)");
    tracing::info!("Free: GET /, GET /health");
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .ok_or_else(|| invalid_input("failed to build rate limiter config"))?;
    let cors_origins = config.allowed_origins.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(from_fn(payment_middleware))
            .wrap(build_cors(&cors_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(gate.clone())
            .app_data(info.clone())
            .app_data(metrics_access.clone())
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await
}
