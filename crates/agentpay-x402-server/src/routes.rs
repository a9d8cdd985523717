//! Handlers of the paid weather API. `/weather` and `/premium-data` are priced in
//! [`demo_payment_config`](crate::config::demo_payment_config); the rest are free.

use actix_web::{get, web, HttpRequest, HttpResponse};

/// Facts about this deployment shown by the free endpoints.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub network: String,
    pub payee: String,
}

/// Access policy of `/metrics`.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccess {
    pub token: Option<String>,
    pub public: bool,
}

#[get("/weather")]
pub async fn weather() -> HttpResponse {
    tracing::info!("weather request served");
    HttpResponse::Ok().json(serde_json::json!({
        "location": "San Francisco, CA",
        "temperature": 65,
        "unit": "fahrenheit",
        "conditions": "Partly Cloudy",
        "humidity": 72,
        "wind": "12 mph NW",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "provider": "Booeliever Weather Service",
    }))
}

#[get("/premium-data")]
pub async fn premium_data() -> HttpResponse {
    tracing::info!("premium data request served");
    HttpResponse::Ok().json(serde_json::json!({
        "market": "Ethereum Ecosystem",
        "sentiment": "Bullish",
        "trending": ["x402 Protocol", "ERC-8004", "Agent Commerce"],
        "insight": "AI agents are becoming economic actors on-chain",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "provider": "Booeliever Market Intelligence",
    }))
}

#[get("/health")]
pub async fn health(info: web::Data<ServiceInfo>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "x402-server",
        "network": info.network,
        "payee": info.payee,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/")]
pub async fn index(info: web::Data<ServiceInfo>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "name": "Booeliever Agent Commerce Gateway",
        "description": "Paid API services for agents via the x402 protocol",
        "endpoints": [
            { "path": "/weather", "price": "$0.001", "description": "Weather data" },
            { "path": "/premium-data", "price": "$0.01", "description": "Market intelligence" },
            { "path": "/health", "price": "free", "description": "Health check" },
        ],
        "payment": {
            "protocol": "x402",
            "network": info.network,
            "asset": "USDC",
        },
    }))
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, access: web::Data<MetricsAccess>) -> HttpResponse {
    match &access.token {
        Some(expected) => {
            let header = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok());
            if !x402::security::bearer_matches(header, expected) {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None if !access.public => {
            return HttpResponse::Forbidden().json(serde_json::json!({
                "error": "forbidden",
                "message": "Set METRICS_TOKEN or X402_PUBLIC_METRICS=true to access /metrics"
            }));
        }
        None => {}
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(crate::metrics::metrics_output())
}

/// Register every handler of the weather API.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(weather)
        .service(premium_data)
        .service(health)
        .service(index)
        .service(metrics_endpoint);
}
