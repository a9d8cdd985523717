use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use x402::{
    Facilitator, PaymentPayload, PaymentRequirement, SettlementReceipt, SettlementStatus,
    VerifyResponse, X402Error, FACILITATOR_AUTH_HEADER, X402_VERSION,
};

use crate::metrics;
use crate::state::AppState;

/// Body of `/verify`, `/settle` and `/settle/status`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest {
    pub x402_version: u32,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirement,
}

/// Validate the HMAC header on an incoming request.
/// Returns an error response if the signature is missing or invalid.
fn validate_hmac(req: &HttpRequest, body: &[u8], state: &AppState) -> Result<(), HttpResponse> {
    let Some(secret) = &state.hmac_secret else {
        return Ok(());
    };

    let header_value = req
        .headers()
        .get(FACILITATOR_AUTH_HEADER)
        .and_then(|v| v.to_str().ok());

    match header_value {
        Some(sig) if x402::hmac::verify_hmac(secret, body, sig) => Ok(()),
        Some(_) => {
            tracing::warn!("HMAC verification failed, signature mismatch");
            metrics::HMAC_FAILURES.with_label_values(&["invalid"]).inc();
            Err(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "authentication failed"
            })))
        }
        None => {
            tracing::warn!("HMAC header missing on authenticated endpoint");
            metrics::HMAC_FAILURES.with_label_values(&["missing"]).inc();
            Err(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "authentication required"
            })))
        }
    }
}

/// Authenticate and decode a facilitator request body.
fn parse_request(
    req: &HttpRequest,
    body: &[u8],
    state: &AppState,
) -> Result<FacilitatorRequest, HttpResponse> {
    validate_hmac(req, body, state)?;

    let parsed: FacilitatorRequest = serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "rejecting unreadable request body");
        HttpResponse::BadRequest().json(serde_json::json!({
            "error": "invalid request body"
        }))
    })?;

    if parsed.x402_version != X402_VERSION {
        return Err(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "unsupported x402Version",
            "supported": X402_VERSION,
        })));
    }
    Ok(parsed)
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "x402-facilitator",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics_token {
        Some(token) => {
            let header = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok());
            if !x402::security::bearer_matches(header, token) {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None if !state.public_metrics => {
            return HttpResponse::Forbidden().json(serde_json::json!({
                "error": "forbidden",
                "message": "Set METRICS_TOKEN or X402_PUBLIC_METRICS=true to access /metrics"
            }));
        }
        None => {}
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}

#[get("/supported")]
pub async fn supported(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.supported())
}

#[post("/verify")]
pub async fn verify(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    let parsed = match parse_request(&req, &body, &state) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match state
        .facilitator
        .verify(&parsed.payment_payload, &parsed.payment_requirements)
        .await
    {
        Ok(result) => {
            let label = if result.is_valid { "valid" } else { "invalid" };
            metrics::VERIFY_REQUESTS.with_label_values(&[label]).inc();
            if !result.is_valid {
                tracing::info!(
                    payer = ?result.payer,
                    reason = result.invalid_reason.as_deref().unwrap_or("unknown"),
                    "verification rejected"
                );
            }
            HttpResponse::Ok().json(result)
        }
        Err(e @ X402Error::UnsupportedScheme(_)) => {
            metrics::VERIFY_REQUESTS.with_label_values(&["invalid"]).inc();
            HttpResponse::BadRequest().json(VerifyResponse::invalid(e.to_string()))
        }
        Err(e @ X402Error::FacilitatorUnreachable(_)) => {
            metrics::VERIFY_REQUESTS.with_label_values(&["timeout"]).inc();
            tracing::error!(error = %e, "verification timed out");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": "verification timed out"
            }))
        }
        Err(e) => {
            metrics::VERIFY_REQUESTS.with_label_values(&["error"]).inc();
            tracing::error!(error = %e, "verification internal error");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "verification failed"
            }))
        }
    }
}

#[post("/settle")]
pub async fn settle(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    let parsed = match parse_request(&req, &body, &state) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let network = parsed.payment_requirements.network.clone();
    let start = std::time::Instant::now();

    let outcome = state
        .facilitator
        .settle(&parsed.payment_payload, &parsed.payment_requirements)
        .await;
    let elapsed = start.elapsed().as_secs_f64();

    match outcome {
        Ok(result) => {
            let label = if result.success { "success" } else { "rejected" };
            metrics::SETTLE_REQUESTS.with_label_values(&[label]).inc();
            metrics::SETTLE_LATENCY
                .with_label_values(&[label])
                .observe(elapsed);
            if result.success {
                tracing::info!(
                    payer = ?result.payer,
                    tx = ?result.transaction,
                    "settlement completed"
                );
            } else {
                tracing::warn!(
                    payer = ?result.payer,
                    reason = result.error_reason.as_deref().unwrap_or("unknown"),
                    "settlement rejected"
                );
            }
            HttpResponse::Ok().json(result)
        }
        Err(e @ X402Error::UnsupportedScheme(_)) => {
            metrics::SETTLE_REQUESTS.with_label_values(&["rejected"]).inc();
            HttpResponse::BadRequest().json(SettlementReceipt::failure(network, e.to_string()))
        }
        Err(e) => {
            metrics::SETTLE_REQUESTS.with_label_values(&["error"]).inc();
            metrics::SETTLE_LATENCY
                .with_label_values(&["error"])
                .observe(elapsed);
            tracing::error!(error = %e, "settlement outcome unknown");
            let message = match e {
                X402Error::SettlementFailed(reason) => reason,
                other => other.to_string(),
            };
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "settlement failed",
                "message": message,
            }))
        }
    }
}

#[post("/settle/status")]
pub async fn settle_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    let parsed = match parse_request(&req, &body, &state) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match state
        .facilitator
        .settlement_status(&parsed.payment_payload, &parsed.payment_requirements)
        .await
    {
        Ok(receipt) => {
            let label = if receipt.is_some() { "settled" } else { "unknown" };
            metrics::STATUS_QUERIES.with_label_values(&[label]).inc();
            HttpResponse::Ok().json(SettlementStatus { receipt })
        }
        Err(e @ X402Error::UnsupportedScheme(_)) => {
            metrics::STATUS_QUERIES.with_label_values(&["error"]).inc();
            HttpResponse::BadRequest().json(serde_json::json!({ "error": e.to_string() }))
        }
        Err(e) => {
            metrics::STATUS_QUERIES.with_label_values(&["error"]).inc();
            tracing::error!(error = %e, "settlement status query failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "status query failed"
            }))
        }
    }
}

/// Register every facilitator endpoint.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(metrics_endpoint)
        .service(supported)
        .service(verify)
        .service(settle)
        .service(settle_status);
}
