//! Payment gate for actix-web.
//!
//! Install with `App::new().app_data(web::Data::new(gate)).wrap(from_fn(payment_middleware))`.
//! For a priced route the middleware answers with a 402 challenge until a valid
//! `PAYMENT-SIGNATURE` arrives, runs the handler once the facilitator verified it,
//! and settles after a successful response. Unpriced routes pass straight through.

use std::sync::Arc;

use actix_web::body::{BoxBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpResponse};
use x402::{
    decode_payment, encode_receipt, Challenge, Facilitator, PaymentPayload, PaymentRequirement,
    SettlementReceipt, X402Error, PAYMENT_HEADER, SETTLEMENT_HEADER,
};

use crate::config::{route_key, PaymentConfig};
use crate::metrics::{FACILITATOR_LATENCY, PAYMENT_ATTEMPTS, REQUESTS, SETTLEMENTS};
use crate::outbox::SettlementOutbox;

/// Shared state of the payment middleware.
pub struct PaymentGate {
    pub config: PaymentConfig,
    pub facilitator: Arc<dyn Facilitator>,
    pub outbox: Arc<SettlementOutbox>,
    /// `Retry-After` seconds sent when the facilitator is unreachable.
    pub retry_after_secs: u64,
}

impl PaymentGate {
    pub fn new(config: PaymentConfig, facilitator: Arc<dyn Facilitator>) -> Self {
        Self {
            config,
            facilitator,
            outbox: Arc::new(SettlementOutbox::default()),
            retry_after_secs: 5,
        }
    }

    pub fn with_outbox(mut self, outbox: Arc<SettlementOutbox>) -> Self {
        self.outbox = outbox;
        self
    }

    /// Decode the payment header and check that a registered scheme understands it.
    pub fn parse_payment(&self, header: Option<&str>) -> Result<PaymentPayload, X402Error> {
        let header = header.ok_or(X402Error::MissingPayment)?;
        let payload = decode_payment(header)?;
        let scheme = self
            .config
            .schemes
            .get(&payload.scheme)
            .ok_or_else(|| X402Error::UnsupportedScheme(payload.scheme.clone()))?;
        scheme.validate_payload(&payload)?;
        Ok(payload)
    }

    /// Settle after the handler succeeded. Failures are queued for reconciliation and
    /// reported in the receipt; they never change the response.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> SettlementReceipt {
        let payer = payload.payer_hint().map(str::to_string);
        let result = {
            let _timer = FACILITATOR_LATENCY
                .with_label_values(&["settle"])
                .start_timer();
            self.facilitator.settle(payload, requirement).await
        };

        let reason = match result {
            Ok(receipt) if receipt.success => {
                SETTLEMENTS.with_label_values(&["success"]).inc();
                tracing::info!(
                    payer = payer.as_deref().unwrap_or("unknown"),
                    resource = %requirement.resource,
                    tx = receipt.transaction.as_deref().unwrap_or("pending"),
                    "payment settled"
                );
                return receipt;
            }
            Ok(receipt) => receipt
                .error_reason
                .unwrap_or_else(|| "settlement refused".to_string()),
            Err(e) => e.to_string(),
        };

        SETTLEMENTS.with_label_values(&["failure"]).inc();
        tracing::error!(
            payer = payer.as_deref().unwrap_or("unknown"),
            resource = %requirement.resource,
            reason = %reason,
            "settlement failed after response was produced, queued for reconciliation"
        );
        self.outbox
            .push(payload.clone(), requirement.clone(), reason.clone());

        SettlementReceipt::failure(requirement.network.clone(), reason)
            .with_parties(payer, Some(requirement.pay_to.clone()))
    }
}

/// 402 response carrying a fresh challenge.
pub fn payment_required(accepts: &[PaymentRequirement], error: Option<String>) -> HttpResponse {
    let mut challenge = Challenge::new(accepts.to_vec());
    challenge.error = error;
    HttpResponse::PaymentRequired().json(challenge)
}

/// The route requirement a payload targets (same scheme and network).
pub fn select_requirement<'a>(
    accepts: &'a [PaymentRequirement],
    payload: &PaymentPayload,
) -> Option<&'a PaymentRequirement> {
    accepts.iter().find(|r| r.matches(payload))
}

pub async fn payment_middleware(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let Some(gate) = req.app_data::<web::Data<PaymentGate>>().cloned() else {
        tracing::error!("payment middleware installed without PaymentGate app data");
        return Ok(req.into_response(HttpResponse::InternalServerError().json(
            serde_json::json!({ "error": "payment gate not configured" }),
        )));
    };

    // Price lookup uses the percent-decoded path the router matches on.
    let path = req.match_info().as_str().to_string();
    let Some(route) = gate.config.get_route(req.method().as_str(), &path) else {
        return Ok(next.call(req).await?.map_into_boxed_body());
    };
    let accepts = route.accepts.clone();
    let endpoint = route_key(req.method().as_str(), &path);

    let header = req
        .headers()
        .get(PAYMENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let payload = match gate.parse_payment(header.as_deref()) {
        Ok(p) => p,
        Err(X402Error::MissingPayment) => {
            REQUESTS.with_label_values(&[endpoint.as_str(), "402"]).inc();
            return Ok(req.into_response(payment_required(&accepts, None)));
        }
        Err(e) => {
            tracing::warn!(error = %e, endpoint = %endpoint, "unusable payment header");
            PAYMENT_ATTEMPTS.with_label_values(&["malformed"]).inc();
            REQUESTS.with_label_values(&[endpoint.as_str(), "402"]).inc();
            return Ok(req.into_response(payment_required(&accepts, Some(e.to_string()))));
        }
    };

    let Some(requirement) = select_requirement(&accepts, &payload).cloned() else {
        let e = X402Error::UnmatchedRequirement(format!(
            "scheme '{}' on network '{}' is not accepted for this resource",
            payload.scheme, payload.network
        ));
        PAYMENT_ATTEMPTS.with_label_values(&["unmatched"]).inc();
        REQUESTS.with_label_values(&[endpoint.as_str(), "402"]).inc();
        return Ok(req.into_response(payment_required(&accepts, Some(e.to_string()))));
    };

    tracing::info!(
        payer = payload.payer_hint().unwrap_or("unknown"),
        endpoint = %endpoint,
        "payment attempt"
    );

    let verified = {
        let _timer = FACILITATOR_LATENCY
            .with_label_values(&["verify"])
            .start_timer();
        gate.facilitator.verify(&payload, &requirement).await
    };
    match verified {
        Ok(v) if v.is_valid => {
            PAYMENT_ATTEMPTS.with_label_values(&["verified"]).inc();
        }
        Ok(v) => {
            let reason = v
                .invalid_reason
                .unwrap_or_else(|| "payment verification failed".to_string());
            tracing::warn!(payer = ?v.payer, reason = %reason, "payment rejected");
            PAYMENT_ATTEMPTS.with_label_values(&["rejected"]).inc();
            REQUESTS.with_label_values(&[endpoint.as_str(), "402"]).inc();
            return Ok(req.into_response(payment_required(&accepts, Some(reason))));
        }
        Err(e @ X402Error::FacilitatorUnreachable(_)) => {
            tracing::error!(error = %e, "facilitator unreachable during verify");
            PAYMENT_ATTEMPTS.with_label_values(&["unreachable"]).inc();
            REQUESTS.with_label_values(&[endpoint.as_str(), "503"]).inc();
            return Ok(req.into_response(
                HttpResponse::ServiceUnavailable()
                    .insert_header((RETRY_AFTER, gate.retry_after_secs.to_string()))
                    .json(serde_json::json!({ "error": "facilitator_unreachable" })),
            ));
        }
        Err(e @ X402Error::UnsupportedScheme(_)) => {
            PAYMENT_ATTEMPTS.with_label_values(&["rejected"]).inc();
            REQUESTS.with_label_values(&[endpoint.as_str(), "402"]).inc();
            return Ok(req.into_response(payment_required(&accepts, Some(e.to_string()))));
        }
        Err(e) => {
            tracing::error!(error = %e, "facilitator verify failed");
            PAYMENT_ATTEMPTS.with_label_values(&["error"]).inc();
            REQUESTS.with_label_values(&[endpoint.as_str(), "502"]).inc();
            return Ok(req.into_response(HttpResponse::BadGateway().json(serde_json::json!({
                "error": "facilitator_error",
                "message": "payment verification could not be completed",
            }))));
        }
    }

    let res = next.call(req).await?;
    let status = res.status();
    REQUESTS
        .with_label_values(&[endpoint.as_str(), status.as_str()])
        .inc();
    if status.as_u16() >= 400 {
        tracing::info!(status = %status, endpoint = %endpoint, "handler failed, settlement skipped");
        return Ok(res.map_into_boxed_body());
    }

    let receipt = gate.settle(&payload, &requirement).await;
    let mut res = res.map_into_boxed_body();
    match encode_receipt(&receipt).map(|v| HeaderValue::from_str(&v)) {
        Ok(Ok(value)) => match HeaderName::try_from(SETTLEMENT_HEADER) {
            Ok(name) => {
                res.headers_mut().insert(name, value);
            }
            Err(e) => tracing::error!(error = %e, "invalid settlement header name"),
        },
        Ok(Err(e)) => tracing::error!(error = %e, "settlement receipt is not a valid header value"),
        Err(e) => tracing::error!(error = %e, "failed to encode settlement receipt"),
    }
    Ok(res)
}
