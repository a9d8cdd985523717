//! HTTP client for a remote facilitator's `/verify`, `/settle` and `/settle/status`
//! endpoints.
//!
//! Transient failures (timeouts, refused connections, 502/503/504) are retried with
//! exponential backoff. Before a `settle` retry the client asks the facilitator whether
//! the earlier attempt already landed.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::facilitator::Facilitator;
use crate::payment::{PaymentPayload, PaymentRequirement};
use crate::response::{SettlementReceipt, SettlementStatus, VerifyResponse};
use crate::{X402Error, FACILITATOR_AUTH_HEADER, X402_VERSION};

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (1-based `attempt`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FacilitatorRequest<'a> {
    x402_version: u32,
    payment_payload: &'a PaymentPayload,
    payment_requirements: &'a PaymentRequirement,
}

pub struct HttpFacilitatorClient {
    http: reqwest::Client,
    base_url: String,
    hmac_secret: Option<Vec<u8>>,
    retry: RetryPolicy,
}

impl HttpFacilitatorClient {
    /// Build a client with a per-request timeout. Redirects are not followed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, X402Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| X402Error::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            hmac_secret: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Sign request bodies with HMAC-SHA256 in `X-Facilitator-Auth`.
    pub fn with_hmac_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.hmac_secret = Some(secret.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<T, X402Error> {
        let url = format!("{}/{path}", self.base_url);
        let body = serde_json::to_vec(&FacilitatorRequest {
            x402_version: X402_VERSION,
            payment_payload: payload,
            payment_requirements: requirement,
        })?;

        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.hmac_secret {
            request = request.header(
                FACILITATOR_AUTH_HEADER,
                crate::hmac::compute_hmac(secret, &body),
            );
        }

        let resp = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                X402Error::FacilitatorUnreachable(format!("{url}: {e}"))
            } else {
                X402Error::HttpError(format!("facilitator request failed: {e}"))
            }
        })?;

        let status = resp.status();
        match status.as_u16() {
            502..=504 => {
                return Err(X402Error::FacilitatorUnreachable(format!(
                    "{url} returned {status}"
                )))
            }
            401 | 403 => {
                return Err(X402Error::HttpError(
                    "facilitator authentication failed".to_string(),
                ))
            }
            _ => {}
        }

        let bytes = resp.bytes().await.map_err(|e| {
            if e.is_timeout() {
                X402Error::FacilitatorUnreachable(format!("{url}: {e}"))
            } else {
                X402Error::HttpError(format!("facilitator response read failed: {e}"))
            }
        })?;
        // Rejections may arrive as 400 with a well-formed body.
        match serde_json::from_slice(&bytes) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(error_from_body(status, &bytes)),
            Err(e) => Err(X402Error::HttpError(format!(
                "facilitator returned {status} with unreadable body: {e}"
            ))),
        }
    }
}

/// `{error, message}` body the facilitator sends with non-2xx statuses.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

fn error_from_body(status: reqwest::StatusCode, bytes: &[u8]) -> X402Error {
    match serde_json::from_slice::<ErrorBody>(bytes) {
        Ok(body) if body.error == "settlement failed" => X402Error::SettlementFailed(
            body.message
                .unwrap_or_else(|| "indeterminate: no reason given".to_string()),
        ),
        Ok(body) => X402Error::HttpError(match body.message {
            Some(message) => format!("facilitator returned {status}: {}: {message}", body.error),
            None => format!("facilitator returned {status}: {}", body.error),
        }),
        Err(e) => X402Error::HttpError(format!(
            "facilitator returned {status} with unreadable body: {e}"
        )),
    }
}

#[async_trait]
impl Facilitator for HttpFacilitatorClient {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<VerifyResponse, X402Error> {
        let mut attempt = 1;
        loop {
            match self.post("verify", payload, requirement).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    tracing::warn!(attempt, error = %e, "facilitator verify failed, retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<SettlementReceipt, X402Error> {
        let mut attempt = 1;
        loop {
            let err = match self.post::<SettlementReceipt>("settle", payload, requirement).await {
                Ok(receipt) => return Ok(receipt),
                Err(e @ X402Error::SettlementFailed(_)) => return Err(e),
                Err(e) if !e.is_transient() => {
                    return Err(X402Error::SettlementFailed(e.to_string()))
                }
                Err(e) => e,
            };

            if attempt >= self.retry.max_attempts {
                tracing::error!(attempts = attempt, error = %err, "settlement outcome unknown");
                return Err(X402Error::SettlementFailed(format!("indeterminate: {err}")));
            }

            tracing::warn!(attempt, error = %err, "facilitator settle failed, checking status");
            tokio::time::sleep(self.retry.backoff(attempt)).await;
            attempt += 1;

            match self.settlement_status(payload, requirement).await {
                Ok(Some(receipt)) => {
                    tracing::info!("earlier settle attempt completed");
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "settlement status query failed"),
            }
        }
    }

    async fn settlement_status(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
    ) -> Result<Option<SettlementReceipt>, X402Error> {
        let status: SettlementStatus = self.post("settle/status", payload, requirement).await?;
        Ok(status.receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn test_error_body_keeps_settlement_reason() {
        let body = br#"{"error":"settlement failed","message":"indeterminate: backend down"}"#;
        let err = error_from_body(reqwest::StatusCode::INTERNAL_SERVER_ERROR, body);
        assert!(matches!(err, X402Error::SettlementFailed(ref m) if m == "indeterminate: backend down"));

        let err = error_from_body(
            reqwest::StatusCode::BAD_REQUEST,
            br#"{"error":"unsupported x402Version"}"#,
        );
        assert!(matches!(err, X402Error::HttpError(ref m) if m.contains("unsupported x402Version")));

        let err = error_from_body(reqwest::StatusCode::INTERNAL_SERVER_ERROR, b"<html>");
        assert!(matches!(err, X402Error::HttpError(ref m) if m.contains("unreadable body")));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client =
            HttpFacilitatorClient::new("https://x402.org/facilitator/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.base_url(), "https://x402.org/facilitator");
    }

    #[tokio::test]
    async fn test_unreachable_after_retries() {
        // Nothing listens on port 9 of the loopback interface.
        let client = HttpFacilitatorClient::new("http://127.0.0.1:9", Duration::from_millis(500))
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            });
        let payload = PaymentPayload {
            x402_version: 2,
            scheme: "exact".to_string(),
            network: "eip155:8453".to_string(),
            payload: serde_json::json!({}),
        };
        let requirement = PaymentRequirement {
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
        };

        let err = client.verify(&payload, &requirement).await.unwrap_err();
        assert!(matches!(err, X402Error::FacilitatorUnreachable(_)));

        let err = client.settle(&payload, &requirement).await.unwrap_err();
        assert!(matches!(err, X402Error::SettlementFailed(ref m) if m.starts_with("indeterminate")));
    }
}
