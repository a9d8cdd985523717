use std::sync::Arc;
use std::time::Duration;

use x402::{
    decode_receipt, encode_payment, Challenge, PaymentRequirement, SchemeClient, SchemeRegistry,
    SettlementReceipt, X402Error, PAYMENT_HEADER, SETTLEMENT_HEADER,
};

use crate::error::{ClientError, FailedResponse};

/// HTTP client that automatically handles 402 payment responses.
///
/// Wraps `reqwest::Client`. On a 402 response it parses the challenge, signs an
/// authorization with the first registered [`SchemeClient`] that supports one of the
/// offered requirements, and retries once with a `PAYMENT-SIGNATURE` header.
pub struct X402Client {
    http: reqwest::Client,
    schemes: SchemeRegistry<dyn SchemeClient>,
}

impl X402Client {
    pub fn new(schemes: SchemeRegistry<dyn SchemeClient>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ClientError::Transport {
                url: String::new(),
                source: e,
            })?;
        Ok(Self { http, schemes })
    }

    /// Client paying with a single scheme.
    pub fn with_scheme(scheme: impl SchemeClient + 'static) -> Result<Self, ClientError> {
        Self::new(SchemeRegistry::<dyn SchemeClient>::new().with(scheme))
    }

    /// Create a client with a custom reqwest::Client.
    pub fn with_http_client(
        schemes: SchemeRegistry<dyn SchemeClient>,
        http: reqwest::Client,
    ) -> Self {
        Self { http, schemes }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Make a request, automatically handling 402 payment responses.
    /// Returns the final response and the settlement receipt, if the server sent one.
    pub async fn fetch(
        &self,
        url: &str,
        method: reqwest::Method,
    ) -> Result<(reqwest::Response, Option<SettlementReceipt>), ClientError> {
        self.fetch_with_body(url, method, None).await
    }

    /// Make a request with an optional body, automatically handling 402 payment responses.
    pub async fn fetch_with_body(
        &self,
        url: &str,
        method: reqwest::Method,
        body: Option<Vec<u8>>,
    ) -> Result<(reqwest::Response, Option<SettlementReceipt>), ClientError> {
        let resp = self.send(url, method.clone(), body.clone(), None).await?;
        if resp.status() != reqwest::StatusCode::PAYMENT_REQUIRED {
            return Ok((resp, None));
        }

        let (challenge, snapshot) = read_challenge(url, resp).await?;
        let challenge = match challenge {
            Some(c) => c,
            None => {
                return Err(ClientError::rejected(
                    X402Error::MalformedPayment(
                        "402 response without a readable challenge".to_string(),
                    ),
                    snapshot,
                ))
            }
        };

        let (scheme, requirement) = match self.select(&challenge.accepts) {
            Ok(found) => found,
            Err(e) => return Err(ClientError::rejected(e, snapshot)),
        };

        tracing::info!(
            scheme = %requirement.scheme,
            network = %requirement.network,
            amount = %requirement.amount,
            pay_to = %requirement.pay_to,
            "paying for {url}"
        );
        let payload = scheme
            .create_payment_payload(challenge.x402_version, requirement)
            .await?;
        let encoded = encode_payment(&payload)?;

        let resp = self.send(url, method, body, Some(&encoded)).await?;
        if resp.status() == reqwest::StatusCode::PAYMENT_REQUIRED {
            let (challenge, snapshot) = read_challenge(url, resp).await?;
            let reason = challenge
                .and_then(|c| c.error)
                .unwrap_or_else(|| "payment was not accepted".to_string());
            tracing::warn!(reason = %reason, "payment rejected for {url}");
            return Err(ClientError::rejected(
                X402Error::PaymentRejected(reason),
                snapshot,
            ));
        }

        let receipt = resp
            .headers()
            .get(SETTLEMENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| match decode_receipt(s) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unreadable settlement header");
                    None
                }
            });

        Ok((resp, receipt))
    }

    /// First requirement, in offer order, that a registered scheme supports.
    fn select<'a>(
        &self,
        accepts: &'a [PaymentRequirement],
    ) -> Result<(&Arc<dyn SchemeClient>, &'a PaymentRequirement), X402Error> {
        let mut any_registered = false;
        for requirement in accepts {
            if let Some(scheme) = self.schemes.get(&requirement.scheme) {
                any_registered = true;
                if scheme.supports(requirement) {
                    return Ok((scheme, requirement));
                }
            }
        }

        let offered = accepts
            .iter()
            .map(|r| format!("{}@{}", r.scheme, r.network))
            .collect::<Vec<_>>()
            .join(", ");
        if accepts.is_empty() {
            Err(X402Error::NoAcceptableRequirement(
                "challenge offers no payment requirements".to_string(),
            ))
        } else if any_registered {
            Err(X402Error::NoAcceptableRequirement(format!(
                "no registered scheme supports any of [{offered}]"
            )))
        } else {
            Err(X402Error::UnsupportedScheme(format!(
                "no registered scheme for any of [{offered}]"
            )))
        }
    }

    async fn send(
        &self,
        url: &str,
        method: reqwest::Method,
        body: Option<Vec<u8>>,
        payment: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut req = self.http.request(method, url);
        if let Some(header) = payment {
            req = req.header(PAYMENT_HEADER, header);
        }
        if let Some(b) = body {
            req = req.body(b);
        }
        req.send().await.map_err(|e| ClientError::Transport {
            url: url.to_string(),
            source: e,
        })
    }
}

/// Read a 402 body, keeping a snapshot for diagnostics.
async fn read_challenge(
    url: &str,
    resp: reqwest::Response,
) -> Result<(Option<Challenge>, FailedResponse), ClientError> {
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await.map_err(|e| ClientError::Transport {
        url: url.to_string(),
        source: e,
    })?;
    let challenge = serde_json::from_slice::<Challenge>(&bytes).ok();
    let snapshot = FailedResponse {
        status,
        challenge: challenge.clone(),
        body: String::from_utf8_lossy(&bytes).into_owned(),
    };
    Ok((challenge, snapshot))
}
