//! The paying agent: checks that the resource server is up, then buys the weather
//! report and the premium market data.

use x402::SettlementReceipt;

use crate::error::ClientError;
use crate::http_client::X402Client;

/// Paid endpoints visited by the agent, in order.
pub const PAID_PATHS: [&str; 2] = ["/weather", "/premium-data"];

/// Settings of the agent binary.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub private_key: String,
    pub server_url: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ClientError> {
        let private_key = std::env::var("AGENT_PRIVATE_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                x402::X402Error::ConfigError(
                    "AGENT_PRIVATE_KEY environment variable is required".to_string(),
                )
            })?;
        let server_url = std::env::var("RESOURCE_SERVER_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "http://localhost:4021".to_string());
        Ok(Self {
            private_key,
            server_url,
        })
    }
}

/// Outcome of one paid call.
#[derive(Debug, Clone)]
pub struct PaidCall {
    pub path: String,
    pub status: u16,
    pub body: serde_json::Value,
    pub receipt: Option<SettlementReceipt>,
}

/// Check `/health`, then pay for every endpoint in [`PAID_PATHS`].
pub async fn run_agent(
    client: &X402Client,
    server_url: &str,
) -> Result<Vec<PaidCall>, ClientError> {
    let base = server_url.trim_end_matches('/');

    let health_url = format!("{base}/health");
    let health = client
        .http()
        .get(&health_url)
        .send()
        .await
        .map_err(|e| ClientError::Transport {
            url: health_url.clone(),
            source: e,
        })?;
    if !health.status().is_success() {
        tracing::error!(status = %health.status(), "server not healthy");
        return Err(ClientError::Unhealthy {
            url: health_url,
            attempts: 1,
        });
    }
    tracing::info!("server healthy");

    let mut calls = Vec::with_capacity(PAID_PATHS.len());
    for path in PAID_PATHS {
        let url = format!("{base}{path}");
        let (resp, receipt) = client.fetch(&url, reqwest::Method::GET).await?;
        let status = resp.status().as_u16();
        let body = resp
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);

        match &receipt {
            Some(r) if r.success => tracing::info!(
                path,
                tx = r.transaction.as_deref().unwrap_or("pending"),
                network = %r.network,
                "payment settled"
            ),
            Some(r) => tracing::warn!(
                path,
                reason = r.error_reason.as_deref().unwrap_or("unknown"),
                "served, settlement pending reconciliation"
            ),
            None => tracing::info!(path, status, "served without a settlement receipt"),
        }

        calls.push(PaidCall {
            path: path.to_string(),
            status,
            body,
            receipt,
        });
    }
    Ok(calls)
}
