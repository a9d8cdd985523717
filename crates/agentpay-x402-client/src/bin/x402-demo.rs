//! Runs the whole demo: starts the resource server, waits for it, lets the agent pay
//! for both endpoints, and stops the server again.

use std::path::PathBuf;
use std::time::Duration;

use x402_client::agent::{run_agent, AgentConfig};
use x402_client::supervisor::{shutdown_signal, wait_for_health, ChildGuard};
use x402_client::{ClientError, ExactEvmSchemeClient, X402Client};

/// `X402_SERVER_BIN`, or the `x402-server` binary next to this one.
fn server_binary() -> PathBuf {
    if let Some(bin) = std::env::var_os("X402_SERVER_BIN").filter(|v| !v.is_empty()) {
        return PathBuf::from(bin);
    }
    let name = format!("x402-server{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

async fn demo(config: &AgentConfig) -> Result<(), ClientError> {
    let signer = x402::signer_from_hex(&config.private_key)?;
    let client = X402Client::with_scheme(ExactEvmSchemeClient::new(signer))?;

    wait_for_health(client.http(), &config.server_url, 30, Duration::from_secs(1)).await?;

    let calls = run_agent(&client, &config.server_url).await?;
    let settled = calls
        .iter()
        .filter(|c| c.receipt.as_ref().is_some_and(|r| r.success))
        .count();
    tracing::info!(calls = calls.len(), settled, "demo complete");
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match AgentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    let signal = match shutdown_signal() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to install signal handlers: {e}");
            std::process::exit(1);
        }
    };

    let bin = server_binary();
    tracing::info!(server = %bin.display(), "starting x402 payment server");
    let server = match ChildGuard::spawn("SERVER", &bin.to_string_lossy(), &[]) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to start {}: {e}", bin.display());
            std::process::exit(1);
        }
    };

    let outcome = tokio::select! {
        r = demo(&config) => r,
        name = signal => {
            tracing::warn!(signal = name, "interrupted, stopping server");
            Ok(())
        }
    };

    if let Err(e) = server.shutdown().await {
        tracing::warn!(error = %e, "server shutdown failed");
    }

    if let Err(e) = outcome {
        tracing::error!("demo failed: {e}");
        if let Some(resp) = e.response() {
            tracing::error!(status = resp.status, body = %resp.body, "server response");
        }
        std::process::exit(1);
    }
}
