use x402_client::agent::{run_agent, AgentConfig};
use x402_client::{ClientError, ExactEvmSchemeClient, X402Client};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("{e}");
        if let Some(resp) = e.response() {
            tracing::error!(status = resp.status, body = %resp.body, "server response");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ClientError> {
    let config = AgentConfig::from_env()?;
    let signer = x402::signer_from_hex(&config.private_key)?;
    let scheme = ExactEvmSchemeClient::new(signer);

    tracing::info!(wallet = %scheme.address(), server = %config.server_url, "agent starting");
    let client = X402Client::with_scheme(scheme)?;

    for call in run_agent(&client, &config.server_url).await? {
        let body = serde_json::to_string_pretty(&call.body).unwrap_or_default();
        println!("{} ({})\n{body}", call.path, call.status);
        if let Some(receipt) = call.receipt {
            println!(
                "  transaction: {}\n  network: {}",
                receipt.transaction.as_deref().unwrap_or("pending"),
                receipt.network
            );
        }
    }
    Ok(())
}
