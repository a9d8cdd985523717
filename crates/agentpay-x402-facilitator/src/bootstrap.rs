//! Environment settings and construction of the facilitator's [`AppState`].

use std::sync::Arc;

use x402::{ChainConfig, ExactEvmFacilitator, LedgerBackend, SqliteNonceStore, X402Error};

use crate::state::AppState;

/// Settings of the facilitator service.
#[derive(Debug, Clone)]
pub struct FacilitatorConfig {
    pub port: u16,
    /// `None` only when HMAC was explicitly disabled with `X402_INSECURE_NO_HMAC`.
    pub hmac_secret: Option<Vec<u8>>,
    /// Path to the SQLite settlement store.
    pub nonce_db_path: String,
    pub metrics_token: Option<String>,
    pub public_metrics: bool,
    pub rate_limit_rpm: u64,
    pub allowed_origins: Vec<String>,
}

impl FacilitatorConfig {
    pub fn from_env() -> Result<Self, X402Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, X402Error> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let flag = |name: &str| var(name).is_some_and(|v| v == "true" || v == "1");
        let number = |name: &str, default: u64| -> Result<u64, X402Error> {
            match var(name) {
                Some(v) => v.trim().parse().map_err(|_| {
                    X402Error::ConfigError(format!("{name} has an invalid value: '{v}'"))
                }),
                None => Ok(default),
            }
        };

        let hmac_secret = match var("FACILITATOR_SHARED_SECRET") {
            Some(secret) => {
                if secret.len() < 32 {
                    tracing::warn!(
                        "FACILITATOR_SHARED_SECRET is only {} bytes (minimum 32 recommended), \
                         use `openssl rand -hex 32` to generate a secure secret",
                        secret.len()
                    );
                }
                Some(secret.into_bytes())
            }
            None if flag("X402_INSECURE_NO_HMAC") => {
                tracing::warn!("X402_INSECURE_NO_HMAC set, verify and settle are unauthenticated");
                None
            }
            None => {
                return Err(X402Error::ConfigError(
                    "FACILITATOR_SHARED_SECRET is required \
                     (set X402_INSECURE_NO_HMAC=true to run without authentication)"
                        .to_string(),
                ))
            }
        };

        let port = var("FACILITATOR_PORT")
            .or_else(|| var("PORT"))
            .map(|p| {
                p.trim().parse::<u16>().map_err(|_| {
                    X402Error::ConfigError(format!("invalid facilitator port: '{p}'"))
                })
            })
            .transpose()?
            .unwrap_or(4022);

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port,
            hmac_secret,
            nonce_db_path: var("NONCE_DB_PATH").unwrap_or_else(|| "./x402-nonces.db".to_string()),
            metrics_token: var("METRICS_TOKEN"),
            public_metrics: flag("X402_PUBLIC_METRICS"),
            rate_limit_rpm: number("RATE_LIMIT_RPM", 120)?,
            allowed_origins,
        })
    }
}

/// Open the settlement store, build the `exact` facilitator over the recording ledger
/// and start its background cleanup. Must run inside a Tokio runtime.
///
/// There is no in-memory fallback: settlement records lost on restart would let a
/// recently settled authorization be paid again.
pub fn bootstrap(config: &FacilitatorConfig) -> Result<AppState, X402Error> {
    let store = SqliteNonceStore::open(&config.nonce_db_path).map_err(|e| {
        X402Error::ConfigError(format!(
            "failed to open nonce store at {}: {e}",
            config.nonce_db_path
        ))
    })?;
    tracing::info!("Nonce store: SQLite at {}", config.nonce_db_path);

    let chain = ChainConfig::default();
    let accepted = vec![chain.default_token];
    let exact = ExactEvmFacilitator::with_chain_config(Arc::new(LedgerBackend::new()), chain)
        .with_nonce_store(Arc::new(store))
        .with_accepted_tokens(accepted);
    exact.start_nonce_cleanup();

    Ok(
        AppState::new(Arc::new(exact), config.hmac_secret.clone())
            .with_metrics_access(config.metrics_token.clone(), config.public_metrics),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_secret_required() {
        let err = FacilitatorConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("FACILITATOR_SHARED_SECRET"));
    }

    #[test]
    fn test_insecure_opt_out() {
        let config =
            FacilitatorConfig::from_lookup(lookup(&[("X402_INSECURE_NO_HMAC", "true")])).unwrap();
        assert!(config.hmac_secret.is_none());
        assert_eq!(config.port, 4022);
        assert_eq!(config.rate_limit_rpm, 120);
    }

    #[test]
    fn test_port_precedence_and_origins() {
        let config = FacilitatorConfig::from_lookup(lookup(&[
            ("FACILITATOR_SHARED_SECRET", "s"),
            ("PORT", "9000"),
            ("FACILITATOR_PORT", "9001"),
            ("ALLOWED_ORIGINS", "https://a.example, ,https://b.example"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.hmac_secret.as_deref(), Some(&b"s"[..]));
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_invalid_rate_limit() {
        let err = FacilitatorConfig::from_lookup(lookup(&[
            ("FACILITATOR_SHARED_SECRET", "s"),
            ("RATE_LIMIT_RPM", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, X402Error::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_opens_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonces.db");
        let config = FacilitatorConfig::from_lookup(lookup(&[
            ("FACILITATOR_SHARED_SECRET", "s"),
            ("NONCE_DB_PATH", path.to_str().unwrap()),
        ]))
        .unwrap();

        let state = bootstrap(&config).unwrap();
        assert!(path.exists());
        assert_eq!(state.supported().kinds.len(), 1);
        assert_eq!(state.supported().kinds[0].network, "eip155:8453");
    }

    #[tokio::test]
    async fn test_bootstrap_refuses_unopenable_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("nonces.db");
        let config = FacilitatorConfig {
            port: 4022,
            hmac_secret: None,
            nonce_db_path: path.to_string_lossy().into_owned(),
            metrics_token: None,
            public_metrics: false,
            rate_limit_rpm: 120,
            allowed_origins: vec![],
        };
        assert!(bootstrap(&config).is_err());
    }
}
