use std::collections::HashMap;
use std::time::Duration;

use x402::{
    PaymentRequirement, SchemeRegistry, SchemeServer, X402Error, DEFAULT_MAX_TIMEOUT_SECONDS,
};

/// Default facilitator operated by the x402 project.
pub const DEFAULT_FACILITATOR_URL: &str = "https://x402.org/facilitator";

/// Default payee of the demo routes.
pub const DEFAULT_PAYEE_ADDRESS: &str = "0x3e3cb10859cCBbb7c9aB0780b1F90Ae8e0456737";

/// One accepted way to pay for a route, before price parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTag {
    pub scheme: String,
    /// Human-readable price such as `"$0.001"`.
    pub price: String,
    pub pay_to: String,
    /// Defaults to the network of the scheme's server implementation.
    pub network: Option<String>,
}

impl PriceTag {
    pub fn new(scheme: &str, price: &str, pay_to: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            price: price.to_string(),
            pay_to: pay_to.to_string(),
            network: None,
        }
    }
}

/// Payment configuration for a single route.
#[derive(Debug, Clone)]
pub struct RoutePaymentConfig {
    /// Accepted requirements in preference order.
    pub accepts: Vec<PaymentRequirement>,
}

/// Runtime settings of the resource server, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub facilitator_url: String,
    pub payee_address: String,
    pub hmac_secret: Option<Vec<u8>>,
    pub facilitator_timeout: Duration,
    pub facilitator_max_attempts: u32,
    pub rate_limit_rpm: u64,
    pub allowed_origins: Vec<String>,
    pub metrics_token: Option<String>,
    pub public_metrics: bool,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, X402Error> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|_| X402Error::ConfigError(format!("{name} has an invalid value: '{v}'"))),
        _ => Ok(default),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, X402Error> {
        let payee_address =
            env_nonempty("PAYEE_ADDRESS").unwrap_or_else(|| DEFAULT_PAYEE_ADDRESS.to_string());
        payee_address
            .parse::<alloy::primitives::Address>()
            .map_err(|e| X402Error::ConfigError(format!("PAYEE_ADDRESS is invalid: {e}")))?;

        let hmac_secret = env_nonempty("FACILITATOR_SHARED_SECRET").map(String::into_bytes);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let facilitator_max_attempts = env_or("FACILITATOR_MAX_ATTEMPTS", 3u32)?;
        if facilitator_max_attempts == 0 {
            return Err(X402Error::ConfigError(
                "FACILITATOR_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            port: env_or("PORT", 4021u16)?,
            facilitator_url: env_nonempty("FACILITATOR_URL")
                .unwrap_or_else(|| DEFAULT_FACILITATOR_URL.to_string()),
            payee_address,
            hmac_secret,
            facilitator_timeout: Duration::from_secs(env_or("FACILITATOR_TIMEOUT_SECS", 10u64)?),
            facilitator_max_attempts,
            rate_limit_rpm: env_or("RATE_LIMIT_RPM", 60u64)?,
            allowed_origins,
            metrics_token: env_nonempty("METRICS_TOKEN"),
            public_metrics: env_flag("X402_PUBLIC_METRICS"),
        })
    }
}

/// Priced routes and the server-side schemes that built them.
pub struct PaymentConfig {
    pub routes: HashMap<String, RoutePaymentConfig>,
    pub schemes: SchemeRegistry<dyn SchemeServer>,
}

impl PaymentConfig {
    /// Look up the payment config for a route (e.g. `"GET"`, `"/weather"`).
    pub fn get_route(&self, method: &str, path: &str) -> Option<&RoutePaymentConfig> {
        self.routes.get(&route_key(method, path))
    }
}

pub fn route_key(method: &str, path: &str) -> String {
    format!("{} {path}", method.to_ascii_uppercase())
}

/// Builder for a [`PaymentConfig`] with multiple priced routes.
pub struct PaymentConfigBuilder {
    schemes: SchemeRegistry<dyn SchemeServer>,
    pay_to: String,
    max_timeout_seconds: u64,
    routes: HashMap<String, RoutePaymentConfig>,
}

impl PaymentConfigBuilder {
    /// `schemes` parse prices into requirements; `pay_to` is the default payee.
    pub fn new(schemes: SchemeRegistry<dyn SchemeServer>, pay_to: &str) -> Self {
        Self {
            schemes,
            pay_to: pay_to.to_string(),
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            routes: HashMap::new(),
        }
    }

    pub fn max_timeout_seconds(mut self, secs: u64) -> Self {
        self.max_timeout_seconds = secs;
        self
    }

    /// Price a route with every registered scheme, paid to the default payee.
    pub fn route(
        self,
        method: &str,
        path: &str,
        price: &str,
        description: Option<&str>,
    ) -> Result<Self, X402Error> {
        let mut ids: Vec<String> = self.schemes.ids().map(str::to_string).collect();
        ids.sort();
        let tags = ids
            .iter()
            .map(|id| PriceTag::new(id, price, &self.pay_to))
            .collect();
        self.route_with(method, path, tags, description)
    }

    /// Price a route with explicit requirement templates, in preference order.
    pub fn route_with(
        mut self,
        method: &str,
        path: &str,
        tags: Vec<PriceTag>,
        description: Option<&str>,
    ) -> Result<Self, X402Error> {
        if tags.is_empty() {
            return Err(X402Error::ConfigError(format!(
                "route {method} {path} has no accepted payment"
            )));
        }

        let mut accepts = Vec::with_capacity(tags.len());
        for tag in tags {
            let scheme = self.schemes.get(&tag.scheme).ok_or_else(|| {
                X402Error::ConfigError(format!(
                    "route {method} {path}: scheme '{}' is not registered",
                    tag.scheme
                ))
            })?;
            let (amount, asset) = scheme.parse_price(&tag.price)?;
            accepts.push(PaymentRequirement {
                scheme: tag.scheme,
                network: tag.network.unwrap_or_else(|| scheme.network().to_string()),
                pay_to: tag.pay_to,
                asset,
                amount,
                resource: path.to_string(),
                description: description.map(String::from),
                mime_type: Some("application/json".to_string()),
                max_timeout_seconds: self.max_timeout_seconds,
                extra: scheme.extra(),
            });
        }

        self.routes
            .insert(route_key(method, path), RoutePaymentConfig { accepts });
        Ok(self)
    }

    pub fn build(self) -> PaymentConfig {
        PaymentConfig {
            routes: self.routes,
            schemes: self.schemes,
        }
    }
}

/// Routes of the demo weather API: `/weather` at $0.001 and `/premium-data` at $0.01.
pub fn demo_payment_config(pay_to: &str) -> Result<PaymentConfig, X402Error> {
    let schemes = SchemeRegistry::<dyn SchemeServer>::new().with(x402::ExactEvmSchemeServer::new());
    Ok(PaymentConfigBuilder::new(schemes, pay_to)
        .route(
            "GET",
            "/weather",
            "$0.001",
            Some("Get current weather data"),
        )?
        .route(
            "GET",
            "/premium-data",
            "$0.01",
            Some("Get premium market data analysis"),
        )?
        .build())
}
