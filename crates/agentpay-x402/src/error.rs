use thiserror::Error;

/// Errors returned by x402 operations.
#[derive(Debug, Error)]
pub enum X402Error {
    #[error("payment required")]
    MissingPayment,

    #[error("malformed payment: {0}")]
    MalformedPayment(String),

    #[error("no matching payment requirement: {0}")]
    UnmatchedRequirement(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("settlement failed: {0}")]
    SettlementFailed(String),

    #[error("facilitator unreachable: {0}")]
    FacilitatorUnreachable(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("no acceptable payment requirement: {0}")]
    NoAcceptableRequirement(String),

    #[error("payment rejected: {0}")]
    PaymentRejected(String),

    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("http error: {0}")]
    HttpError(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl X402Error {
    /// Transient failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, X402Error::FacilitatorUnreachable(_))
    }
}
