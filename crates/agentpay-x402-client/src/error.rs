use thiserror::Error;
use x402::{Challenge, X402Error};

/// What the server answered when a paid call could not complete.
#[derive(Debug, Clone)]
pub struct FailedResponse {
    pub status: u16,
    /// Parsed 402 challenge, when the body was one.
    pub challenge: Option<Challenge>,
    pub body: String,
}

/// Errors returned by [`X402Client`](crate::X402Client) and the agent flow.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server refused to serve the call; `response` is what it sent.
    #[error("{error}")]
    Rejected {
        error: X402Error,
        response: Box<FailedResponse>,
    },

    /// Signing or encoding failed before the paid retry was sent.
    #[error(transparent)]
    Payment(#[from] X402Error),

    #[error("{url} not healthy after {attempts} attempts")]
    Unhealthy { url: String, attempts: u32 },

    #[error("process error: {0}")]
    Process(#[from] std::io::Error),
}

impl ClientError {
    pub(crate) fn rejected(error: X402Error, response: FailedResponse) -> Self {
        ClientError::Rejected {
            error,
            response: Box::new(response),
        }
    }

    /// Snapshot of the server response behind a rejection.
    pub fn response(&self) -> Option<&FailedResponse> {
        match self {
            ClientError::Rejected { response, .. } => Some(response),
            _ => None,
        }
    }

    /// The protocol error behind a rejection or a failed payment.
    pub fn protocol_error(&self) -> Option<&X402Error> {
        match self {
            ClientError::Rejected { error, .. } | ClientError::Payment(error) => Some(error),
            _ => None,
        }
    }
}
