//! x402 client for making paid API requests.
//!
//! [`X402Client`] handles the HTTP 402 flow automatically: request, 402 challenge,
//! sign, retry once. The [`agent`] module is the demo agent built on it and
//! [`supervisor`] runs the resource server as a child process for the demo.
//!
//! # Quick Example
//!
//! ```no_run
//! use alloy::signers::local::PrivateKeySigner;
//! use x402_client::{ExactEvmSchemeClient, X402Client};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), x402_client::ClientError> {
//! let signer: PrivateKeySigner = "0xYOUR_KEY".parse().unwrap();
//! let client = X402Client::with_scheme(ExactEvmSchemeClient::new(signer))?;
//!
//! let (resp, receipt) = client
//!     .fetch("https://api.example.com/weather", reqwest::Method::GET)
//!     .await?;
//!
//! if let Some(r) = receipt {
//!     println!("Paid via tx: {:?}", r.transaction);
//! }
//! # let _ = resp;
//! # Ok(())
//! # }
//! ```

pub mod agent;
mod error;
mod http_client;
pub mod supervisor;

pub use error::{ClientError, FailedResponse};
pub use http_client::X402Client;

// Re-export commonly needed types from core
pub use x402::{
    Challenge, ExactEvmSchemeClient, PaymentPayload, PaymentRequirement, SchemeClient,
    SchemeRegistry, SettlementReceipt, X402Error,
};
