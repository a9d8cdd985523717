//! x402 facilitator service: verifies `exact` EVM payment authorizations and settles
//! each of them exactly once.
//!
//! Resource servers talk to it through [`x402::HttpFacilitatorClient`]. Request bodies
//! are authenticated with an HMAC in `X-Facilitator-Auth`; settlement records live in
//! a SQLite nonce store so a replayed or retried authorization never pays twice.
//!
//! # Modules
//!
//! - [`routes`]: HTTP endpoints (health, supported, verify, settle, settle/status, metrics)
//! - [`state`]: shared [`AppState`](state::AppState)
//! - [`bootstrap`]: environment settings and state construction
//! - [`metrics`]: Prometheus metrics for verification and settlement

pub mod bootstrap;
pub mod metrics;
pub mod routes;
pub mod state;

pub use bootstrap::{bootstrap, FacilitatorConfig};
pub use state::AppState;
