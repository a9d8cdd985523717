//! Settlement backends: the component that actually moves funds once a payment is
//! verified. Submission to a chain is outside this crate; the shipped [`LedgerBackend`]
//! records transfers in memory and hands out deterministic transaction references.

use std::sync::Mutex;

use alloy::primitives::{keccak256, Address, FixedBytes, U256};
use async_trait::async_trait;

use crate::X402Error;

/// A verified transfer to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub network: String,
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub nonce: FixedBytes<32>,
    /// Hex-encoded authorization signature, forwarded to backends that submit it.
    pub signature: String,
}

#[async_trait]
pub trait SettlementBackend: Send + Sync {
    /// Execute the transfer and return its transaction reference.
    ///
    /// An error leaves the outcome unknown to the caller; the transfer may or may not
    /// have happened.
    async fn transfer(&self, request: &TransferRequest) -> Result<String, X402Error>;
}

/// In-memory ledger of executed transfers.
#[derive(Default)]
pub struct LedgerBackend {
    transfers: Mutex<Vec<(TransferRequest, String)>>,
}

impl LedgerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded transfers with their transaction references.
    pub fn transfers(&self) -> Vec<(TransferRequest, String)> {
        match self.transfers.lock() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn transaction_ref(request: &TransferRequest) -> String {
        let mut preimage = Vec::with_capacity(request.network.len() + 20 + 32);
        preimage.extend_from_slice(request.network.as_bytes());
        preimage.extend_from_slice(request.from.as_slice());
        preimage.extend_from_slice(request.nonce.as_slice());
        format!("{}", keccak256(&preimage))
    }
}

#[async_trait]
impl SettlementBackend for LedgerBackend {
    async fn transfer(&self, request: &TransferRequest) -> Result<String, X402Error> {
        let tx = Self::transaction_ref(request);
        let mut transfers = match self.transfers.lock() {
            Ok(t) => t,
            Err(poisoned) => {
                tracing::error!("ledger mutex poisoned, recovering");
                poisoned.into_inner()
            }
        };
        transfers.push((request.clone(), tx.clone()));
        tracing::debug!(
            payer = %request.from,
            payee = %request.to,
            value = %request.value,
            tx = %tx,
            "transfer recorded"
        );
        Ok(tx)
    }
}
