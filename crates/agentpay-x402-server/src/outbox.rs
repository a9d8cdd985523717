//! Reconciliation of settlements that failed after the paid response was sent.
//!
//! Failed settlements are queued in a bounded [`SettlementOutbox`]. A background
//! reconciler re-submits each entry through the facilitator's idempotent `settle`,
//! asking for its status first, until it settles or runs out of attempts.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use x402::{Facilitator, PaymentPayload, PaymentRequirement};

use crate::metrics::{OUTBOX_DEPTH, RECONCILIATIONS};

#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub payload: PaymentPayload,
    pub requirement: PaymentRequirement,
    /// Reason of the most recent failure.
    pub reason: String,
    pub attempts: u32,
}

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub settled: usize,
    pub abandoned: usize,
    pub pending: usize,
    /// Entries pushed out by the capacity bound when retries were re-queued.
    pub dropped: usize,
}

pub struct SettlementOutbox {
    entries: Mutex<VecDeque<OutboxEntry>>,
    capacity: usize,
    max_attempts: u32,
}

impl Default for SettlementOutbox {
    fn default() -> Self {
        Self::new(1_000, 10)
    }
}

impl SettlementOutbox {
    pub fn new(capacity: usize, max_attempts: u32) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<OutboxEntry>> {
        match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => {
                tracing::error!("outbox mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Queue a failed settlement. When full, the oldest entry is dropped.
    pub fn push(&self, payload: PaymentPayload, requirement: PaymentRequirement, reason: String) {
        let mut entries = self.entries();
        if entries.len() >= self.capacity {
            if let Some(dropped) = entries.pop_front() {
                tracing::error!(
                    payer = dropped.payload.payer_hint().unwrap_or("unknown"),
                    resource = %dropped.requirement.resource,
                    "settlement outbox full, dropping oldest entry"
                );
            }
        }
        entries.push_back(OutboxEntry {
            payload,
            requirement,
            reason,
            attempts: 0,
        });
        OUTBOX_DEPTH.set(entries.len() as i64);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn snapshot(&self) -> Vec<OutboxEntry> {
        self.entries().iter().cloned().collect()
    }

    /// Run one pass over the queued entries.
    pub async fn reconcile_once(&self, facilitator: &dyn Facilitator) -> ReconcileReport {
        let batch: Vec<OutboxEntry> = self.entries().drain(..).collect();
        let mut report = ReconcileReport::default();
        let mut retry = Vec::new();

        for mut entry in batch {
            let payer = entry.payload.payer_hint().unwrap_or("unknown").to_string();

            if let Ok(Some(receipt)) = facilitator
                .settlement_status(&entry.payload, &entry.requirement)
                .await
            {
                tracing::info!(
                    payer = %payer,
                    tx = receipt.transaction.as_deref().unwrap_or("pending"),
                    "reconciled settlement found by status query"
                );
                report.settled += 1;
                continue;
            }

            match facilitator.settle(&entry.payload, &entry.requirement).await {
                Ok(receipt) if receipt.success => {
                    tracing::info!(
                        payer = %payer,
                        tx = receipt.transaction.as_deref().unwrap_or("pending"),
                        "reconciled settlement"
                    );
                    report.settled += 1;
                }
                Ok(receipt) => {
                    tracing::error!(
                        payer = %payer,
                        resource = %entry.requirement.resource,
                        reason = receipt.error_reason.as_deref().unwrap_or("unknown"),
                        "settlement refused during reconciliation, abandoning"
                    );
                    report.abandoned += 1;
                }
                Err(e) => {
                    entry.attempts += 1;
                    entry.reason = e.to_string();
                    if entry.attempts >= self.max_attempts {
                        tracing::error!(
                            payer = %payer,
                            resource = %entry.requirement.resource,
                            attempts = entry.attempts,
                            error = %e,
                            "settlement unresolved after max attempts, abandoning"
                        );
                        report.abandoned += 1;
                    } else {
                        retry.push(entry);
                    }
                }
            }
        }

        report.pending = retry.len();
        let mut entries = self.entries();
        // Entries queued during the pass stay behind the retried ones.
        for entry in retry.into_iter().rev() {
            entries.push_front(entry);
        }
        while entries.len() > self.capacity {
            if let Some(dropped) = entries.pop_back() {
                tracing::error!(
                    payer = dropped.payload.payer_hint().unwrap_or("unknown"),
                    resource = %dropped.requirement.resource,
                    "settlement outbox full after reconciliation, dropping newest entry"
                );
                report.dropped += 1;
            }
        }
        OUTBOX_DEPTH.set(entries.len() as i64);
        drop(entries);

        RECONCILIATIONS
            .with_label_values(&["settled"])
            .inc_by(report.settled as u64);
        RECONCILIATIONS
            .with_label_values(&["abandoned"])
            .inc_by(report.abandoned as u64);
        RECONCILIATIONS
            .with_label_values(&["dropped"])
            .inc_by(report.dropped as u64);
        report
    }

    /// Start a background task that reconciles the outbox every `interval`.
    pub fn start_reconciler(
        self: &Arc<Self>,
        facilitator: Arc<dyn Facilitator>,
        interval: Duration,
    ) {
        let outbox = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if outbox.is_empty() {
                    continue;
                }
                let report = outbox.reconcile_once(facilitator.as_ref()).await;
                tracing::info!(
                    settled = report.settled,
                    abandoned = report.abandoned,
                    pending = report.pending,
                    dropped = report.dropped,
                    "settlement reconciliation pass"
                );
            }
        });
    }
}
