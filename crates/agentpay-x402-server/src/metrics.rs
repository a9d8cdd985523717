use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::LazyLock;

pub static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "x402_server_requests_total",
        "Total paid-route requests",
        &["endpoint", "status"]
    )
    .expect("register x402_server_requests_total")
});

pub static PAYMENT_ATTEMPTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "x402_server_payment_attempts_total",
        "Payment verification outcomes",
        &["result"]
    )
    .expect("register x402_server_payment_attempts_total")
});

pub static SETTLEMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "x402_server_settlements_total",
        "Settlement outcomes after the handler ran",
        &["result"]
    )
    .expect("register x402_server_settlements_total")
});

pub static FACILITATOR_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "x402_server_facilitator_seconds",
        "Facilitator call latency",
        &["operation"]
    )
    .expect("register x402_server_facilitator_seconds")
});

pub static OUTBOX_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "x402_server_outbox_depth",
        "Failed settlements awaiting reconciliation"
    )
    .expect("register x402_server_outbox_depth")
});

pub static RECONCILIATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "x402_server_reconciliations_total",
        "Outbox entries resolved by the reconciler",
        &["result"]
    )
    .expect("register x402_server_reconciliations_total")
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
