//! Prometheus counters for analysis passes
//!
//! Label values are drawn from small fixed sets. Per-operator detail for
//! unrecognized records lives in the pass report, not in labels.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};

/// Label for unknown-operator records whose module has no calculators at all
pub const OTHER_MODULE: &str = "other";

// ── Record outcome metrics ───────────────────────────────────────────────────

pub static RECORDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "opmeter_records_total",
        "Trace records processed, by outcome",
        &["status"]
    )
    .unwrap()
});

// ── Coverage gap metrics ─────────────────────────────────────────────────────

pub static UNKNOWN_OPERATOR_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "opmeter_unknown_operator_total",
        "Records whose (module, operator) pair has no calculator, by module",
        &["module"]
    )
    .unwrap()
});

pub static UNKNOWN_DTYPE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "opmeter_unknown_dtype_total",
        "Records rejected for a dtype missing from the byte-width table",
        &["dtype"]
    )
    .unwrap()
});

// ── Exposition ───────────────────────────────────────────────────────────────

/// Render all registered metrics to Prometheus text format.
pub fn gather() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
