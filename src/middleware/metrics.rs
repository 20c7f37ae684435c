//! Prometheus metrics for the authorization path.
//!
//! Exposed at `/metrics` for scraping. All series live in the global default
//! registry and are registered lazily on first use, so building several
//! routers in one process (tests) never double-registers.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter,
    register_int_counter_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

static AUTH_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("patgate_auth_decisions_total", "Authorization decisions by outcome"),
        &["outcome", "reason"]
    )
    .expect("failed to register patgate_auth_decisions_total")
});

static RATE_LIMITED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "patgate_rate_limited_total",
        "Requests rejected by the rate limiter"
    ))
    .expect("failed to register patgate_rate_limited_total")
});

static AUDIT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("patgate_audit_failures_total", "Audit writes that did not land"),
        &["kind"]
    )
    .expect("failed to register patgate_audit_failures_total")
});

static AUTH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "patgate_authorization_duration_seconds",
            "Time from credential extraction to decision",
            vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 2.0]
        ),
        &["outcome"]
    )
    .expect("failed to register patgate_authorization_duration_seconds")
});

fn outcome(allowed: bool) -> &'static str {
    if allowed {
        "allowed"
    } else {
        "denied"
    }
}

/// `reason` is one of the fixed denial strings, or `None` on success.
pub fn record_decision(allowed: bool, reason: Option<&str>, elapsed_secs: f64) {
    let outcome = outcome(allowed);
    AUTH_DECISIONS
        .with_label_values(&[outcome, reason.unwrap_or("")])
        .inc();
    AUTH_DURATION.with_label_values(&[outcome]).observe(elapsed_secs);
}

pub fn record_rate_limited() {
    RATE_LIMITED.inc();
}

pub fn record_audit_failure(kind: &str) {
    AUDIT_FAILURES.with_label_values(&[kind]).inc();
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────
