//! Prometheus metrics for portal-frontend.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

/// HTTP request counter by method, matched path and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portal_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register http_requests_total")
});

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "portal_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register http_request_duration")
});

/// Sign-in attempts by outcome: success, rejected, unexpected.
pub static SIGN_IN_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portal_sign_in_total",
        "Total number of sign-in attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to register sign_in_total")
});

pub static SIGN_OUT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("portal_sign_out_total", "Total number of sign-outs")
        .expect("Failed to register sign_out_total")
});

/// Profile fetch failures by kind: network, unexpected.
pub static PROFILE_FETCH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portal_profile_fetch_failures_total",
        "Total number of failed profile fetches",
        &["kind"]
    )
    .expect("Failed to register profile_fetch_failures_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&SIGN_IN_TOTAL);
    Lazy::force(&SIGN_OUT_TOTAL);
    Lazy::force(&PROFILE_FETCH_FAILURES);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_exposed_after_init() {
        init_metrics();
        SIGN_IN_TOTAL.with_label_values(&["success"]).inc();
        SIGN_OUT_TOTAL.inc();

        let output = get_metrics();
        assert!(output.contains("portal_sign_in_total"));
        assert!(output.contains("portal_sign_out_total"));
    }
}
