//! Metrics module
//!
//! Provides Prometheus metrics for routes, storage and predictor dispatch.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

lazy_static! {
    // Request metrics
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "kagami_requests_total",
        "Total number of requests by route and status",
        &["route", "status"]
    ).expect("register kagami_requests_total");

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "kagami_request_duration_seconds",
        "Request duration in seconds",
        &["route"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).expect("register kagami_request_duration_seconds");

    // Storage metrics
    pub static ref FILES_STORED: CounterVec = register_counter_vec!(
        "kagami_files_stored_total",
        "Files written to local storage",
        &["category"]
    ).expect("register kagami_files_stored_total");

    pub static ref STORED_BYTES: Counter = register_counter!(
        "kagami_stored_bytes_total",
        "Bytes written to local storage"
    ).expect("register kagami_stored_bytes_total");

    // Predictor metrics
    pub static ref PREDICT_REQUESTS: CounterVec = register_counter_vec!(
        "kagami_predict_requests_total",
        "Requests proxied to the predictor",
        &["category", "status"]
    ).expect("register kagami_predict_requests_total");

    pub static ref PREDICT_DURATION: HistogramVec = register_histogram_vec!(
        "kagami_predict_duration_seconds",
        "Predictor round-trip duration in seconds",
        &["category"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("register kagami_predict_duration_seconds");

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "kagami_errors_total",
        "Total errors",
        &["type"]
    ).expect("register kagami_errors_total");
}

/// Record a finished request
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    REQUESTS_TOTAL
        .with_label_values(&[route, status.as_str()])
        .inc();
    REQUEST_DURATION
        .with_label_values(&[route])
        .observe(duration_secs);
}

/// Record a file written to a storage directory
pub fn record_file_stored(category: &str, bytes: u64) {
    FILES_STORED.with_label_values(&[category]).inc();
    STORED_BYTES.inc_by(bytes as f64);
}

/// Record a predictor round trip
pub fn record_predict(category: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failure" };
    PREDICT_REQUESTS
        .with_label_values(&[category, status])
        .inc();
    PREDICT_DURATION
        .with_label_values(&[category])
        .observe(duration_secs);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        record_request("/api/upload", 201, 0.02);
        let count = REQUESTS_TOTAL
            .with_label_values(&["/api/upload", "201"])
            .get();
        assert!(count >= 1.0);
    }

    #[test]
    fn test_record_file_stored() {
        let before = FILES_STORED.with_label_values(&["audio"]).get();
        record_file_stored("audio", 1024);
        assert!(FILES_STORED.with_label_values(&["audio"]).get() >= before + 1.0);
    }

    #[test]
    fn test_record_predict() {
        record_predict("image", false, 0.5);
        assert!(PREDICT_REQUESTS.with_label_values(&["image", "failure"]).get() >= 1.0);
    }

    #[test]
    fn test_record_error() {
        record_error("upload_failed");
        // Just verify it doesn't panic
    }
}
