//! Metrics module
//!
//! Prometheus counters and histograms for upload activity.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "sp_uploads_total",
        "Total number of uploads",
        &["strategy", "status"]  // strategy: "fast_path" or "chunked"
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "sp_upload_bytes_total",
        "Total bytes acknowledged by the remote service"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "sp_upload_duration_seconds",
        "Upload duration in seconds",
        &["strategy"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    // Session metrics
    pub static ref CHUNKS_SENT: CounterVec = register_counter_vec!(
        "sp_upload_chunks_total",
        "Chunks acknowledged, by protocol phase",
        &["phase"]
    ).unwrap();

    pub static ref SESSION_CHUNKS: Histogram = register_histogram!(
        "sp_upload_session_chunks",
        "Number of chunks per finished upload session",
        vec![2.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    pub static ref SESSION_ABORTS: CounterVec = register_counter_vec!(
        "sp_upload_session_aborts_total",
        "Upload sessions aborted, by failing stage",
        &["stage"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "sp_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(strategy: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[strategy, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload
pub fn record_upload_failure(strategy: &str) {
    UPLOADS_TOTAL.with_label_values(&[strategy, "failure"]).inc();
}

/// Record upload duration
pub fn record_upload_duration(strategy: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[strategy])
        .observe(duration_secs);
}

/// Record an acknowledged chunk
pub fn record_chunk_sent(phase: &str) {
    CHUNKS_SENT.with_label_values(&[phase]).inc();
}

/// Record a finished session
pub fn record_session_finished(chunks: usize) {
    SESSION_CHUNKS.observe(chunks as f64);
}

/// Record an aborted session
pub fn record_session_abort(stage: &str) {
    SESSION_ABORTS.with_label_values(&[stage]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
