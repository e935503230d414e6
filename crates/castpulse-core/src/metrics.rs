//! Process-wide Prometheus metrics.
//!
//! Counters and histograms register against the default registry on
//! first touch; the server binary exposes them as text on /metrics.

use std::sync::LazyLock;

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Latency buckets in milliseconds, tuned for model inference.
const LATENCY_BUCKETS_MS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

static SENTIMENT_INFER_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "castpulse_sentiment_infer_total",
        "Sentiment inference calls by scope and outcome",
        &["scope", "status"]
    )
    .expect("register sentiment counter")
});

static SENTIMENT_LATENCY_MS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "castpulse_sentiment_latency_ms",
        "Sentiment inference latency in milliseconds",
        &["scope"],
        LATENCY_BUCKETS_MS.to_vec()
    )
    .expect("register sentiment latency histogram")
});

static MODEL_CACHE_BYTES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "castpulse_model_cache_bytes",
        "On-disk size of the model cache directory"
    )
    .expect("register model cache gauge")
});

static TASKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "castpulse_tasks_total",
        "Queue task executions by queue and outcome",
        &["queue", "outcome"]
    )
    .expect("register task counter")
});

static COMMENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "castpulse_comments_total",
        "Comments processed during ingestion by disposition",
        &["disposition"]
    )
    .expect("register comment counter")
});

/// `status` is one of `ok`, `fallback`, `error`.
pub fn inc_sentiment_infer(scope: &str, status: &str) {
    SENTIMENT_INFER_TOTAL
        .with_label_values(&[scope, status])
        .inc();
}

pub fn observe_sentiment_latency_ms(scope: &str, millis: f64) {
    SENTIMENT_LATENCY_MS
        .with_label_values(&[scope])
        .observe(millis);
}

pub fn set_model_cache_bytes(bytes: i64) {
    MODEL_CACHE_BYTES.set(bytes);
}

/// `outcome` is one of `ok`, `retry`, `failed`, `timeout`.
pub fn inc_task(queue: &str, outcome: &str) {
    TASKS_TOTAL.with_label_values(&[queue, outcome]).inc();
}

/// `disposition` is one of `inserted`, `updated`, `skipped`.
pub fn inc_comments(disposition: &str, count: u64) {
    COMMENTS_TOTAL
        .with_label_values(&[disposition])
        .inc_by(count);
}

/// Encode the default registry in Prometheus text exposition format.
pub fn gather_text() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("metrics encode failed: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_export() {
        inc_sentiment_infer("comment", "ok");
        inc_sentiment_infer("comment", "ok");
        inc_sentiment_infer("mention", "fallback");
        observe_sentiment_latency_ms("comment", 12.5);
        inc_task("ml", "ok");
        inc_comments("inserted", 3);
        set_model_cache_bytes(1024);

        let text = gather_text();
        assert!(text.contains("castpulse_sentiment_infer_total"));
        assert!(text.contains("castpulse_tasks_total"));
        assert!(text.contains("castpulse_model_cache_bytes"));
    }
}
