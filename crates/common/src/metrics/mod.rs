//! Metrics and observability utilities
//!
//! Prometheus series for the fetch cycle, the sentiment scorer and
//! user ratings, with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all MoodMap metrics
pub const METRICS_PREFIX: &str = "moodmap";

/// Buckets for a full fetch cycle (content fetch + scoring + commit)
pub const FETCH_CYCLE_BUCKETS: &[f64] = &[
    0.010,  // 10ms - refusals
    0.050,  // 50ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Fetch coordinator
    describe_counter!(
        format!("{}_fetch_cycles_total", METRICS_PREFIX),
        Unit::Count,
        "Fetch cycles by outcome"
    );

    describe_histogram!(
        format!("{}_fetch_cycle_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Fetch cycle latency in seconds"
    );

    describe_counter!(
        format!("{}_posts_fetched_total", METRICS_PREFIX),
        Unit::Count,
        "Posts returned by the content source"
    );

    // Sentiment scorer
    describe_counter!(
        format!("{}_sentiment_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Sentiment API requests by status"
    );

    describe_counter!(
        format!("{}_sentiment_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Scores replaced by the neutral fallback"
    );

    // Ratings
    describe_counter!(
        format!("{}_ratings_total", METRICS_PREFIX),
        Unit::Count,
        "User mood submissions by outcome"
    );

    tracing::info!("Metrics registered");
}

/// Times one fetch cycle
pub struct FetchCycleTimer {
    start: Instant,
}

impl FetchCycleTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record the cycle under its outcome label
    pub fn finish(self, outcome: &'static str) {
        record_fetch_cycle(outcome, self.start.elapsed().as_secs_f64());
    }
}

/// Helper to record a finished fetch cycle
pub fn record_fetch_cycle(outcome: &'static str, duration_secs: f64) {
    counter!(
        format!("{}_fetch_cycles_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(format!("{}_fetch_cycle_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record posts returned by the content source
pub fn record_posts_fetched(country: &str, count: usize) {
    counter!(
        format!("{}_posts_fetched_total", METRICS_PREFIX),
        "country" => country.to_string()
    )
    .increment(count as u64);
}

/// Helper to record a sentiment API call
pub fn record_sentiment(success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_sentiment_requests_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

/// Helper to record a neutral-score substitution
pub fn record_sentiment_fallback(reason: &'static str) {
    counter!(
        format!("{}_sentiment_fallbacks_total", METRICS_PREFIX),
        "reason" => reason
    )
    .increment(1);
}

/// Helper to record a rating submission
pub fn record_rating(outcome: &'static str) {
    counter!(
        format!("{}_ratings_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}
