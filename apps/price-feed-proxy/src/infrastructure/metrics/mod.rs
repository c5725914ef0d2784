//! Prometheus Metrics Module
//!
//! Exposes multiplexer metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Samples**: prices published, samples dropped for slow subscribers
//! - **Polls**: failed reads by kind, read latency
//! - **Sessions**: start outcomes, live sessions and subscribers
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe all metrics.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns [`BuildError`] if a different global recorder is already
/// installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_feed_samples_published_total",
        "Price samples published by sessions"
    );
    describe_counter!(
        "price_feed_samples_lagged_total",
        "Samples a slow subscriber skipped because the fan-out buffer wrapped"
    );
    describe_counter!(
        "price_feed_poll_failures_total",
        "Failed price reads by error kind"
    );
    describe_counter!(
        "price_feed_session_starts_total",
        "Session start attempts by outcome"
    );

    describe_gauge!("price_feed_active_sessions", "Sessions in the registry");
    describe_gauge!(
        "price_feed_active_subscribers",
        "Unreleased subscriber handles across all sessions"
    );

    describe_histogram!(
        "price_feed_poll_duration_seconds",
        "Time spent reading one price from the upstream page"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for session start attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Page opened and the poll loop is running.
    Started,
    /// Page could not be opened.
    Unavailable,
}

impl StartOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Record a published sample for `feed` (`EXCHANGE:TICKER`).
pub fn record_sample_published(feed: &str) {
    counter!("price_feed_samples_published_total", "feed" => feed.to_string()).increment(1);
}

/// Record samples skipped by a lagging subscriber.
pub fn record_samples_lagged(count: u64) {
    counter!("price_feed_samples_lagged_total").increment(count);
}

/// Record a failed read. `kind` is a [`SourceError::kind`] label.
///
/// [`SourceError::kind`]: crate::application::ports::SourceError::kind
pub fn record_poll_failure(kind: &'static str) {
    counter!("price_feed_poll_failures_total", "kind" => kind).increment(1);
}

/// Record the duration of one read.
pub fn record_poll_duration(duration: Duration) {
    histogram!("price_feed_poll_duration_seconds").record(duration.as_secs_f64());
}

/// Record a session start attempt.
pub fn record_session_start(outcome: StartOutcome) {
    counter!("price_feed_session_starts_total", "outcome" => outcome.as_str()).increment(1);
}

/// Update the registry gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_registry_gauges(sessions: usize, subscribers: usize) {
    gauge!("price_feed_active_sessions").set(sessions as f64);
    gauge!("price_feed_active_subscribers").set(subscribers as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_outcome_as_str() {
        assert_eq!(StartOutcome::Started.as_str(), "started");
        assert_eq!(StartOutcome::Unavailable.as_str(), "unavailable");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_sample_published("BINANCE:BTCUSD");
        record_samples_lagged(3);
        record_poll_failure("transient");
        record_poll_duration(Duration::from_millis(5));
        record_session_start(StartOutcome::Started);
        set_registry_gauges(1, 2);
    }
}
