use crate::monitor::config::DEFAULT_THRESHOLD_PER_SECOND;
use crate::monitor::error::WatchError;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

/// One observed HTTP request, reduced to what the dashboard needs.
///
/// Hits are created once by a capture backend and never mutated afterwards;
/// every consumer works on clones or borrows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpHit {
    /// Wall-clock instant at which the frame carrying the request arrived.
    pub timestamp: DateTime<Local>,

    /// Dotted-decimal IPv4 source address of the request.
    pub source_ip: String,

    /// First path segment of the request target, always starting with `/`.
    /// Targets with a single segment (`/index.html`) map to `/`.
    pub section: String,
}

/// How the alert threshold is compared against the traffic in the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Average hits per second over the period.
    PerSecond,
    /// Raw hit count over the period.
    Total,
}

/// Alert threshold settings. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdConfig {
    pub value:  f64,
    pub period: Duration,
    pub mode:   ThresholdMode,
}

impl ThresholdConfig {
    /// Builds the threshold from the two mutually exclusive command-line forms.
    ///
    /// Neither given falls back to [`DEFAULT_THRESHOLD_PER_SECOND`].
    ///
    /// # Errors
    /// [`WatchError::Configuration`] when both forms are given, when the
    /// threshold is not a positive number, or when the period is zero.
    pub fn from_options(
        per_second: Option<f64>,
        total:      Option<f64>,
        period:     Duration,
    ) -> Result<Self, WatchError> {
        let (value, mode) = match (per_second, total) {
            (Some(_), Some(_)) => {
                return Err(WatchError::Configuration(
                    "per-second and total thresholds cannot be used together".to_string(),
                ))
            }
            (None, Some(t)) => (t, ThresholdMode::Total),
            (Some(s), None) => (s, ThresholdMode::PerSecond),
            (None, None)    => (DEFAULT_THRESHOLD_PER_SECOND, ThresholdMode::PerSecond),
        };

        if !value.is_finite() || value <= 0.0 {
            return Err(WatchError::Configuration(format!(
                "alert threshold must be a positive number, got {}",
                value
            )));
        }
        if period.is_zero() {
            return Err(WatchError::Configuration(
                "alert period must be longer than zero".to_string(),
            ));
        }

        Ok(Self { value, period, mode })
    }
}

/// Running totals reported in the session summary.
///
/// Every field is monotonically increasing and updated with relaxed atomics;
/// readers only need an approximate snapshot.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Frames handed to a decoder, whatever the outcome.
    pub frames_seen:     AtomicU64,
    /// Frames that produced an `HttpHit`.
    pub hits_captured:   AtomicU64,
    /// Frames rejected as malformed, undecodable or non-HTTP.
    pub frames_dropped:  AtomicU64,
    /// Hits discarded because the ingestion queue was full.
    pub hits_overflowed: AtomicU64,
    /// Alert transitions (raised and recovered).
    pub alerts_emitted:  AtomicU64,
}

impl SessionStats {
    pub fn new() -> SharedStats {
        Arc::new(Self::default())
    }
}

pub type SharedStats = Arc<SessionStats>;

/// Set to `true` by the Ctrl+C handler; every long-running loop polls it.
pub type ShutdownFlag = Arc<AtomicBool>;
