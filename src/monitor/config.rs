use std::time::Duration;

/// Default destination port watched when `--port` is not given.
pub const DEFAULT_PORT: u16 = 8080;

/// Default alert threshold, in average requests per second over the alert period.
///
/// Only applies when neither `--threshold-per-second` nor `--threshold-total`
/// was supplied.
pub const DEFAULT_THRESHOLD_PER_SECOND: f64 = 20.0;

/// Default alert period. The command line takes this value in minutes.
pub const DEFAULT_ALERT_PERIOD: Duration = Duration::from_secs(120);

/// Maximum age a hit may reach before the retention job evicts it.
///
/// Also used as the window of the long popular-sections view, so the two
/// always describe the same slice of history.
pub const RETENTION_PERIOD: Duration = Duration::from_secs(600);

/// How often the retention job sweeps the record store.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

/// How often both popular-sections jobs run.
pub const POPULAR_INTERVAL: Duration = Duration::from_secs(10);

/// Trailing window of the short popular-sections view.
pub const POPULAR_WINDOW: Duration = Duration::from_secs(10);

/// Number of sections reported by the popular-sections jobs.
pub const TOP_SECTIONS: usize = 5;

/// How often the alert engine is checked.
///
/// The engine only sees the window at the instants it is asked, so this must
/// stay well below the alert period or threshold crossings shorter than the
/// interval go unnoticed.
pub const ALERT_INTERVAL: Duration = Duration::from_secs(1);

/// How often the instantaneous request rate is computed.
pub const RATE_INTERVAL: Duration = Duration::from_secs(1);

/// Trailing window counted by the rate job.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Number of alert events kept in the alert history. Oldest are dropped first.
pub const ALERT_HISTORY_CAPACITY: usize = 500;

/// Default bound of the capture → ingestion hit queue.
pub const HIT_QUEUE_CAPACITY: usize = 65_536;

/// Number of loopback fingerprints the dissector remembers while waiting for
/// the inbound half of a frame.
pub const LOOPBACK_DEDUPE_CAPACITY: usize = 4_096;

/// Receive buffer for one raw frame: the largest possible IPv4 datagram.
pub const RECV_BUFFER_SIZE: usize = 65_535;

/// Upper bound on how long any blocking call waits before re-checking the
/// shutdown flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Queue overflows are logged once per this many dropped hits.
pub const OVERFLOW_LOG_EVERY: u64 = 1_000;
