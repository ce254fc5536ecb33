//! Error taxonomy for the monitor.
//!
//! [`WatchError`] covers everything that aborts startup. [`FrameDecodeError`]
//! describes why a single captured frame was dropped; it never stops capture.

use std::io;
use thiserror::Error;

/// Fatal errors raised while the monitor is being set up.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The capture socket or device could not be opened. On Linux this almost
    /// always means the process lacks root or `CAP_NET_RAW`.
    #[error("cannot open {backend} capture: {reason} (are you running with root/CAP_NET_RAW?)")]
    CaptureInit {
        backend: &'static str,
        reason:  String,
    },

    /// Invalid or contradictory configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The log file could not be opened for appending.
    #[error("cannot open log file: {0}")]
    LogFile(#[source] io::Error),
}

/// Reasons a captured frame does not yield an `HttpHit`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameDecodeError {
    #[error("frame truncated: needed {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("not an IPv4 datagram (version {0})")]
    NotIpv4(u8),

    #[error("invalid {layer} header length {length}")]
    BadHeaderLength { layer: &'static str, length: usize },

    #[error("frame could not be dissected: {0}")]
    Dissect(String),

    #[error("payload is not valid UTF-8")]
    PayloadNotUtf8,

    #[error("payload is not an HTTP request line")]
    NotHttpRequest,
}
