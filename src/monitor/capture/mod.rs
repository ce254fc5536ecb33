//! Packet sources.
//!
//! Two backends produce the same stream of [`HttpHit`]s:
//!
//! - [`CaptureBackend::Socket`]: a raw IPv4/TCP socket, decoded by hand in
//!   [`crate::monitor::decoder`]. Fast, Linux-oriented, needs `CAP_NET_RAW`.
//! - [`CaptureBackend::Pcap`]: libpcap with `etherparse` dissection. Works on
//!   any interface libpcap can open and suppresses the duplicate copy of each
//!   loopback frame.
//!
//! Either way the capture runs on its own thread and hands hits to the
//! ingestion loop through a bounded [`HitQueue`].

pub mod dissector;
pub mod raw;

use crate::logger::{Event, SharedLogger};
use crate::monitor::config::OVERFLOW_LOG_EVERY;
use crate::monitor::error::WatchError;
use crate::monitor::types::{HttpHit, SharedStats, ShutdownFlag};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::thread;

/// The closed set of capture implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    Socket,
    Pcap,
}

impl CaptureBackend {
    pub fn name(self) -> &'static str {
        match self {
            CaptureBackend::Socket => "socket",
            CaptureBackend::Pcap   => "pcap",
        }
    }
}

impl fmt::Display for CaptureBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CaptureBackend {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socket" => Ok(CaptureBackend::Socket),
            "pcap"   => Ok(CaptureBackend::Pcap),
            other    => Err(WatchError::Configuration(format!(
                "unknown capture backend '{}', choose 'socket' or 'pcap'",
                other
            ))),
        }
    }
}

/// Where and what to capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub backend:        CaptureBackend,
    /// Destination TCP port of the requests to count.
    pub port:           u16,
    /// Only count requests sent to this address.
    pub ip_filter:      Option<Ipv4Addr>,
    /// libpcap device for the pcap backend; ignored by the socket backend.
    pub interface:      String,
    /// Bound of the hit queue.
    pub queue_capacity: usize,
}

/// Everything a capture thread needs besides its socket.
#[derive(Clone)]
pub struct CaptureContext {
    pub logger:   SharedLogger,
    pub stats:    SharedStats,
    pub shutdown: ShutdownFlag,
}

/// Producer side of the capture → ingestion queue.
///
/// The queue is bounded. When it is full the oldest queued hit is discarded
/// to make room, so a stalled consumer costs history rather than memory.
pub struct HitQueue {
    tx:       Sender<HttpHit>,
    // Second handle on the consumer end, used only to discard the oldest hit.
    overflow: Receiver<HttpHit>,
    ctx:      CaptureContext,
}

impl HitQueue {
    /// Creates the queue and returns its consumer end.
    pub fn bounded(capacity: usize, ctx: CaptureContext) -> (Self, Receiver<HttpHit>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx, overflow: rx.clone(), ctx }, rx)
    }

    /// Enqueues `hit`, discarding the oldest queued hit if the queue is full.
    pub fn push(&self, mut hit: HttpHit) {
        loop {
            match self.tx.try_send(hit) {
                Ok(()) => {
                    self.ctx.stats.hits_captured.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(TrySendError::Full(back)) => {
                    if self.overflow.try_recv().is_ok() {
                        let dropped = self.ctx.stats.hits_overflowed.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped % OVERFLOW_LOG_EVERY == 1 {
                            self.ctx.logger.log(&Event::QueueOverflow { dropped });
                        }
                    }
                    hit = back;
                }
                // Unreachable while `overflow` holds the receiving end open.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Opens the configured backend and starts capturing on a new thread.
///
/// The socket or device is opened before this returns, so permission
/// problems surface here as [`WatchError::CaptureInit`] instead of inside the
/// thread. The thread runs until the shutdown flag is set.
pub fn start_capture(
    cfg: &CaptureConfig,
    ctx: CaptureContext,
) -> Result<(Receiver<HttpHit>, thread::JoinHandle<()>), WatchError> {
    let (queue, rx) = HitQueue::bounded(cfg.queue_capacity, ctx.clone());

    let handle = match cfg.backend {
        CaptureBackend::Socket => {
            let source = raw::RawSocketSource::open(cfg)?;
            thread::spawn(move || source.run(&queue, &ctx))
        }
        CaptureBackend::Pcap => {
            let source = dissector::PcapSource::open(cfg)?;
            thread::spawn(move || source.run(&queue, &ctx))
        }
    };

    Ok((rx, handle))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::logger::Logger;
    use crate::monitor::types::SessionStats;
    use chrono::Local;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    pub(crate) fn context() -> CaptureContext {
        CaptureContext {
            logger:   Arc::new(Logger::new(false, false, None).unwrap()),
            stats:    SessionStats::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn hit(section: &str) -> HttpHit {
        HttpHit {
            timestamp: Local::now(),
            source_ip: "10.1.1.1".to_string(),
            section:   section.to_string(),
        }
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("socket".parse::<CaptureBackend>().unwrap(), CaptureBackend::Socket);
        assert_eq!("PCAP".parse::<CaptureBackend>().unwrap(), CaptureBackend::Pcap);
        assert_eq!(CaptureBackend::Pcap.to_string(), "pcap");
    }

    #[test]
    fn unknown_backend_is_a_configuration_error() {
        let err = "scapy".parse::<CaptureBackend>().unwrap_err();
        assert!(matches!(err, WatchError::Configuration(ref m) if m.contains("scapy")));
    }

    #[test]
    fn full_queue_drops_the_oldest_hit() {
        let ctx = context();
        let (queue, rx) = HitQueue::bounded(2, ctx.clone());

        for s in ["/1", "/2", "/3", "/4"] {
            queue.push(hit(s));
        }

        let kept: Vec<String> = rx.try_iter().map(|h| h.section).collect();
        assert_eq!(kept, vec!["/3", "/4"]);
        assert_eq!(ctx.stats.hits_overflowed.load(Ordering::Relaxed), 2);
        assert_eq!(ctx.stats.hits_captured.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn hits_arrive_in_push_order() {
        let (queue, rx) = HitQueue::bounded(8, context());
        for s in ["/a", "/b", "/c"] {
            queue.push(hit(s));
        }
        let got: Vec<String> = rx.try_iter().map(|h| h.section).collect();
        assert_eq!(got, vec!["/a", "/b", "/c"]);
    }
}
