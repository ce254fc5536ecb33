use crate::monitor::config::{
    DEFAULT_ALERT_PERIOD, DEFAULT_PORT, HIT_QUEUE_CAPACITY, RETENTION_PERIOD,
};
use clap::Parser;
use std::net::Ipv4Addr;

/// trafficwatch: live HTTP traffic statistics for this host.
///
/// Captures requests sent to a local TCP port, reports the most requested
/// sections and the request rate, and raises an alert while traffic stays
/// above a threshold.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "trafficwatch",
    version = "0.2.0",
    about   = "Watch HTTP traffic on a port and alert on high load",
    long_about = None,
)]
pub struct Cli {
    // ── Capture ──────────────────────────────────────────────────────────────

    /// Destination TCP port to watch.
    #[arg(short = 'p', long = "port", value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Only count requests sent to this IPv4 address.
    ///
    /// If omitted, requests to any local address are counted as long as the
    /// port matches.
    #[arg(long = "ip", value_name = "ADDR")]
    pub ip: Option<Ipv4Addr>,

    /// Capture backend: 'socket' (raw socket, fast) or 'pcap' (libpcap).
    ///
    /// Both need root or CAP_NET_RAW. The pcap backend also counts loopback
    /// requests exactly once on interfaces that report them twice.
    #[arg(short = 'b', long = "backend", value_name = "NAME", default_value = "socket")]
    pub backend: String,

    /// libpcap device used by the pcap backend.
    ///
    /// The default, 'any', covers every interface on Linux including loopback.
    #[arg(short = 'i', long = "interface", value_name = "IFACE", default_value = "any")]
    pub interface: String,

    /// Maximum number of captured hits waiting to be stored.
    ///
    /// When the queue is full the oldest waiting hits are discarded.
    #[arg(long = "queue-capacity", value_name = "N", default_value_t = HIT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    // ── Alerting ─────────────────────────────────────────────────────────────

    /// Alert when the average requests per second over the threshold period
    /// reaches this value. Default: 20. Cannot be combined with -t.
    #[arg(short = 's', long = "threshold-per-second", value_name = "RATE")]
    pub threshold_per_second: Option<f64>,

    /// Alert when the total requests over the threshold period reaches this
    /// value. Cannot be combined with -s.
    #[arg(short = 't', long = "threshold-total", value_name = "COUNT")]
    pub threshold_total: Option<f64>,

    /// Period over which the alert threshold is measured, in minutes.
    #[arg(long = "threshold-period", value_name = "MINUTES", default_value_t = DEFAULT_ALERT_PERIOD.as_secs_f64() / 60.0)]
    pub threshold_period: f64,

    // ── Retention ────────────────────────────────────────────────────────────

    /// How long captured requests are kept, in seconds. Also the window of the
    /// long popular-sections report.
    #[arg(long = "retention", value_name = "SECS", default_value_t = RETENTION_PERIOD.as_secs())]
    pub retention: u64,

    // ── Logging ──────────────────────────────────────────────────────────────

    /// Write log output to this file in addition to stdout.
    #[arg(short = 'o', long = "log-file", value_name = "PATH")]
    pub log_file: Option<String>,

    /// Emit log entries as newline-delimited JSON (NDJSON).
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Also log dropped frames and retention sweeps.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}
