mod cli;
mod logger;
mod monitor;

use cli::Cli;
use clap::Parser;
use get_if_addrs::{get_if_addrs, IfAddr};
use logger::{Event, Logger, SharedLogger};
use monitor::capture::{CaptureBackend, CaptureConfig};
use monitor::error::WatchError;
use monitor::types::{SessionStats, SharedStats, ShutdownFlag, ThresholdConfig};
use monitor::{start_monitor, MonitorConfig};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("[!] {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), WatchError> {
    // Initialize shutdown flag for graceful termination
    let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));

    // Track session duration for summary reporting
    let session_start = Instant::now();

    let logger: SharedLogger = Arc::new(
        Logger::new(cli.json, cli.verbose, cli.log_file.as_deref()).map_err(WatchError::LogFile)?,
    );
    let stats = SessionStats::new();

    // Fatal configuration problems stop us before any capture is opened.
    let cfg = build_config(&cli, Arc::clone(&logger), Arc::clone(&stats), Arc::clone(&shutdown))?;

    if let Some(ip) = cli.ip {
        warn_if_not_local(ip, &logger);
    }

    register_shutdown_handler(Arc::clone(&shutdown), &logger);

    start_monitor(cfg)?;

    print_summary(&logger, &stats, session_start);
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Turns command-line values into the monitor's plain configuration.
fn build_config(
    cli:      &Cli,
    logger:   SharedLogger,
    stats:    SharedStats,
    shutdown: ShutdownFlag,
) -> Result<MonitorConfig, WatchError> {
    let backend: CaptureBackend = cli.backend.parse()?;

    if !cli.threshold_period.is_finite() || cli.threshold_period <= 0.0 {
        return Err(WatchError::Configuration(format!(
            "threshold period must be a positive number of minutes, got {}",
            cli.threshold_period
        )));
    }
    let period = Duration::try_from_secs_f64(cli.threshold_period * 60.0).map_err(|e| {
        WatchError::Configuration(format!(
            "threshold period of {} minutes is out of range: {}",
            cli.threshold_period, e
        ))
    })?;
    let threshold = ThresholdConfig::from_options(cli.threshold_per_second, cli.threshold_total, period)?;

    let retention = Duration::from_secs(cli.retention);
    if retention < period {
        return Err(WatchError::Configuration(format!(
            "retention ({}s) must cover the alert period ({}s)",
            retention.as_secs(),
            period.as_secs_f64()
        )));
    }

    Ok(MonitorConfig {
        capture: CaptureConfig {
            backend,
            port:           cli.port,
            ip_filter:      cli.ip,
            interface:      cli.interface.clone(),
            queue_capacity: cli.queue_capacity,
        },
        threshold,
        retention,
        logger,
        stats,
        shutdown,
    })
}

/// Warns when the destination filter is not assigned to this host. Requests
/// to it can still be seen if they are routed here, so this is not fatal.
fn warn_if_not_local(ip: Ipv4Addr, logger: &SharedLogger) {
    let ifaces = match get_if_addrs() {
        Ok(ifaces) => ifaces,
        Err(e) => {
            logger.log(&Event::Info {
                message: &format!("Warning: cannot list interfaces ({}), skipping --ip check", e),
            });
            return;
        }
    };

    let local = ifaces.iter().any(|iface| matches!(&iface.addr, IfAddr::V4(v4) if v4.ip == ip));
    if !local {
        logger.log(&Event::Info {
            message: &format!("Warning: {} is not assigned to any local interface", ip),
        });
    }
}

/// Registers a signal handler for graceful shutdown on Ctrl+C
fn register_shutdown_handler(shutdown: ShutdownFlag, logger: &SharedLogger) {
    let result = ctrlc::set_handler(move || {
        println!("\n[!] Ctrl+C received, shutting down...");
        shutdown.store(true, Ordering::SeqCst);
    });

    if let Err(e) = result {
        logger.log(&Event::Info {
            message: &format!("Warning: no Ctrl+C handler ({}); the summary will not be printed", e),
        });
    }
}

/// Prints session summary statistics
fn print_summary(logger: &SharedLogger, stats: &SharedStats, session_start: Instant) {
    logger.log(&Event::SessionSummary {
        duration_secs:   session_start.elapsed().as_secs(),
        frames_seen:     stats.frames_seen.load(Ordering::Relaxed),
        hits_captured:   stats.hits_captured.load(Ordering::Relaxed),
        frames_dropped:  stats.frames_dropped.load(Ordering::Relaxed),
        hits_overflowed: stats.hits_overflowed.load(Ordering::Relaxed),
        alerts_emitted:  stats.alerts_emitted.load(Ordering::Relaxed),
    });
}
