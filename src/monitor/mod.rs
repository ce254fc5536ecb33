//! HTTP traffic monitoring pipeline.
//!
//! ```text
//! capture thread ──HitQueue──▶ ingestion thread ──▶ RecordStore
//!                                                      ▲
//!                         job threads (retention, popular, alert, rate)
//!                                                      │
//!                                  view queue ──▶ dashboard (calling thread)
//! ```
//!
//! The record store and the alert engine are the only shared mutable state.
//! Each has its own lock, and no thread ever holds both.

pub mod alert;
pub mod capture;
pub mod config;
pub mod dashboard;
pub mod decoder;
pub mod error;
pub mod popular;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod types;

use crate::logger::{Event, SharedLogger};
use crate::monitor::alert::AlertEngine;
use crate::monitor::capture::{start_capture, CaptureConfig, CaptureContext};
use crate::monitor::config::POLL_INTERVAL;
use crate::monitor::dashboard::render_views;
use crate::monitor::error::WatchError;
use crate::monitor::scheduler::{default_jobs, spawn_jobs, JobContext};
use crate::monitor::sink::Sink;
use crate::monitor::store::RecordStore;
use crate::monitor::types::*;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Configuration bundle passed from `main` into the monitoring engine.
pub struct MonitorConfig {
    /// What to capture and how.
    pub capture:   CaptureConfig,
    /// High-traffic alert threshold.
    pub threshold: ThresholdConfig,
    /// Maximum age of a stored hit.
    pub retention: Duration,
    /// Shared structured logger.
    pub logger:    SharedLogger,
    /// Shared session statistics for the shutdown summary.
    pub stats:     SharedStats,
    /// Set to `true` by the ctrlc handler; every loop exits on its next poll.
    pub shutdown:  ShutdownFlag,
}

/// Entry point for the monitoring engine.
///
/// Opens the capture backend, starts the ingestion and job threads, and runs
/// the dashboard on the calling thread until shutdown. All threads are joined
/// before returning.
///
/// # Errors
/// Any [`WatchError`] from opening the capture backend. Nothing is left
/// running when this fails.
pub fn start_monitor(cfg: MonitorConfig) -> Result<(), WatchError> {
    let store = Arc::new(RecordStore::new());
    let alert = Arc::new(AlertEngine::new(cfg.threshold));

    let (hits, capture_handle) = start_capture(
        &cfg.capture,
        CaptureContext {
            logger:   Arc::clone(&cfg.logger),
            stats:    Arc::clone(&cfg.stats),
            shutdown: Arc::clone(&cfg.shutdown),
        },
    )?;

    cfg.logger.log(&Event::Listening {
        port:    cfg.capture.port,
        ip:      cfg.capture.ip_filter.map(|ip| ip.to_string()).as_deref(),
        backend: cfg.capture.backend.name(),
    });

    let ingestion_handle = spawn_ingestion(hits, Arc::clone(&store), Arc::clone(&cfg.shutdown));

    let (view_tx, view_rx) = crossbeam_channel::unbounded();
    let sink: Arc<dyn Sink> = Arc::new(view_tx);
    let job_handles = spawn_jobs(
        default_jobs(cfg.retention),
        &JobContext {
            store: Arc::clone(&store),
            alert: Arc::clone(&alert),
            stats: Arc::clone(&cfg.stats),
        },
        sink,
        &cfg.shutdown,
    );

    render_views(&view_rx, &cfg.logger, &cfg.shutdown);

    for handle in job_handles {
        let _ = handle.join();
    }
    let _ = ingestion_handle.join();
    let _ = capture_handle.join();
    Ok(())
}

/// Moves hits from the capture queue into the store, in arrival order.
///
/// Each append takes the store lock on its own; waiting on the queue never
/// happens with the lock held.
pub fn spawn_ingestion(
    hits:     Receiver<HttpHit>,
    store:    Arc<RecordStore>,
    shutdown: ShutdownFlag,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            match hits.recv_timeout(POLL_INTERVAL) {
                Ok(hit) => store.append(hit),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn ingestion_preserves_arrival_order_and_stops_on_shutdown() {
        let (tx, rx) = crossbeam_channel::bounded(16);
        let store = Arc::new(RecordStore::new());
        let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));
        let handle = spawn_ingestion(rx, Arc::clone(&store), Arc::clone(&shutdown));

        for s in ["/1", "/2", "/3"] {
            tx.send(HttpHit {
                timestamp: Local::now(),
                source_ip: "10.0.0.1".to_string(),
                section:   s.to_string(),
            })
            .unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while store.len() < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let (window, _) = store::WindowSource::window(store.as_ref(), Duration::from_secs(60));
        let order: Vec<String> = window.into_iter().rev().map(|h| h.section).collect();
        assert_eq!(order, vec!["/1", "/2", "/3"]);

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
