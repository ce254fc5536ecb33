//! Periodic jobs over the record store.
//!
//! Each job is a plain computation ([`Job::run`]) returning a payload; the
//! timer thread around it ([`spawn_job`]) is the only part that knows about
//! the output queue. Jobs are scheduled independently and take the store lock
//! separately, so no ordering between them is implied.

use crate::monitor::alert::AlertEngine;
use crate::monitor::config::*;
use crate::monitor::popular::recent_sections;
use crate::monitor::sink::{job_id, Sink, ViewModel, ViewPayload};
use crate::monitor::store::{RecordStore, WindowSource};
use crate::monitor::types::{SharedStats, ShutdownFlag};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// The work a job performs on each tick.
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    /// Evict hits older than `retention`.
    Retention { retention: Duration },
    /// Rank sections over the trailing `window`.
    Popular { window: Duration, top_n: usize },
    /// Run one alert check.
    Alert,
    /// Count hits in the trailing `window`.
    Rate { window: Duration },
}

/// A job and its schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id:    &'static str,
    pub every: Duration,
    pub kind:  JobKind,
}

/// Shared state the jobs read from.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<RecordStore>,
    pub alert: Arc<AlertEngine>,
    pub stats: SharedStats,
}

/// The standard job set for a given retention period.
pub fn default_jobs(retention: Duration) -> Vec<Job> {
    vec![
        Job {
            id:    job_id::RETENTION,
            every: CLEANUP_INTERVAL,
            kind:  JobKind::Retention { retention },
        },
        Job {
            id:    job_id::POPULAR,
            every: POPULAR_INTERVAL,
            kind:  JobKind::Popular { window: POPULAR_WINDOW, top_n: TOP_SECTIONS },
        },
        Job {
            id:    job_id::POPULAR_LONG,
            every: POPULAR_INTERVAL,
            kind:  JobKind::Popular { window: retention, top_n: TOP_SECTIONS },
        },
        Job {
            id:    job_id::ALERT,
            every: ALERT_INTERVAL,
            kind:  JobKind::Alert,
        },
        Job {
            id:    job_id::RATE,
            every: RATE_INTERVAL,
            kind:  JobKind::Rate { window: RATE_WINDOW },
        },
    ]
}

impl Job {
    /// Runs the job once. `None` means there is nothing to show this tick
    /// (the alert job only reports transitions).
    pub fn run(&self, ctx: &JobContext) -> Option<ViewPayload> {
        match &self.kind {
            JobKind::Retention { retention } => {
                let evicted = ctx.store.evict_older_than(*retention);
                Some(ViewPayload::Retention { evicted, retained: ctx.store.len() })
            }
            JobKind::Popular { window, top_n } => Some(ViewPayload::Popular {
                window_secs: window.as_secs(),
                activity:    recent_sections(ctx.store.as_ref(), *window, *top_n),
            }),
            JobKind::Alert => {
                let event = ctx.alert.check(ctx.store.as_ref())?;
                ctx.stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
                Some(ViewPayload::Alert(ctx.alert.view(event)))
            }
            JobKind::Rate { window } => Some(ViewPayload::Rate {
                hits:        ctx.store.count(*window).0,
                window_secs: window.as_secs(),
            }),
        }
    }
}

/// Starts one timer thread per job.
pub fn spawn_jobs(
    jobs:     Vec<Job>,
    ctx:      &JobContext,
    sink:     Arc<dyn Sink>,
    shutdown: &ShutdownFlag,
) -> Vec<thread::JoinHandle<()>> {
    jobs.into_iter()
        .map(|job| spawn_job(job, ctx.clone(), Arc::clone(&sink), Arc::clone(shutdown)))
        .collect()
}

/// Runs `job` every `job.every` until `shutdown` is set.
///
/// Ticks are fixed-rate: the next deadline is measured from the previous one,
/// not from the end of the run. A job that falls more than a full interval
/// behind skips the missed ticks instead of bursting to catch up.
pub fn spawn_job(
    job:      Job,
    ctx:      JobContext,
    sink:     Arc<dyn Sink>,
    shutdown: ShutdownFlag,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut next = Instant::now() + job.every;

        loop {
            // Sleep in short slices so the shutdown flag is noticed promptly.
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
                let now = Instant::now();
                if now >= next {
                    break;
                }
                thread::sleep((next - now).min(POLL_INTERVAL));
            }

            if let Some(payload) = job.run(&ctx) {
                sink.publish(ViewModel { job_id: job.id, payload });
            }

            next += job.every;
            let now = Instant::now();
            if next < now {
                next = now + job.every;
            }
        }
    })
}
