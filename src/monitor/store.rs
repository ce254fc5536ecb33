//! Time-bounded record store shared by the ingestion loop and the jobs.
//!
//! Hits arrive in capture order, so timestamps are (approximately)
//! non-decreasing from front to back. Both scans rely on that to stop early:
//! retention walks from the oldest end, windows from the newest end.

use crate::monitor::types::HttpHit;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Anything that can answer "which hits arrived in the last `span`?".
///
/// Implemented by [`RecordStore`]; the alert engine and the aggregator only
/// depend on this so they can be driven by a frozen clock in tests.
pub trait WindowSource {
    /// Returns the hits no older than `span`, newest first, and the instant
    /// used as "now" for the query.
    fn window(&self, span: Duration) -> (Vec<HttpHit>, DateTime<Local>);

    /// Calls `visit` on each hit of [`window`](Self::window), newest first,
    /// without collecting them. Returns the query's "now".
    ///
    /// `visit` may run under the source's lock, so it must not block.
    fn visit_window(&self, span: Duration, visit: &mut dyn FnMut(&HttpHit)) -> DateTime<Local> {
        let (hits, now) = self.window(span);
        hits.iter().for_each(|hit| visit(hit));
        now
    }

    /// Number of hits in the window, and the query's "now".
    fn count(&self, span: Duration) -> (usize, DateTime<Local>) {
        let mut count = 0;
        let now = self.visit_window(span, &mut |_| count += 1);
        (count, now)
    }
}

/// Thread-safe, arrival-ordered sequence of [`HttpHit`].
///
/// A single mutex guards every operation. Each call takes the lock once and
/// releases it before returning, so callers never hold it across I/O.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Mutex<VecDeque<HttpHit>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hit at the newest end.
    pub fn append(&self, hit: HttpHit) {
        self.lock().push_back(hit);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Removes every hit older than `retention`, measured from the current
    /// wall-clock time. Returns the number of hits removed.
    pub fn evict_older_than(&self, retention: Duration) -> usize {
        self.evict_older_than_at(retention, Local::now())
    }

    /// [`evict_older_than`](Self::evict_older_than) against an explicit `now`.
    ///
    /// Hits whose age equals `retention` are kept.
    pub fn evict_older_than_at(&self, retention: Duration, now: DateTime<Local>) -> usize {
        let mut records = self.lock();
        let mut evicted = 0;
        while let Some(oldest) = records.front() {
            if age(oldest, now) > retention {
                records.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    /// [`WindowSource::window`] against an explicit `now`.
    ///
    /// Hits whose age equals `span` are included.
    pub fn window_at(&self, span: Duration, now: DateTime<Local>) -> Vec<HttpHit> {
        let mut hits = Vec::new();
        self.visit_window_at(span, now, &mut |hit| hits.push(hit.clone()));
        hits
    }

    /// [`WindowSource::visit_window`] against an explicit `now`. The lock is
    /// held for the whole walk and nothing is cloned.
    pub fn visit_window_at(&self, span: Duration, now: DateTime<Local>, visit: &mut dyn FnMut(&HttpHit)) {
        let records = self.lock();
        records
            .iter()
            .rev()
            .take_while(|hit| age(hit, now) <= span)
            .for_each(|hit| visit(hit));
    }

    // A poisoned lock means a thread panicked mid-operation on the store; there
    // is no consistent state to recover.
    fn lock(&self) -> MutexGuard<'_, VecDeque<HttpHit>> {
        self.records
            .lock()
            .expect("record store lock poisoned: a thread panicked while holding it")
    }
}

impl WindowSource for RecordStore {
    fn window(&self, span: Duration) -> (Vec<HttpHit>, DateTime<Local>) {
        let now = Local::now();
        (self.window_at(span, now), now)
    }

    fn visit_window(&self, span: Duration, visit: &mut dyn FnMut(&HttpHit)) -> DateTime<Local> {
        let now = Local::now();
        self.visit_window_at(span, now, visit);
        now
    }
}

/// Age of `hit` at `now`. Hits stamped in the future count as brand new.
fn age(hit: &HttpHit, now: DateTime<Local>) -> Duration {
    now.signed_duration_since(hit.timestamp)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
