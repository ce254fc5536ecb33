//! High-traffic alert with hysteresis.
//!
//! The engine has two states, clear and engaged, and only reports crossings:
//! the first check at or above the threshold raises an alert, the first check
//! below it afterwards recovers it, and every check in between is silent.
//!
//! The engine does not watch the store on its own. It sees traffic only when
//! [`AlertEngine::check`] is called, so the caller has to check often enough
//! (the scheduler does it every second) for the alert period in use.

use crate::monitor::config::ALERT_HISTORY_CAPACITY;
use crate::monitor::store::WindowSource;
use crate::monitor::types::{ThresholdConfig, ThresholdMode};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

const MESSAGE_TIME_FORMAT: &str = "%d %b %H:%M:%S";

/// One alert transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    pub message: String,
    pub at:      DateTime<Local>,
    /// `true` for a raised alert, `false` for a recovery.
    pub engaged: bool,
}

/// Engine state: the current alert flag and the bounded event log.
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    pub engaged: bool,
    history:     VecDeque<AlertEvent>,
}

impl AlertState {
    /// Events from oldest to newest.
    #[cfg(test)]
    pub fn history(&self) -> impl Iterator<Item = &AlertEvent> {
        self.history.iter()
    }

    fn record(&mut self, event: AlertEvent) {
        self.history.push_back(event);
        while self.history.len() > ALERT_HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }
}

/// Snapshot handed to the dashboard after a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertView {
    pub engaged: bool,
    pub latest:  AlertEvent,
    /// Newest first, as the dashboard lists them.
    pub history: Vec<AlertEvent>,
}

/// Owns the threshold and the alert state for one monitor.
#[derive(Debug)]
pub struct AlertEngine {
    threshold: ThresholdConfig,
    state:     Mutex<AlertState>,
}

impl AlertEngine {
    pub fn new(threshold: ThresholdConfig) -> Self {
        Self { threshold, state: Mutex::new(AlertState::default()) }
    }

    /// Counts the alert-period window of `source` and applies it.
    ///
    /// The count is taken before the engine's own lock is, so the store lock
    /// and the state lock are never held together.
    pub fn check<W: WindowSource + ?Sized>(&self, source: &W) -> Option<AlertEvent> {
        let (count, now) = source.count(self.threshold.period);
        self.evaluate(count, now)
    }

    /// Applies one observation of `count` hits in the period ending at `now`.
    ///
    /// Returns the event for a transition, `None` when the state is unchanged.
    pub fn evaluate(&self, count: usize, now: DateTime<Local>) -> Option<AlertEvent> {
        let is_alert = self.metric(count) >= self.threshold.value;
        let mut state = self.lock();

        let event = match (is_alert, state.engaged) {
            (true, false) => AlertEvent {
                message: format!(
                    "High traffic alert: {} hits, triggered at {}",
                    count,
                    now.format(MESSAGE_TIME_FORMAT)
                ),
                at: now,
                engaged: true,
            },
            (false, true) => AlertEvent {
                message: format!(
                    "High traffic alert recovered at {}",
                    now.format(MESSAGE_TIME_FORMAT)
                ),
                at: now,
                engaged: false,
            },
            _ => return None,
        };

        state.engaged = event.engaged;
        state.record(event.clone());
        Some(event)
    }

    /// `count` expressed in the unit of the threshold.
    pub fn metric(&self, count: usize) -> f64 {
        match self.threshold.mode {
            ThresholdMode::PerSecond => count as f64 / self.threshold.period.as_secs_f64(),
            ThresholdMode::Total     => count as f64,
        }
    }

    #[cfg(test)]
    pub fn is_engaged(&self) -> bool {
        self.lock().engaged
    }

    #[cfg(test)]
    pub fn state(&self) -> AlertState {
        self.lock().clone()
    }

    /// Current flag plus `latest` and the history, newest first.
    pub fn view(&self, latest: AlertEvent) -> AlertView {
        let state = self.lock();
        AlertView {
            engaged: state.engaged,
            latest,
            history: state.history.iter().rev().cloned().collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AlertState> {
        self.state
            .lock()
            .expect("alert state lock poisoned: a thread panicked while holding it")
    }
}
