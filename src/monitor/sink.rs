//! Output side of the scheduler: the view envelope and where it goes.

use crate::monitor::alert::AlertView;
use crate::monitor::popular::SectionActivity;
use crossbeam_channel::Sender;
use serde::Serialize;

/// Stable job identifiers. The dashboard routes views by these.
pub mod job_id {
    pub const RETENTION:    &str = "retention";
    pub const POPULAR:      &str = "popular";
    pub const POPULAR_LONG: &str = "popular_long";
    pub const ALERT:        &str = "alert";
    pub const RATE:         &str = "rate";
}

/// What a job computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewPayload {
    Retention { evicted: usize, retained: usize },
    Popular { window_secs: u64, activity: SectionActivity },
    Alert(AlertView),
    Rate { hits: usize, window_secs: u64 },
}

/// One unit on the output queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub job_id:  &'static str,
    pub payload: ViewPayload,
}

/// Receives computed views. The scheduler holds one and never looks back.
pub trait Sink: Send + Sync {
    fn publish(&self, view: ViewModel);
}

impl Sink for Sender<ViewModel> {
    fn publish(&self, view: ViewModel) {
        // A disconnected receiver means the dashboard is gone; nothing to do.
        let _ = self.send(view);
    }
}
