//! Console dashboard: drains the view queue and logs each update.
//!
//! This stands in for a terminal UI. It routes on the job id only and keeps no
//! state besides the last rate shown, so a richer renderer can replace it
//! without touching the jobs.

use crate::logger::{Event, SharedLogger};
use crate::monitor::config::POLL_INTERVAL;
use crate::monitor::popular::SectionActivity;
use crate::monitor::sink::{ViewModel, ViewPayload};
use crate::monitor::types::ShutdownFlag;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::Ordering;

/// Renders views until shutdown or until every producer is gone.
pub fn render_views(views: &Receiver<ViewModel>, logger: &SharedLogger, shutdown: &ShutdownFlag) {
    let mut last_rate: Option<usize> = None;

    while !shutdown.load(Ordering::Relaxed) {
        match views.recv_timeout(POLL_INTERVAL) {
            Ok(view) => render(&view, logger, &mut last_rate),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn render(view: &ViewModel, logger: &SharedLogger, last_rate: &mut Option<usize>) {
    match &view.payload {
        ViewPayload::Popular { window_secs, activity } => {
            let sections = match activity {
                SectionActivity::NoActivity => &[][..],
                SectionActivity::Ranked(top) => top.as_slice(),
            };
            logger.log(&Event::PopularSections {
                job:         view.job_id,
                window_secs: *window_secs,
                sections,
            });
        }
        ViewPayload::Alert(alert) => logger.log(&Event::alert(&alert.latest)),
        ViewPayload::Rate { hits, window_secs } => {
            if *last_rate != Some(*hits) {
                *last_rate = Some(*hits);
                logger.log(&Event::RequestRate { hits: *hits, window_secs: *window_secs });
            }
        }
        ViewPayload::Retention { evicted, retained } => {
            logger.log(&Event::Retention { evicted: *evicted, retained: *retained });
        }
    }
}
