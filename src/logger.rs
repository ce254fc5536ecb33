//! Structured logging for trafficwatch.
//!
//! Provides a [`Logger`] that writes events to stdout and optionally to a log
//! file. Output can be formatted as human-readable plain text or as
//! newline-delimited JSON (NDJSON), so the dashboard stream can be piped into
//! log shippers as easily as it can be read in a terminal.

use crate::monitor::alert::AlertEvent;
use crate::monitor::popular::SectionCount;
use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

// ── Event types ──────────────────────────────────────────────────────────────

/// All distinct event kinds that trafficwatch can emit.
///
/// The `#[serde(tag = "event")]` attribute ensures JSON output includes an
/// `"event"` key so consumers can filter by type without inspecting structure.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// Capture is up; `ip` is the destination filter, if any.
    Listening { port: u16, ip: Option<&'a str>, backend: &'a str },

    /// A frame was captured but could not be turned into a hit.
    /// Only written in verbose mode.
    FrameDropped { reason: &'a str },

    /// The hit queue was full and old hits were discarded.
    QueueOverflow { dropped: u64 },

    /// The high-traffic alert was raised or recovered.
    Alert { engaged: bool, message: &'a str },

    /// Most requested sections over a trailing window. An empty list means
    /// no activity.
    PopularSections {
        job:         &'a str,
        window_secs: u64,
        sections:    &'a [SectionCount],
    },

    /// Hits counted in the last `window_secs`.
    RequestRate { hits: usize, window_secs: u64 },

    /// A retention sweep ran. Only written in verbose mode.
    Retention { evicted: usize, retained: usize },

    /// Session summary emitted on graceful shutdown.
    SessionSummary {
        duration_secs:   u64,
        frames_seen:     u64,
        hits_captured:   u64,
        frames_dropped:  u64,
        hits_overflowed: u64,
        alerts_emitted:  u64,
    },
}

impl<'a> Event<'a> {
    pub fn alert(event: &'a AlertEvent) -> Self {
        Event::Alert { engaged: event.engaged, message: &event.message }
    }

    /// Events that are noise unless the user asked for detail.
    fn is_verbose(&self) -> bool {
        matches!(self, Event::FrameDropped { .. } | Event::Retention { .. })
    }
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Shared, thread-safe structured logger.
///
/// Constructed once in `main` and passed as an `Arc<Logger>` to every thread
/// that needs to emit events. The internal `Mutex` serialises file writes so
/// that output lines are never interleaved across threads.
pub struct Logger {
    /// Whether to format events as NDJSON instead of plain text.
    json:    bool,
    /// Whether verbose-only events are written.
    verbose: bool,
    /// Optional buffered file writer. `None` when `--log-file` was not given.
    file:    Option<Mutex<BufWriter<std::fs::File>>>,
}

/// Type alias used throughout the codebase for convenience.
pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Creates a new logger.
    ///
    /// # Arguments
    /// * `json`     - Emit NDJSON instead of plain text when `true`.
    /// * `verbose`  - Also write dropped-frame and retention events.
    /// * `log_path` - If `Some`, open (or create) this file for appended writes.
    ///
    /// # Errors
    /// Returns an `io::Error` if the log file cannot be opened or created.
    pub fn new(json: bool, verbose: bool, log_path: Option<&str>) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => {
                let f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };

        Ok(Self { json, verbose, file })
    }

    /// Logs a single [`Event`], writing to stdout and optionally to the log file.
    pub fn log(&self, event: &Event) {
        if event.is_verbose() && !self.verbose {
            return;
        }

        let line = self.render(event);
        println!("{}", line);

        if let Some(mutex) = &self.file {
            if let Ok(mut writer) = mutex.lock() {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
    }

    /// Formats one event as it will be written, timestamp included.
    ///
    /// NDJSON output is a single JSON object per line with a `"timestamp"` field
    /// injected alongside the event fields.
    fn render(&self, event: &Event) -> String {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        if self.json {
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert("timestamp".to_string(), serde_json::Value::String(timestamp));
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, plain_text(event))
        }
    }
}

/// Formats an [`Event`] as a human-readable plain-text string (no timestamp).
fn plain_text(event: &Event) -> String {
    match event {
        Event::Info { message } =>
            format!("[INFO] {}", message),

        Event::Listening { port, ip: Some(ip), backend } =>
            format!("[LISTEN] {}:{} via {}", ip, port, backend),

        Event::Listening { port, ip: None, backend } =>
            format!("[LISTEN] port {} via {}", port, backend),

        Event::FrameDropped { reason } =>
            format!("[DROP] {}", reason),

        Event::QueueOverflow { dropped } =>
            format!("[OVERFLOW] hit queue full, {} hits discarded so far", dropped),

        Event::Alert { message, .. } =>
            format!("[ALERT] {}", message),

        Event::PopularSections { job, window_secs, sections } if sections.is_empty() =>
            format!("[{}] no activity in the last {}s", job.to_uppercase(), window_secs),

        Event::PopularSections { job, window_secs, sections } => {
            let ranked: Vec<String> = sections
                .iter()
                .map(|c| format!("{}: {} {}", c.section, c.hits, if c.hits == 1 { "hit" } else { "hits" }))
                .collect();
            format!("[{}] last {}s | {}", job.to_uppercase(), window_secs, ranked.join(" | "))
        }

        Event::RequestRate { hits, window_secs: 1 } =>
            format!("[RATE] {} requests/sec", hits),

        Event::RequestRate { hits, window_secs } =>
            format!("[RATE] {} requests in {}s", hits, window_secs),

        Event::Retention { evicted, retained } =>
            format!("[RETENTION] evicted {} retained {}", evicted, retained),

        Event::SessionSummary {
            duration_secs, frames_seen, hits_captured, frames_dropped, hits_overflowed, alerts_emitted
        } => format!(
            "[SUMMARY] duration={}s frames={} hits={} dropped={} overflowed={} alerts={}",
            duration_secs, frames_seen, hits_captured, frames_dropped, hits_overflowed, alerts_emitted
        ),
    }
}
