//! Most-requested sections over a trailing window.

use crate::monitor::store::WindowSource;
use crate::monitor::types::HttpHit;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Hit count for one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionCount {
    pub section: String,
    pub hits:    usize,
}

/// Result of a popular-sections query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "sections", rename_all = "snake_case")]
pub enum SectionActivity {
    /// No hit arrived during the window.
    NoActivity,
    /// Sections by descending hit count, at most `top_n` of them.
    Ranked(Vec<SectionCount>),
}

/// Groups the hits of the last `window` by section and returns the `top_n`
/// busiest.
///
/// Sections with equal counts keep the order in which they were first seen
/// in the window (oldest hit first), so the ranking is deterministic. Hits are
/// tallied in place; only one string per distinct section is allocated.
pub fn recent_sections<W: WindowSource + ?Sized>(
    source: &W,
    window: Duration,
    top_n:  usize,
) -> SectionActivity {
    let mut tally = SectionTally::default();
    source.visit_window(window, &mut |hit| tally.add(&hit.section));
    tally.rank(top_n)
}

/// Ranks `hits` given newest first, as returned by a window query.
pub fn rank_sections(hits: &[HttpHit], top_n: usize) -> SectionActivity {
    let mut tally = SectionTally::default();
    hits.iter().for_each(|hit| tally.add(&hit.section));
    tally.rank(top_n)
}

/// Running per-section counts over hits fed newest first.
#[derive(Default)]
struct SectionTally {
    /// section -> (hits, position of its oldest hit so far)
    sections: HashMap<String, (usize, usize)>,
    fed:      usize,
}

impl SectionTally {
    fn add(&mut self, section: &str) {
        let position = self.fed;
        self.fed += 1;
        match self.sections.get_mut(section) {
            Some((hits, oldest)) => {
                *hits += 1;
                *oldest = position;
            }
            None => {
                self.sections.insert(section.to_string(), (1, position));
            }
        }
    }

    fn rank(self, top_n: usize) -> SectionActivity {
        if self.fed == 0 {
            return SectionActivity::NoActivity;
        }

        let mut ranked: Vec<(String, usize, usize)> = self
            .sections
            .into_iter()
            .map(|(section, (hits, oldest))| (section, hits, oldest))
            .collect();
        // A later position in the newest-first feed means seen earlier.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));

        SectionActivity::Ranked(
            ranked
                .into_iter()
                .take(top_n)
                .map(|(section, hits, _)| SectionCount { section, hits })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::store::tests::hit_at;
    use crate::monitor::store::RecordStore;
    use chrono::{Local, TimeDelta};

    fn ranked(pairs: &[(&str, usize)]) -> SectionActivity {
        SectionActivity::Ranked(
            pairs
                .iter()
                .map(|(s, n)| SectionCount { section: s.to_string(), hits: *n })
                .collect(),
        )
    }

    #[test]
    fn counts_and_sorts_by_hits() {
        let store = RecordStore::new();
        for s in ["/a", "/a", "/b"] {
            store.append(hit_at(Local::now(), s));
        }
        assert_eq!(
            recent_sections(&store, Duration::from_secs(10), 5),
            ranked(&[("/a", 2), ("/b", 1)])
        );
    }

    #[test]
    fn empty_window_reports_no_activity() {
        let store = RecordStore::new();
        store.append(hit_at(Local::now() - TimeDelta::seconds(60), "/old"));
        assert_eq!(
            recent_sections(&store, Duration::from_secs(10), 5),
            SectionActivity::NoActivity
        );
    }

    #[test]
    fn equal_counts_keep_first_seen_order() {
        let store = RecordStore::new();
        for s in ["/z", "/m", "/a", "/m", "/a", "/z"] {
            store.append(hit_at(Local::now(), s));
        }
        assert_eq!(
            recent_sections(&store, Duration::from_secs(10), 5),
            ranked(&[("/z", 2), ("/m", 2), ("/a", 2)])
        );
    }

    #[test]
    fn truncates_to_top_n() {
        let now = Local::now();
        let mut hits = Vec::new();
        for (i, s) in ["/1", "/2", "/3", "/4", "/5", "/6", "/6", "/5"].iter().enumerate() {
            hits.push(hit_at(now + TimeDelta::milliseconds(i as i64), s));
        }
        hits.reverse();

        match rank_sections(&hits, 3) {
            SectionActivity::Ranked(top) => {
                let names: Vec<&str> = top.iter().map(|c| c.section.as_str()).collect();
                assert_eq!(names, vec!["/5", "/6", "/1"]);
            }
            other => panic!("expected ranking, got {:?}", other),
        }
    }
}
