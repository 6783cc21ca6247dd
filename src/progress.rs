// src/progress.rs

//! Per-run progress counters.
//!
//! One `ProgressCounters` belongs to exactly one running query and is only
//! ever written from that run's own event-parsing callback, so no locking is
//! involved.

/// Maximum length of a `last_action` summary.
pub const LAST_ACTION_MAX: usize = 96;

/// Mutable progress state for a single running query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressCounters {
    /// Completed search actions.
    pub searches: u64,
    /// Completed page-open actions.
    pub pages_opened: u64,
    /// Short human-readable description of the most recent action.
    pub last_action: String,
}

impl ProgressCounters {
    pub fn record_search(&mut self, query: &str) {
        self.searches += 1;
        self.last_action = truncate_action(&format!("search: {query}"));
    }

    pub fn record_page_open(&mut self, url: &str) {
        self.pages_opened += 1;
        self.last_action = truncate_action(&format!("open: {url}"));
    }

    pub fn set_last_action(&mut self, action: &str) {
        self.last_action = truncate_action(action);
    }
}

/// Truncate an action summary to [`LAST_ACTION_MAX`] characters.
pub fn truncate_action(s: &str) -> String {
    if s.chars().count() <= LAST_ACTION_MAX {
        return s.to_string();
    }
    let mut out: String = s.chars().take(LAST_ACTION_MAX - 1).collect();
    out.push('…');
    out
}
