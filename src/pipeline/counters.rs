//! Run statistics for the end-of-run report.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

pub const EMAILS_SEEN: &str = "emails_seen";
pub const EMAILS_MATCHED: &str = "emails_matched";
pub const EMAILS_EXCEPTED: &str = "emails_excepted";
pub const RULES_CHECKED: &str = "rules_checked";
pub const RULE_EVALUATIONS: &str = "rule_evaluations";
pub const ACTIONS_TAKEN: &str = "actions_taken";
pub const ACTIONS_FAILED: &str = "actions_failed";
pub const FETCH_ERRORS: &str = "fetch_errors";
pub const FOLDERS_SWEPT: &str = "folders_swept";

/// Named monotonic counters and accumulated timers.
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    counters: BTreeMap<&'static str, u64>,
    timers: BTreeMap<&'static str, Duration>,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&mut self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&mut self, name: &'static str, n: u64) {
        *self.counters.entry(name).or_insert(0) += n;
    }

    /// Current value; zero for counters never touched.
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn add_time(&mut self, name: &'static str, elapsed: Duration) {
        *self.timers.entry(name).or_default() += elapsed;
    }

    pub fn time(&self, name: &str) -> Option<Duration> {
        self.timers.get(name).copied()
    }

    pub fn counters(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counters.iter().map(|(k, v)| (*k, *v))
    }

    pub fn timers(&self) -> impl Iterator<Item = (&'static str, Duration)> + '_ {
        self.timers.iter().map(|(k, v)| (*k, *v))
    }

    pub fn emails_seen(&self) -> u64 {
        self.get(EMAILS_SEEN)
    }

    pub fn emails_matched(&self) -> u64 {
        self.get(EMAILS_MATCHED)
    }

    pub fn rules_checked(&self) -> u64 {
        self.get(RULES_CHECKED)
    }

    pub fn actions_taken(&self) -> u64 {
        self.get(ACTIONS_TAKEN)
    }

    /// Human-readable report, one `name: value` line per counter and timer.
    pub fn summary(&self) -> String {
        let mut out = String::from("Run summary\n");
        for name in [EMAILS_SEEN, EMAILS_MATCHED, RULES_CHECKED, ACTIONS_TAKEN] {
            let _ = writeln!(out, "  {name}: {}", self.get(name));
        }
        for (name, value) in self.counters() {
            if ![EMAILS_SEEN, EMAILS_MATCHED, RULES_CHECKED, ACTIONS_TAKEN].contains(&name) {
                let _ = writeln!(out, "  {name}: {value}");
            }
        }
        for (name, elapsed) in self.timers() {
            let _ = writeln!(out, "  {name}: {:.2}s", elapsed.as_secs_f64());
        }
        out.truncate(out.trim_end().len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_counter_reads_zero() {
        let counters = RunCounters::new();
        assert_eq!(counters.get(EMAILS_SEEN), 0);
        assert_eq!(counters.time("sweep"), None);
    }

    #[test]
    fn counters_accumulate() {
        let mut counters = RunCounters::new();
        counters.incr(EMAILS_SEEN);
        counters.incr(EMAILS_SEEN);
        counters.add(ACTIONS_TAKEN, 3);
        assert_eq!(counters.emails_seen(), 2);
        assert_eq!(counters.actions_taken(), 3);
    }

    #[test]
    fn timers_accumulate() {
        let mut counters = RunCounters::new();
        counters.add_time("sweep", Duration::from_millis(1500));
        counters.add_time("sweep", Duration::from_millis(500));
        assert_eq!(counters.time("sweep"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn summary_lists_core_counters_first() {
        let mut counters = RunCounters::new();
        counters.incr(ACTIONS_FAILED);
        counters.add(EMAILS_SEEN, 3);
        counters.add_time("sweep", Duration::from_secs(1));
        let summary = counters.summary();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "Run summary");
        assert_eq!(lines[1], "  emails_seen: 3");
        assert_eq!(lines[2], "  emails_matched: 0");
        assert!(summary.contains("  actions_failed: 1"));
        assert!(summary.ends_with("  sweep: 1.00s"));
    }
}
