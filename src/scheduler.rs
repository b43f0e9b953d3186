//! Named periodic deadlines for daemon mode.
//!
//! The daemon waits on the earliest deadline, runs the job named by it,
//! then the deadline moves one period past the time it fired. Missed
//! periods are not replayed.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Deadline {
    name: &'static str,
    period: Duration,
    due: Instant,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    deadlines: Vec<Deadline>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, first due `first_due_in` from now.
    pub fn add(&mut self, name: &'static str, period: Duration, first_due_in: Duration) {
        self.add_at(name, period, Instant::now() + first_due_in);
    }

    pub fn add_at(&mut self, name: &'static str, period: Duration, due: Instant) {
        self.deadlines.retain(|d| d.name != name);
        self.deadlines.push(Deadline { name, period, due });
    }

    /// Earliest deadline; ties go to the one registered first.
    pub fn next_due(&self) -> Option<(&'static str, Instant)> {
        self.deadlines
            .iter()
            .min_by_key(|d| d.due)
            .map(|d| (d.name, d.due))
    }

    /// Mark `name` as run at `now`. Unknown names are ignored.
    pub fn fire(&mut self, name: &str, now: Instant) {
        if let Some(d) = self.deadlines.iter_mut().find(|d| d.name == name) {
            d.due = now + d.period;
        }
    }

    /// Sleep until the earliest deadline, reschedule it and return its name.
    ///
    /// Returns `None` when nothing is registered.
    pub async fn wait(&mut self) -> Option<&'static str> {
        let (name, due) = self.next_due()?;
        tokio::time::sleep_until(tokio::time::Instant::from_std(due)).await;
        self.fire(name, Instant::now());
        Some(name)
    }
}
