//! AND-of-entries condition groups with nested OR-sets.

use chrono::{DateTime, Utc};

use crate::mail::Message;
use crate::rules::condition::{Condition, Matcher};

/// One entry of a [`ConditionGroup`].
#[derive(Debug, Clone)]
pub enum Entry<C = Condition> {
    /// Must match on its own.
    Single(C),
    /// Satisfied when any member matches.
    AnyOf(Vec<C>),
}

/// Ordered list of entries, all of which must be satisfied.
///
/// An empty group is never satisfied: an empty match list must not match
/// every message.
#[derive(Debug, Clone)]
pub struct ConditionGroup<C = Condition> {
    entries: Vec<Entry<C>>,
}

impl<C> Default for ConditionGroup<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<C> ConditionGroup<C> {
    pub fn new(entries: Vec<Entry<C>>) -> Self {
        Self { entries }
    }

    /// Group of plain conditions only.
    pub fn all_of(conditions: impl IntoIterator<Item = C>) -> Self {
        Self::new(conditions.into_iter().map(Entry::Single).collect())
    }

    pub fn push(&mut self, condition: C) {
        self.entries.push(Entry::Single(condition));
    }

    pub fn push_any(&mut self, conditions: Vec<C>) {
        self.entries.push(Entry::AnyOf(conditions));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Entry<C>] {
        &self.entries
    }

    /// Every condition in the group, OR-set members included.
    pub fn conditions(&self) -> impl Iterator<Item = &C> {
        self.entries.iter().flat_map(|entry| match entry {
            Entry::Single(c) => std::slice::from_ref(c).iter(),
            Entry::AnyOf(members) => members.iter(),
        })
    }
}

impl<C: Matcher> ConditionGroup<C> {
    /// Evaluate entries in order, stopping at the first unsatisfied one.
    pub fn is_satisfied(&self, message: &Message, now: DateTime<Utc>) -> bool {
        let required = self.entries.len();
        if required == 0 {
            return false;
        }

        let mut satisfied = 0;
        for entry in &self.entries {
            let ok = match entry {
                Entry::Single(condition) => condition.test(message, now),
                Entry::AnyOf(members) => members.iter().any(|m| m.test(message, now)),
            };
            if !ok {
                break;
            }
            satisfied += 1;
        }
        satisfied == required
    }
}

impl<C: Matcher> Matcher for ConditionGroup<C> {
    fn test(&self, message: &Message, now: DateTime<Utc>) -> bool {
        self.is_satisfied(message, now)
    }
}
