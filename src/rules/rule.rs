//! Rules and their evaluation outcome.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::mail::Message;
use crate::rules::action::Action;
use crate::rules::condition::Field;
use crate::rules::group::ConditionGroup;

/// Position-derived rule identifier, unique for the life of the process.
pub type RuleId = u32;

/// Result of evaluating one rule against one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    NoMatch,
    /// Matches were satisfied but so were the exceptions.
    MatchedAndExcepted,
    Matched,
}

impl RuleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::MatchedAndExcepted => "matched_and_excepted",
            Self::Matched => "matched",
        }
    }
}

/// Named unit of match conditions, exception conditions and actions.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub matches: ConditionGroup,
    pub exceptions: ConditionGroup,
    pub actions: Vec<Action>,
}

impl Rule {
    /// Create a rule; an unset or blank name becomes `Rule_<id>`.
    pub fn new(
        id: RuleId,
        name: Option<String>,
        matches: ConditionGroup,
        exceptions: ConditionGroup,
        actions: Vec<Action>,
    ) -> Self {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Rule_{id}"));
        Self {
            id,
            name,
            matches,
            exceptions,
            actions,
        }
    }

    /// A rule without matches or without actions never fires.
    pub fn is_inert(&self) -> bool {
        self.matches.is_empty() || self.actions.is_empty()
    }

    /// Decide whether this rule applies to `message`. Pure.
    pub fn evaluate(&self, message: &Message, now: DateTime<Utc>) -> RuleOutcome {
        if self.is_inert() || !self.matches.is_satisfied(message, now) {
            return RuleOutcome::NoMatch;
        }
        if !self.exceptions.is_empty() && self.exceptions.is_satisfied(message, now) {
            return RuleOutcome::MatchedAndExcepted;
        }
        RuleOutcome::Matched
    }

    /// Whether any condition needs the message body.
    pub fn references_body(&self) -> bool {
        self.matches
            .conditions()
            .chain(self.exceptions.conditions())
            .any(|c| c.field() == Some(Field::Body))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rule {}: {}", self.id, self.name)?;
        writeln!(f, "  Match: {}", format_group(&self.matches))?;
        if !self.exceptions.is_empty() {
            writeln!(f, "  Except: {}", format_group(&self.exceptions))?;
        }
        let actions: Vec<String> = self.actions.iter().map(Action::to_string).collect();
        write!(
            f,
            "  Actions: {}",
            if actions.is_empty() {
                "(none)".to_string()
            } else {
                actions.join(", ")
            }
        )
    }
}

fn format_group(group: &ConditionGroup) -> String {
    use crate::rules::group::Entry;

    if group.is_empty() {
        return "(none)".to_string();
    }
    group
        .entries()
        .iter()
        .map(|entry| match entry {
            Entry::Single(c) => c.to_string(),
            Entry::AnyOf(members) => {
                let parts: Vec<String> = members.iter().map(|c| c.to_string()).collect();
                format!("any({})", parts.join(" | "))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
