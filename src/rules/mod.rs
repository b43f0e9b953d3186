//! Rule data model: conditions, condition groups, actions and rules.
//!
//! Everything here is built once at startup and immutable afterwards.
//! Evaluation is pure; mutation happens in [`crate::pipeline`].

pub mod action;
pub mod condition;
pub mod group;
pub mod loader;
pub mod rule;

pub use action::{Action, ActionSpec};
pub use condition::{Condition, ConditionSpec, Field, Matcher, Operator};
pub use group::{ConditionGroup, Entry};
pub use loader::{load_rules, parse_rules};
pub use rule::{Rule, RuleId, RuleOutcome};
