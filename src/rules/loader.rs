//! Rules file loading.
//!
//! ```json
//! {
//!   "settings": { "folders": ["INBOX"], "exclude_folders": ["Trash"] },
//!   "rules": [
//!     {
//!       "name": "bounces",
//!       "matches": [
//!         { "field": "subject", "operator": "contains", "value": "Undeliverable:" },
//!         { "any": [
//!             { "field": "from", "operator": "contains", "value": "mailer-daemon" },
//!             { "field": "from", "operator": "contains", "value": "postmaster" }
//!         ] }
//!       ],
//!       "exceptions": [ { "field": "imap_flag", "operator": "present", "value": "Flagged" } ],
//!       "actions": [ { "action": "move_to_folder", "folder": "Trash" } ]
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::ConfigError;
use crate::rules::action::{Action, ActionSpec};
use crate::rules::condition::{Condition, ConditionSpec};
use crate::rules::group::{ConditionGroup, Entry};
use crate::rules::rule::{Rule, RuleId};

/// Top-level shape of the rules file.
#[derive(Debug, Default, Deserialize)]
pub struct RulesFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub matches: Vec<EntrySpec>,
    #[serde(default, alias = "match_exceptions")]
    pub exceptions: Vec<EntrySpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// A group entry: an OR-set (`{"any": [...]}`) or a single condition.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EntrySpec {
    AnyOf { any: Vec<ConditionSpec> },
    Single(ConditionSpec),
}

/// Read and build the rules file at `path`.
pub fn load_rules(path: &Path) -> Result<(Settings, Vec<Rule>), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let (settings, rules) = parse_rules(&content).map_err(|e| match e {
        ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })?;
    info!(path = %path.display(), rules = rules.len(), "Rules loaded");
    Ok((settings, rules))
}

/// Parse rules file content.
pub fn parse_rules(content: &str) -> Result<(Settings, Vec<Rule>), ConfigError> {
    let file: RulesFile = serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
        path: "<inline>".to_string(),
        reason: e.to_string(),
    })?;
    Ok((file.settings, build_rules(file.rules)))
}

/// Turn specs into rules, numbering them from 1 in declaration order.
pub fn build_rules(specs: Vec<RuleSpec>) -> Vec<Rule> {
    specs
        .into_iter()
        .zip(1..)
        .map(|(spec, id)| build_rule(id, spec))
        .collect()
}

fn build_rule(id: RuleId, spec: RuleSpec) -> Rule {
    let rule = Rule::new(
        id,
        spec.name,
        build_group(&spec.matches),
        build_group(&spec.exceptions),
        spec.actions.iter().filter_map(Action::from_spec).collect(),
    );

    if rule.matches.is_empty() {
        warn!(rule = %rule.name, "Rule has no match conditions and will be skipped");
    } else if rule.actions.is_empty() {
        warn!(rule = %rule.name, "Rule has no actions and will be skipped");
    }
    rule
}

fn build_group(entries: &[EntrySpec]) -> ConditionGroup {
    ConditionGroup::new(
        entries
            .iter()
            .map(|entry| match entry {
                EntrySpec::Single(spec) => Entry::Single(Condition::from_spec(spec)),
                EntrySpec::AnyOf { any } => {
                    Entry::AnyOf(any.iter().map(Condition::from_spec).collect())
                }
            })
            .collect(),
    )
}
