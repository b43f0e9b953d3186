//! Single-attribute predicates over a message.
//!
//! A [`Condition`] is built once from a [`ConditionSpec`] and never fails
//! afterwards: anything it cannot make sense of at build time (unknown field,
//! operator not valid for the field, missing or malformed value, bad regex)
//! turns it into a sentinel that never matches.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;

use crate::mail::Message;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*([smhdw]?)\s*$").expect("valid regex"));

/// Anything that can be tested against a message.
pub trait Matcher {
    fn test(&self, message: &Message, now: DateTime<Utc>) -> bool;
}

/// Message attribute a condition looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    To,
    From,
    Cc,
    Subject,
    Body,
    Date,
    Size,
    Folder,
    Flag,
    ReadState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Date,
    Size,
    Flag,
    ReadState,
}

impl Field {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "to" => Some(Self::To),
            "from" => Some(Self::From),
            "cc" => Some(Self::Cc),
            "subject" => Some(Self::Subject),
            "body" => Some(Self::Body),
            "date" => Some(Self::Date),
            "size" => Some(Self::Size),
            "folder" => Some(Self::Folder),
            "flag" | "imap_flag" => Some(Self::Flag),
            "read_state" => Some(Self::ReadState),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::To => "to",
            Self::From => "from",
            Self::Cc => "cc",
            Self::Subject => "subject",
            Self::Body => "body",
            Self::Date => "date",
            Self::Size => "size",
            Self::Folder => "folder",
            Self::Flag => "imap_flag",
            Self::ReadState => "read_state",
        }
    }

    fn kind(self) -> FieldKind {
        match self {
            Self::To | Self::From | Self::Cc | Self::Subject | Self::Body | Self::Folder => {
                FieldKind::Text
            }
            Self::Date => FieldKind::Date,
            Self::Size => FieldKind::Size,
            Self::Flag => FieldKind::Flag,
            Self::ReadState => FieldKind::ReadState,
        }
    }
}

/// Comparison applied to the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    StartsWith,
    Contains,
    EndsWith,
    Is,
    Regex,
    OlderThan,
    NewerThan,
    GreaterThan,
    LessThan,
    Present,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "starts_with" => Some(Self::StartsWith),
            "contains" => Some(Self::Contains),
            "ends_with" => Some(Self::EndsWith),
            "is" => Some(Self::Is),
            "regex" => Some(Self::Regex),
            "older_than" => Some(Self::OlderThan),
            "newer_than" => Some(Self::NewerThan),
            "greater_than" => Some(Self::GreaterThan),
            "less_than" => Some(Self::LessThan),
            "present" => Some(Self::Present),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartsWith => "starts_with",
            Self::Contains => "contains",
            Self::EndsWith => "ends_with",
            Self::Is => "is",
            Self::Regex => "regex",
            Self::OlderThan => "older_than",
            Self::NewerThan => "newer_than",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Present => "present",
        }
    }

    fn valid_for(self, kind: FieldKind) -> bool {
        match kind {
            FieldKind::Text => matches!(
                self,
                Self::StartsWith | Self::Contains | Self::EndsWith | Self::Is | Self::Regex
            ),
            FieldKind::Date => matches!(self, Self::OlderThan | Self::NewerThan),
            FieldKind::Size => matches!(self, Self::GreaterThan | Self::LessThan),
            FieldKind::Flag => self == Self::Present,
            FieldKind::ReadState => self == Self::Is,
        }
    }
}

/// A condition as written in the rules file.
///
/// Every key is optional so a malformed entry still deserializes and ends up
/// as a never-matching condition instead of failing the whole file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConditionSpec {
    pub field: String,
    pub operator: String,
    pub value: Option<Value>,
    pub case_sensitive: bool,
    /// Folder conditions only: compare the full path instead of the last segment.
    pub include_subfolders: bool,
}

impl ConditionSpec {
    pub fn new(field: &str, operator: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.to_string(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn include_subfolders(mut self, yes: bool) -> Self {
        self.include_subfolders = yes;
        self
    }
}

/// Reference instant for date comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateReference {
    /// Fixed instant, resolved at load time.
    Absolute(DateTime<Utc>),
    /// This long before "now", resolved at test time.
    Ago(TimeDelta),
}

impl DateReference {
    fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Absolute(at) => at,
            Self::Ago(delta) => now.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

#[derive(Debug, Clone)]
enum Predicate {
    Text {
        field: Field,
        regex: Regex,
        include_subfolders: bool,
    },
    Date {
        operator: Operator,
        reference: DateReference,
    },
    Size {
        operator: Operator,
        threshold: u64,
    },
    Flag(String),
    ReadState(bool),
    /// Sentinel for a condition that could not be built.
    Never { reason: String },
}

/// A single predicate over one message attribute.
#[derive(Debug, Clone)]
pub struct Condition {
    field: Option<Field>,
    operator: Option<Operator>,
    value: String,
    predicate: Predicate,
}

impl Condition {
    /// Build from configuration. Never fails; see the module docs.
    pub fn from_spec(spec: &ConditionSpec) -> Self {
        let field = Field::parse(&spec.field);
        let operator = Operator::parse(&spec.operator);
        let value = spec.value.as_ref().map(value_to_string).unwrap_or_default();

        let predicate = match (field, operator) {
            (None, _) => Predicate::Never {
                reason: format!("unknown field '{}'", spec.field),
            },
            (_, None) => Predicate::Never {
                reason: format!("unknown operator '{}'", spec.operator),
            },
            (Some(f), Some(op)) if !op.valid_for(f.kind()) => Predicate::Never {
                reason: format!("operator '{}' not valid for field '{}'", op.as_str(), f.as_str()),
            },
            (Some(f), Some(op)) => match spec.value.as_ref() {
                None | Some(Value::Null) => Predicate::Never {
                    reason: "missing value".to_string(),
                },
                Some(v) => build_predicate(f, op, v, spec).unwrap_or_else(|reason| {
                    Predicate::Never { reason }
                }),
            },
        };

        if let Predicate::Never { reason } = &predicate {
            tracing::warn!(
                field = %spec.field,
                operator = %spec.operator,
                reason = %reason,
                "Condition can never match"
            );
        }

        Self {
            field,
            operator,
            value,
            predicate,
        }
    }

    pub fn field(&self) -> Option<Field> {
        self.field
    }

    pub fn operator(&self) -> Option<Operator> {
        self.operator
    }

    /// True when this condition was degraded to a never-matching sentinel.
    pub fn is_sentinel(&self) -> bool {
        matches!(self.predicate, Predicate::Never { .. })
    }
}

impl Matcher for Condition {
    fn test(&self, message: &Message, now: DateTime<Utc>) -> bool {
        match &self.predicate {
            Predicate::Text {
                field,
                regex,
                include_subfolders,
            } => text_of(*field, message, *include_subfolders)
                .is_some_and(|text| regex.is_match(&text)),
            Predicate::Date {
                operator,
                reference,
            } => {
                let Some(date) = message.date else {
                    return false;
                };
                let reference = reference.resolve(now);
                match operator {
                    Operator::OlderThan => date < reference,
                    Operator::NewerThan => reference < date,
                    _ => false,
                }
            }
            Predicate::Size {
                operator,
                threshold,
            } => match (operator, message.size) {
                (Operator::GreaterThan, Some(size)) => size >= *threshold,
                (Operator::LessThan, Some(size)) => size < *threshold,
                _ => false,
            },
            Predicate::Flag(flag) => message.flags.contains(flag),
            Predicate::ReadState(read) => message.is_read() == *read,
            Predicate::Never { .. } => false,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.predicate {
            Predicate::Never { reason } => write!(f, "never ({reason})"),
            _ => write!(
                f,
                "{} {} '{}'",
                self.field.map_or("?", |x| x.as_str()),
                self.operator.map_or("?", |x| x.as_str()),
                self.value
            ),
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_predicate(
    field: Field,
    operator: Operator,
    value: &Value,
    spec: &ConditionSpec,
) -> Result<Predicate, String> {
    match field.kind() {
        FieldKind::Text => {
            let Value::String(text) = value else {
                return Err("text value must be a string".to_string());
            };
            let regex = text_regex(operator, text, spec.case_sensitive)?;
            Ok(Predicate::Text {
                field,
                regex,
                include_subfolders: spec.include_subfolders,
            })
        }
        FieldKind::Date => Ok(Predicate::Date {
            operator,
            reference: parse_date_value(value)?,
        }),
        FieldKind::Size => {
            let threshold = match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .ok_or_else(|| format!("size '{}' is not a byte count", value_to_string(value)))?;
            Ok(Predicate::Size {
                operator,
                threshold,
            })
        }
        FieldKind::Flag => {
            let Value::String(name) = value else {
                return Err("flag name must be a string".to_string());
            };
            let bare = name.trim().trim_start_matches('\\');
            if bare.is_empty() {
                return Err("empty flag name".to_string());
            }
            Ok(Predicate::Flag(format!("\\{bare}")))
        }
        FieldKind::ReadState => {
            let read = match value {
                Value::Bool(b) => Some(*b),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "read" => Some(true),
                    "false" | "unread" => Some(false),
                    _ => None,
                },
                _ => None,
            }
            .ok_or_else(|| format!("read state '{}' is not a boolean", value_to_string(value)))?;
            Ok(Predicate::ReadState(read))
        }
    }
}

/// Compile the start-anchored pattern for a text operator.
///
/// Matching starts at position 0 and need not reach the end of the text,
/// except for `is`, which is anchored at both ends. `ends_with` therefore
/// also matches when more text follows the value.
fn text_regex(operator: Operator, value: &str, case_sensitive: bool) -> Result<Regex, String> {
    let literal = regex::escape(value);
    let pattern = match operator {
        Operator::StartsWith => format!("^(?:{literal})"),
        Operator::Contains | Operator::EndsWith => format!("^.*(?:{literal})"),
        Operator::Is => format!(r"^(?:{literal})\z"),
        Operator::Regex => {
            // The pattern must stand alone, or it could escape the anchor group.
            Regex::new(value).map_err(|e| format!("invalid pattern '{value}': {e}"))?;
            format!("^(?:{value})")
        }
        _ => return Err(format!("'{}' is not a text operator", operator.as_str())),
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(!case_sensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| format!("invalid pattern '{value}': {e}"))
}

/// Text for a field, or `None` when the message lacks it.
fn text_of(field: Field, message: &Message, include_subfolders: bool) -> Option<Cow<'_, str>> {
    match field {
        Field::To => joined(&message.to),
        Field::From => joined(&message.from),
        Field::Cc => joined(&message.cc),
        Field::Subject => message.subject.as_deref().map(Cow::Borrowed),
        Field::Body => message.body.as_deref().map(Cow::Borrowed),
        Field::Folder if include_subfolders => Some(Cow::Borrowed(message.folder.as_str())),
        Field::Folder => message.folder.rsplit('/').next().map(Cow::Borrowed),
        Field::Date | Field::Size | Field::Flag | Field::ReadState => None,
    }
}

fn joined(list: &[String]) -> Option<Cow<'static, str>> {
    if list.is_empty() {
        None
    } else {
        Some(Cow::Owned(list.join(", ")))
    }
}

/// Parse a date condition value: a duration before now, or an absolute instant.
fn parse_date_value(value: &Value) -> Result<DateReference, String> {
    let raw = match value {
        Value::Number(n) => {
            let days = n
                .as_i64()
                .filter(|days| *days >= 0)
                .ok_or_else(|| format!("'{n}' is not a day count"))?;
            return TimeDelta::try_days(days)
                .map(DateReference::Ago)
                .ok_or_else(|| format!("{days} days is out of range"));
        }
        Value::String(s) => s.trim(),
        other => return Err(format!("'{other}' is not a date")),
    };

    if let Some(caps) = DURATION_RE.captures(raw) {
        let amount: i64 = caps[1]
            .parse()
            .map_err(|_| format!("'{raw}' is out of range"))?;
        let delta = match &caps[2] {
            "s" => TimeDelta::try_seconds(amount),
            "m" => TimeDelta::try_minutes(amount),
            "h" => TimeDelta::try_hours(amount),
            "w" => TimeDelta::try_weeks(amount),
            _ => TimeDelta::try_days(amount),
        };
        return delta
            .map(DateReference::Ago)
            .ok_or_else(|| format!("'{raw}' is out of range"));
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(DateReference::Absolute(at.with_timezone(&Utc)));
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        && let Some(midnight) = day.and_hms_opt(0, 0, 0)
    {
        return Ok(DateReference::Absolute(midnight.and_utc()));
    }
    if let Ok(at) = DateTime::parse_from_rfc2822(raw) {
        return Ok(DateReference::Absolute(at.with_timezone(&Utc)));
    }
    Err(format!("'{raw}' is neither a duration nor a date"))
}
