//! Actions performed on a message when a rule matches.

use std::fmt;

use serde::Deserialize;

/// Operation attached to a rule, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MoveToFolder {
        dest_folder: String,
        /// Overrides the global mark-as-read-on-move setting when set.
        mark_as_read: Option<bool>,
    },
    Delete {
        permanently: bool,
    },
    MarkAsRead,
    MarkAsUnread,
    Forward {
        to: Vec<String>,
    },
}

impl Action {
    pub fn move_to(dest_folder: impl Into<String>) -> Self {
        Self::MoveToFolder {
            dest_folder: dest_folder.into(),
            mark_as_read: None,
        }
    }

    /// Destructive actions take the message out of the current folder.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::MoveToFolder { .. } | Self::Delete { .. })
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MoveToFolder { .. } => "move_to_folder",
            Self::Delete { .. } => "delete",
            Self::MarkAsRead => "mark_as_read",
            Self::MarkAsUnread => "mark_as_unread",
            Self::Forward { .. } => "forward",
        }
    }

    /// Build from configuration. Returns `None` (after logging) for entries
    /// that cannot be turned into an action.
    pub fn from_spec(spec: &ActionSpec) -> Option<Self> {
        let action = match spec.action.trim().to_lowercase().replace('-', "_").as_str() {
            "move" | "move_to_folder" => match spec.folder.as_deref().map(str::trim) {
                Some(folder) if !folder.is_empty() => Some(Self::MoveToFolder {
                    dest_folder: folder.to_string(),
                    mark_as_read: spec.mark_as_read,
                }),
                _ => None,
            },
            "delete" => Some(Self::Delete {
                permanently: spec.permanently,
            }),
            "mark_as_read" => Some(Self::MarkAsRead),
            "mark_as_unread" => Some(Self::MarkAsUnread),
            "forward" => {
                let to: Vec<String> = spec
                    .to
                    .iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                (!to.is_empty()).then_some(Self::Forward { to })
            }
            _ => None,
        };

        if action.is_none() {
            tracing::warn!(action = %spec.action, "Skipping malformed action");
        }
        action
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MoveToFolder { dest_folder, .. } => write!(f, "move_to_folder({dest_folder})"),
            Self::Delete { permanently: true } => write!(f, "delete(permanently)"),
            Self::Delete { permanently: false } => write!(f, "delete"),
            Self::Forward { to } => write!(f, "forward({})", to.join(", ")),
            other => f.write_str(other.label()),
        }
    }
}

/// An action as written in the rules file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActionSpec {
    pub action: String,
    #[serde(alias = "dest_folder")]
    pub folder: Option<String>,
    pub mark_as_read: Option<bool>,
    pub permanently: bool,
    #[serde(alias = "recipients")]
    pub to: Vec<String>,
}
