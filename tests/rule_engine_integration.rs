//! End-to-end rule engine tests against an in-memory mailbox.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::Mutex;
use std::sync::atomic::Ordering;

use chrono::{TimeZone, Utc};

use mailsweep::error::{MailboxError, MailerError};
use mailsweep::mail::{Attachment, Mailbox, Mailer, Message, MessageId, SEEN_FLAG};
use mailsweep::pipeline::counters::{ACTIONS_FAILED, EMAILS_EXCEPTED, FOLDERS_SWEPT};
use mailsweep::pipeline::{
    Clock, EngineSettings, FixedClock, RuleEngine, SweepScope, SweepStatus, folders_to_sweep,
    sweep_folders,
};
use mailsweep::rules::{
    Action, Condition, ConditionGroup, ConditionSpec, Rule, load_rules, parse_rules,
};

// ── Test doubles ────────────────────────────────────────────────────────

/// In-memory mailbox: folders of messages, moves really move.
#[derive(Debug, Default)]
struct VirtualMailbox {
    folders: BTreeMap<String, Vec<Message>>,
    selected: String,
    trash: String,
    expunged: Vec<MessageId>,
    /// Folders that reject moves into them.
    broken_destinations: Vec<String>,
}

impl VirtualMailbox {
    fn new() -> Self {
        Self {
            trash: "Trash".into(),
            ..Default::default()
        }
    }

    fn with_folder(mut self, name: &str, messages: Vec<Message>) -> Self {
        self.folders.insert(name.to_string(), messages);
        self
    }

    fn folder(&self, name: &str) -> &[Message] {
        self.folders.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    fn ids_in(&self, name: &str) -> Vec<MessageId> {
        self.folder(name).iter().map(|m| m.id).collect()
    }

    fn take(&mut self, id: MessageId) -> Result<Message, MailboxError> {
        let folder = self
            .folders
            .get_mut(&self.selected)
            .ok_or(MailboxError::NoFolderSelected)?;
        let pos = folder
            .iter()
            .position(|m| m.id == id)
            .ok_or(MailboxError::MessageNotFound(id))?;
        Ok(folder.remove(pos))
    }

    fn find_mut(&mut self, id: MessageId) -> Result<&mut Message, MailboxError> {
        self.folders
            .get_mut(&self.selected)
            .ok_or(MailboxError::NoFolderSelected)?
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(MailboxError::MessageNotFound(id))
    }

    fn move_into(&mut self, id: MessageId, dest: &str) -> Result<(), MailboxError> {
        if self.broken_destinations.iter().any(|d| d == dest) {
            return Err(MailboxError::CommandFailed {
                command: "UID MOVE".into(),
                response: "NO [TRYCREATE] Mailbox doesn't exist".into(),
            });
        }
        let mut message = self.take(id)?;
        message.folder = dest.to_string();
        self.folders.entry(dest.to_string()).or_default().push(message);
        Ok(())
    }
}

impl Mailbox for VirtualMailbox {
    fn current_folder_name(&self) -> &str {
        &self.selected
    }

    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError> {
        Ok(self.folders.keys().cloned().collect())
    }

    fn select_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        if !self.folders.contains_key(folder) {
            return Err(MailboxError::CommandFailed {
                command: "SELECT".into(),
                response: "NO Mailbox doesn't exist".into(),
            });
        }
        self.selected = folder.to_string();
        Ok(())
    }

    fn list_message_ids(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        Ok(self.ids_in(&self.selected.clone()))
    }

    fn fetch_message(&mut self, id: MessageId) -> Result<Option<Message>, MailboxError> {
        Ok(self
            .folder(&self.selected)
            .iter()
            .find(|m| m.id == id)
            .map(|m| Message {
                body: None,
                ..m.clone()
            }))
    }

    fn fetch_body(&mut self, id: MessageId) -> Result<Option<String>, MailboxError> {
        Ok(self.find_mut(id)?.body.clone())
    }

    fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, MailboxError> {
        let message = self.find_mut(id)?;
        Ok(format!(
            "Subject: {}\r\n\r\n{}",
            message.display_subject(),
            message.body.as_deref().unwrap_or("")
        )
        .into_bytes())
    }

    fn apply_move(
        &mut self,
        id: MessageId,
        dest_folder: &str,
        mark_as_read_before_move: bool,
    ) -> Result<(), MailboxError> {
        if mark_as_read_before_move {
            self.set_flag(id, SEEN_FLAG)?;
        }
        self.move_into(id, dest_folder)
    }

    fn apply_delete(&mut self, id: MessageId, permanent: bool) -> Result<(), MailboxError> {
        if permanent {
            self.take(id)?;
            self.expunged.push(id);
            Ok(())
        } else {
            let trash = self.trash.clone();
            self.move_into(id, &trash)
        }
    }

    fn set_flag(&mut self, id: MessageId, flag: &str) -> Result<(), MailboxError> {
        self.find_mut(id)?.flags.insert(flag.to_string());
        Ok(())
    }

    fn clear_flag(&mut self, id: MessageId, flag: &str) -> Result<(), MailboxError> {
        self.find_mut(id)?.flags.remove(flag);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, Vec<String>, String, Option<Attachment>)>>,
}

impl Mailer for RecordingMailer {
    fn send(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        _body: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), MailerError> {
        self.sent.lock().unwrap().push((
            from.to_string(),
            to.to_vec(),
            subject.to_string(),
            attachment,
        ));
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn cond(field: &str, op: &str, value: &str) -> Condition {
    Condition::from_spec(&ConditionSpec::new(field, op, value))
}

fn rule(id: u32, matches: Vec<Condition>, actions: Vec<Action>) -> Rule {
    Rule::new(
        id,
        None,
        ConditionGroup::all_of(matches),
        ConditionGroup::default(),
        actions,
    )
}

fn inbox_message(id: MessageId, subject: &str) -> Message {
    Message::new(id, "INBOX")
        .with_subject(subject)
        .with_from("Sender <sender@example.com>")
}

fn sweep_inbox(engine: &mut RuleEngine<impl Clock>, mailbox: &mut VirtualMailbox) {
    mailbox.select_folder("INBOX").unwrap();
    let status = engine.sweep_folder(mailbox, None).unwrap();
    assert_eq!(status, SweepStatus::Completed);
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[test]
fn undeliverable_mail_goes_to_trash_and_inert_rule_is_never_checked() {
    let rules = vec![
        rule(
            1,
            vec![cond("subject", "contains", "Undeliverable:")],
            vec![Action::move_to("Trash")],
        ),
        rule(2, vec![], vec![Action::move_to("Archive")]),
    ];
    let mut engine = RuleEngine::new(rules, EngineSettings::default());
    let mut mailbox = VirtualMailbox::new().with_folder(
        "INBOX",
        vec![
            inbox_message(1, "Undeliverable: foo"),
            inbox_message(2, "Lunch?"),
            inbox_message(3, "Quarterly numbers"),
        ],
    );

    sweep_inbox(&mut engine, &mut mailbox);

    assert_eq!(mailbox.ids_in("Trash"), vec![1]);
    assert_eq!(mailbox.ids_in("INBOX"), vec![2, 3]);
    assert!(mailbox.folder("Archive").is_empty());

    let counters = engine.counters();
    assert_eq!(counters.emails_seen(), 3);
    assert_eq!(counters.emails_matched(), 1);
    assert_eq!(counters.rules_checked(), 1);
    assert_eq!(counters.actions_taken(), 1);
}

#[test]
fn mark_unread_after_move_never_runs() {
    let rules = vec![rule(
        1,
        vec![cond("subject", "starts_with", "[newsletter]")],
        vec![
            Action::MarkAsRead,
            Action::MoveToFolder {
                dest_folder: "News".into(),
                mark_as_read: Some(false),
            },
            Action::MarkAsUnread,
        ],
    )];
    let mut engine = RuleEngine::new(rules, EngineSettings::default());
    let mut mailbox = VirtualMailbox::new()
        .with_folder("INBOX", vec![inbox_message(7, "[Newsletter] October")]);

    sweep_inbox(&mut engine, &mut mailbox);

    let moved = &mailbox.folder("News")[0];
    assert!(moved.is_read(), "mark_as_unread must not run after the move");
    assert_eq!(engine.counters().actions_taken(), 2);
}

#[test]
fn exception_suppresses_all_actions() {
    let mut r = rule(
        1,
        vec![cond("subject", "contains", "invoice")],
        vec![Action::MarkAsRead, Action::move_to("Billing")],
    );
    r.exceptions.push(cond("from", "contains", "@trusted.example"));
    let mut engine = RuleEngine::new(vec![r], EngineSettings::default());
    let mut mailbox = VirtualMailbox::new().with_folder(
        "INBOX",
        vec![
            inbox_message(1, "Invoice 42").with_from("ap@trusted.example"),
            inbox_message(2, "Invoice 43"),
        ],
    );

    sweep_inbox(&mut engine, &mut mailbox);

    assert_eq!(mailbox.ids_in("INBOX"), vec![1]);
    assert!(!mailbox.folder("INBOX")[0].is_read());
    assert_eq!(mailbox.ids_in("Billing"), vec![2]);
    assert_eq!(engine.counters().get(EMAILS_EXCEPTED), 1);
    assert_eq!(engine.counters().emails_matched(), 1);
}

#[test]
fn action_failure_does_not_abort_the_sweep() {
    let rules = vec![rule(
        1,
        vec![cond("subject", "contains", "x")],
        vec![Action::move_to("Nowhere")],
    )];
    let mut engine = RuleEngine::new(rules, EngineSettings::default());
    let mut mailbox = VirtualMailbox {
        broken_destinations: vec!["Nowhere".into()],
        ..VirtualMailbox::new()
    }
    .with_folder("INBOX", vec![inbox_message(1, "x"), inbox_message(2, "x")]);

    sweep_inbox(&mut engine, &mut mailbox);

    assert_eq!(engine.counters().emails_seen(), 2);
    assert_eq!(engine.counters().get(ACTIONS_FAILED), 2);
    assert_eq!(mailbox.ids_in("INBOX"), vec![1, 2]);
}

#[test]
fn delete_moves_to_trash_unless_permanent() {
    let rules = vec![
        rule(
            1,
            vec![cond("subject", "is", "spam")],
            vec![Action::Delete { permanently: true }],
        ),
        rule(
            2,
            vec![cond("subject", "contains", "promo")],
            vec![Action::Delete { permanently: false }],
        ),
    ];
    let mut engine = RuleEngine::new(rules, EngineSettings::default());
    let mut mailbox = VirtualMailbox::new().with_folder(
        "INBOX",
        vec![
            inbox_message(1, "SPAM"),
            inbox_message(2, "Big promo inside"),
            inbox_message(3, "spam and eggs"),
        ],
    );

    sweep_inbox(&mut engine, &mut mailbox);

    assert_eq!(mailbox.expunged, vec![1]);
    assert_eq!(mailbox.ids_in("Trash"), vec![2]);
    // `is` is exact equality, not a prefix match.
    assert_eq!(mailbox.ids_in("INBOX"), vec![3]);
}

#[test]
fn body_condition_fetches_body_on_demand() {
    let rules = vec![rule(
        1,
        vec![cond("body", "contains", "unsubscribe")],
        vec![Action::move_to("Lists")],
    )];
    let mut engine = RuleEngine::new(rules, EngineSettings::default());
    let mut mailbox = VirtualMailbox::new().with_folder(
        "INBOX",
        vec![
            inbox_message(1, "Hi").with_body("Click here to UNSUBSCRIBE"),
            inbox_message(2, "Hi").with_body("See you tomorrow"),
        ],
    );

    sweep_inbox(&mut engine, &mut mailbox);

    assert_eq!(mailbox.ids_in("Lists"), vec![1]);
}

#[test]
fn forward_sends_copy_and_keeps_original() {
    let rules = vec![rule(
        1,
        vec![cond("from", "contains", "alerts@")],
        vec![Action::Forward {
            to: vec!["oncall@example.com".into()],
        }],
    )];
    let settings = EngineSettings {
        forward_from: "sweeper@example.com".into(),
        ..Default::default()
    };
    let mut engine = RuleEngine::new(rules, settings);
    let mut mailbox = VirtualMailbox::new().with_folder(
        "INBOX",
        vec![
            inbox_message(1, "CPU high")
                .with_from("alerts@monitoring.example")
                .with_body("cpu 99%"),
        ],
    );
    let mailer = RecordingMailer::default();

    mailbox.select_folder("INBOX").unwrap();
    engine.sweep_folder(&mut mailbox, Some(&mailer)).unwrap();

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (from, to, subject, attachment) = &sent[0];
    assert_eq!(from, "sweeper@example.com");
    assert_eq!(to, &vec!["oncall@example.com".to_string()]);
    assert_eq!(subject, "Fwd: CPU high");
    let attachment = attachment.as_ref().unwrap();
    assert_eq!(attachment.content_type, "message/rfc822");
    assert!(String::from_utf8_lossy(&attachment.content).contains("cpu 99%"));
    assert_eq!(mailbox.ids_in("INBOX"), vec![1]);
}

#[test]
fn old_unread_mail_is_archived_by_fixed_clock() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let rules = vec![rule(
        1,
        vec![cond("date", "older_than", "2w"), cond("read_state", "is", "unread")],
        vec![Action::move_to("Archive")],
    )];
    let mut engine = RuleEngine::with_clock(
        rules,
        EngineSettings {
            mark_as_read_on_move: false,
            ..Default::default()
        },
        FixedClock(now),
    );
    let old = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let mut mailbox = VirtualMailbox::new().with_folder(
        "INBOX",
        vec![
            inbox_message(1, "old unread").with_date(old),
            inbox_message(2, "old read")
                .with_date(old)
                .with_flags(&["\\Seen"]),
            inbox_message(3, "fresh").with_date(now),
        ],
    );

    sweep_inbox(&mut engine, &mut mailbox);

    assert_eq!(mailbox.ids_in("Archive"), vec![1]);
    assert!(!mailbox.folder("Archive")[0].is_read());
}

#[test]
fn abort_flag_stops_before_next_message() {
    let rules = vec![rule(
        1,
        vec![cond("subject", "contains", "x")],
        vec![Action::MarkAsRead],
    )];
    let mut engine = RuleEngine::new(rules, EngineSettings::default());
    engine.abort_handle().store(true, Ordering::Relaxed);
    let mut mailbox =
        VirtualMailbox::new().with_folder("INBOX", vec![inbox_message(1, "x")]);

    mailbox.select_folder("INBOX").unwrap();
    let status = engine.sweep_folder(&mut mailbox, None).unwrap();

    assert_eq!(status, SweepStatus::Aborted);
    assert_eq!(engine.counters().emails_seen(), 0);
    assert!(!mailbox.folder("INBOX")[0].is_read());
}

#[test]
fn full_sweep_skips_excluded_subtrees() {
    let json = r#"{
        "settings": { "exclude_folders": ["Archive"], "trash_folder": "Trash" },
        "rules": [
            {
                "name": "Read receipts",
                "matches": [{ "field": "subject", "operator": "starts_with", "value": "Read:" }],
                "actions": [{ "action": "mark_as_read" }]
            }
        ]
    }"#;
    let (settings, rules) = parse_rules(json).unwrap();
    let mut engine = RuleEngine::new(rules, EngineSettings::default());
    let mut mailbox = VirtualMailbox::new()
        .with_folder("INBOX", vec![inbox_message(1, "Read: hello")])
        .with_folder("Archive", vec![inbox_message(2, "Read: old")])
        .with_folder("Archive/2023", vec![inbox_message(3, "Read: older")])
        .with_folder("Work", vec![inbox_message(4, "Read: report")]);

    let folders = folders_to_sweep(&mut mailbox, &settings, SweepScope::Full).unwrap();
    assert_eq!(folders, vec!["INBOX", "Work"]);
    sweep_folders(&mut engine, &mut mailbox, None, &folders).unwrap();

    assert!(mailbox.folder("INBOX")[0].is_read());
    assert!(mailbox.folder("Work")[0].is_read());
    assert!(!mailbox.folder("Archive")[0].is_read());
    assert_eq!(engine.counters().get(FOLDERS_SWEPT), 2);
    assert_eq!(engine.counters().emails_seen(), 2);
}

#[test]
fn rules_file_loads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "settings": {{ "mark_as_read_on_move": false }},
            "rules": [
                {{
                    "matches": [
                        {{ "any": [
                            {{ "field": "from", "operator": "contains", "value": "@lists." }},
                            {{ "field": "to", "operator": "contains", "value": "list@" }}
                        ] }}
                    ],
                    "match_exceptions": [
                        {{ "field": "subject", "operator": "contains", "value": "urgent" }}
                    ],
                    "actions": [
                        {{ "action": "move_to_folder", "folder": "Lists" }},
                        {{ "action": "teleport" }}
                    ]
                }}
            ]
        }}"#
    )
    .unwrap();

    let (settings, rules) = load_rules(file.path()).unwrap();
    assert!(!settings.mark_as_read_on_move);
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name, "Rule_1");
    assert_eq!(rules[0].actions.len(), 1);

    let mut engine = RuleEngine::new(
        rules,
        EngineSettings {
            mark_as_read_on_move: settings.mark_as_read_on_move,
            ..Default::default()
        },
    );
    let mut mailbox = VirtualMailbox::new().with_folder(
        "INBOX",
        vec![
            inbox_message(1, "digest").with_from("bot@lists.example"),
            inbox_message(2, "URGENT digest").with_from("bot@lists.example"),
            inbox_message(3, "hello").with_to(&["team-list@example.com"]),
        ],
    );

    sweep_inbox(&mut engine, &mut mailbox);

    assert_eq!(mailbox.ids_in("Lists"), vec![1, 3]);
    assert!(!mailbox.folder("Lists")[0].is_read());
}

#[test]
fn malformed_rules_file_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{ \"rules\": [ ").unwrap();
    let err = load_rules(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse rules file"));
}
