//! Mailbox and mailer contracts consumed by the rule engine.
//!
//! The engine only ever talks to a [`Mailbox`] (fetch, move, delete, flag)
//! and a [`Mailer`] (forwarding). `imap` and `smtp` hold the network-backed
//! implementations; tests use in-memory ones.

pub mod imap;
pub mod message;
pub mod smtp;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::{MailboxError, MailerError};

pub use imap::ImapMailbox;
pub use smtp::SmtpMailer;

/// Server-side identifier of a message within the selected folder (IMAP UID).
pub type MessageId = u32;

/// The IMAP system flag marking a message as read.
pub const SEEN_FLAG: &str = "\\Seen";

/// A message as seen by the rule engine.
///
/// Produced by the mailbox, usually header-only: `body` stays `None` until
/// the engine asks for it.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub id: MessageId,
    /// From header entries, rendered as `Name <addr>` or `addr`.
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    /// Plain-text body, fetched lazily.
    pub body: Option<String>,
    /// Parsed Date header. `None` when missing or unparseable.
    pub date: Option<DateTime<Utc>>,
    /// RFC822 size in bytes.
    pub size: Option<u64>,
    pub flags: BTreeSet<String>,
    /// Full path of the folder the message was fetched from.
    pub folder: String,
}

impl Message {
    /// Create a message with only an id and folder set.
    pub fn new(id: MessageId, folder: impl Into<String>) -> Self {
        Self {
            id,
            folder: folder.into(),
            ..Default::default()
        }
    }

    pub fn with_from(mut self, from: &str) -> Self {
        self.from = vec![from.to_string()];
        self
    }

    pub fn with_to(mut self, to: &[&str]) -> Self {
        self.to = to.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_cc(mut self, cc: &[&str]) -> Self {
        self.cc = cc.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_flags(mut self, flags: &[&str]) -> Self {
        self.flags = flags.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Read state derived from the `\Seen` flag.
    pub fn is_read(&self) -> bool {
        self.flags.contains(SEEN_FLAG)
    }

    /// Subject for log lines.
    pub fn display_subject(&self) -> &str {
        self.subject.as_deref().unwrap_or("(no subject)")
    }
}

/// A file attached to an outbound message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Remote mailbox operations needed by the engine.
///
/// All calls are blocking; implementations are driven from a single thread.
pub trait Mailbox {
    /// Path of the currently selected folder.
    fn current_folder_name(&self) -> &str;

    /// All selectable folder paths on the server.
    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError>;

    /// Make `folder` the current context.
    fn select_folder(&mut self, folder: &str) -> Result<(), MailboxError>;

    /// Ids of every message in the current folder, oldest first.
    fn list_message_ids(&mut self) -> Result<Vec<MessageId>, MailboxError>;

    /// Header-only view of one message; `None` if it vanished meanwhile.
    fn fetch_message(&mut self, id: MessageId) -> Result<Option<Message>, MailboxError>;

    /// Plain-text body of one message.
    fn fetch_body(&mut self, id: MessageId) -> Result<Option<String>, MailboxError>;

    /// Complete RFC822 source of one message.
    fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, MailboxError>;

    fn apply_move(
        &mut self,
        id: MessageId,
        dest_folder: &str,
        mark_as_read_before_move: bool,
    ) -> Result<(), MailboxError>;

    fn apply_delete(&mut self, id: MessageId, permanent: bool) -> Result<(), MailboxError>;

    fn set_flag(&mut self, id: MessageId, flag: &str) -> Result<(), MailboxError>;

    fn clear_flag(&mut self, id: MessageId, flag: &str) -> Result<(), MailboxError>;
}

/// Outbound mail used by the forward action.
pub trait Mailer {
    fn send(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), MailerError>;
}
