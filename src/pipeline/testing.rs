//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{MailboxError, MailerError};
use crate::mail::{Attachment, Mailbox, Mailer, Message, MessageId};

/// Mailbox that records every mutating call as a short string.
#[derive(Debug, Default)]
pub struct ScriptedMailbox {
    pub folder: String,
    pub folders: Vec<String>,
    pub selected: Vec<String>,
    pub ids: Vec<MessageId>,
    pub messages: Vec<Message>,
    pub bodies: HashMap<MessageId, String>,
    pub body_fetches: usize,
    pub calls: Vec<String>,
    pub fail_moves: bool,
    pub fail_select: Vec<String>,
}

impl Mailbox for ScriptedMailbox {
    fn current_folder_name(&self) -> &str {
        &self.folder
    }

    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError> {
        Ok(self.folders.clone())
    }

    fn select_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        if self.fail_select.iter().any(|f| f == folder) {
            return Err(MailboxError::CommandFailed {
                command: "SELECT".into(),
                response: "NO no such mailbox".into(),
            });
        }
        self.folder = folder.to_string();
        self.selected.push(folder.to_string());
        Ok(())
    }

    fn list_message_ids(&mut self) -> Result<Vec<MessageId>, MailboxError> {
        Ok(self.ids.clone())
    }

    fn fetch_message(&mut self, id: MessageId) -> Result<Option<Message>, MailboxError> {
        Ok(self.messages.iter().find(|m| m.id == id).cloned())
    }

    fn fetch_body(&mut self, id: MessageId) -> Result<Option<String>, MailboxError> {
        self.body_fetches += 1;
        Ok(self.bodies.get(&id).cloned())
    }

    fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, MailboxError> {
        Ok(format!("raw-{id}").into_bytes())
    }

    fn apply_move(
        &mut self,
        id: MessageId,
        dest_folder: &str,
        mark_as_read_before_move: bool,
    ) -> Result<(), MailboxError> {
        if self.fail_moves {
            return Err(MailboxError::CommandFailed {
                command: "UID MOVE".into(),
                response: "NO [TRYCREATE] no such mailbox".into(),
            });
        }
        self.calls.push(format!(
            "move({id}, {dest_folder}, read={mark_as_read_before_move})"
        ));
        Ok(())
    }

    fn apply_delete(&mut self, id: MessageId, permanent: bool) -> Result<(), MailboxError> {
        self.calls.push(format!("delete({id}, permanent={permanent})"));
        Ok(())
    }

    fn set_flag(&mut self, id: MessageId, flag: &str) -> Result<(), MailboxError> {
        self.calls.push(format!("set_flag({id}, {flag})"));
        Ok(())
    }

    fn clear_flag(&mut self, id: MessageId, flag: &str) -> Result<(), MailboxError> {
        self.calls.push(format!("clear_flag({id}, {flag})"));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentMail>>,
}

impl Mailer for RecordingMailer {
    fn send(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), MailerError> {
        self.sent
            .lock()
            .map_err(|e| MailerError::SendFailed(e.to_string()))?
            .push(SentMail {
                from: from.to_string(),
                to: to.to_vec(),
                subject: subject.to_string(),
                body: body.to_string(),
                attachment: attachment.map(|a| a.content),
            });
        Ok(())
    }
}
