//! Action execution.
//!
//! Non-destructive actions all run first, in declaration order. Then the
//! first destructive action runs and nothing after it: once a message is
//! moved or deleted it is no longer in the current folder.

use tracing::{info, warn};

use crate::error::{MailerError, Result};
use crate::mail::{Attachment, Mailbox, Mailer, Message, SEEN_FLAG};
use crate::pipeline::engine::EngineSettings;
use crate::rules::{Action, Rule};

/// Collaborators an action runs against.
pub struct ActionContext<'a> {
    pub mailbox: &'a mut dyn Mailbox,
    pub mailer: Option<&'a dyn Mailer>,
    pub settings: &'a EngineSettings,
}

/// What happened while applying one rule's actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub executed: u64,
    pub failed: u64,
    /// A move or delete was attempted, successfully or not.
    pub destructive_attempted: bool,
}

/// Run a matched rule's actions against `message`.
///
/// Failures are logged and counted; they never stop the remaining actions.
pub fn apply(rule: &Rule, message: &Message, ctx: &mut ActionContext<'_>) -> ApplyReport {
    let mut report = ApplyReport::default();

    for action in rule.actions.iter().filter(|a| !a.is_destructive()) {
        run_one(rule, action, message, ctx, &mut report);
    }

    if let Some(action) = rule.actions.iter().find(|a| a.is_destructive()) {
        report.destructive_attempted = true;
        run_one(rule, action, message, ctx, &mut report);
    }

    report
}

fn run_one(
    rule: &Rule,
    action: &Action,
    message: &Message,
    ctx: &mut ActionContext<'_>,
    report: &mut ApplyReport,
) {
    match execute(action, message, ctx) {
        Ok(()) => {
            report.executed += 1;
            info!(
                rule = %rule.name,
                uid = message.id,
                action = %action,
                "Action executed"
            );
        }
        Err(e) => {
            report.failed += 1;
            warn!(
                rule = %rule.name,
                uid = message.id,
                action = %action,
                error = %e,
                "Action failed"
            );
        }
    }
}

/// Perform a single action through the collaborators.
pub fn execute(action: &Action, message: &Message, ctx: &mut ActionContext<'_>) -> Result<()> {
    let id = message.id;
    match action {
        Action::MoveToFolder {
            dest_folder,
            mark_as_read,
        } => {
            let mark = mark_as_read.unwrap_or(ctx.settings.mark_as_read_on_move);
            ctx.mailbox.apply_move(id, dest_folder, mark)?;
        }
        Action::Delete { permanently } => ctx.mailbox.apply_delete(id, *permanently)?,
        Action::MarkAsRead => ctx.mailbox.set_flag(id, SEEN_FLAG)?,
        Action::MarkAsUnread => ctx.mailbox.clear_flag(id, SEEN_FLAG)?,
        Action::Forward { to } => forward(message, to, ctx)?,
    }
    Ok(())
}

fn forward(message: &Message, to: &[String], ctx: &mut ActionContext<'_>) -> Result<()> {
    let mailer = ctx.mailer.ok_or(MailerError::NotConfigured)?;

    let body = match &message.body {
        Some(body) => body.clone(),
        None => ctx.mailbox.fetch_body(message.id)?.unwrap_or_default(),
    };
    let raw = ctx.mailbox.fetch_raw(message.id)?;

    mailer.send(
        &ctx.settings.forward_from,
        to,
        &format!("Fwd: {}", message.subject.as_deref().unwrap_or("")),
        &body,
        Some(Attachment {
            filename: "forwarded.eml".to_string(),
            content_type: "message/rfc822".to_string(),
            content: raw,
        }),
    )?;
    Ok(())
}
