//! Multi-folder sweeps: folder selection, exclusion and the connection scope.

use std::time::Instant;

use tracing::{info, warn};

use crate::config::{AccountConfig, Settings};
use crate::error::MailboxError;
use crate::mail::{ImapMailbox, Mailbox, Mailer};
use crate::pipeline::counters::FOLDERS_SWEPT;
use crate::pipeline::engine::{Clock, RuleEngine, SweepStatus};

/// Which folders a sweep covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepScope {
    /// Only the folders listed in settings.
    Poll,
    /// Every selectable folder on the server that is not excluded.
    Full,
}

impl SweepScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Full => "full_sweep",
        }
    }
}

/// True if `folder` or any of its ancestors is in `exclusions`.
///
/// Ancestors are built cumulatively from the root: for `a/b/c` the
/// candidates are `a`, `a/b` and `a/b/c`.
pub fn is_folder_excluded(folder: &str, exclusions: &[String]) -> bool {
    if exclusions.is_empty() {
        return false;
    }
    let mut prefix = String::with_capacity(folder.len());
    for segment in folder.split('/') {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);
        if exclusions.iter().any(|e| e.trim_end_matches('/') == prefix) {
            return true;
        }
    }
    false
}

/// Folders a sweep of `scope` visits, in order, minus exclusions.
pub fn folders_to_sweep(
    mailbox: &mut dyn Mailbox,
    settings: &Settings,
    scope: SweepScope,
) -> Result<Vec<String>, MailboxError> {
    let candidates = match scope {
        SweepScope::Poll => settings.folders.clone(),
        SweepScope::Full => mailbox.list_folders()?,
    };
    Ok(candidates
        .into_iter()
        .filter(|f| {
            let excluded = is_folder_excluded(f, &settings.exclude_folders);
            if excluded {
                info!(folder = %f, "Skipping excluded folder");
            }
            !excluded
        })
        .collect())
}

/// Select each folder in turn and run the engine over it.
///
/// A folder that cannot be selected is skipped with a warning.
pub fn sweep_folders<K: Clock>(
    engine: &mut RuleEngine<K>,
    mailbox: &mut dyn Mailbox,
    mailer: Option<&dyn Mailer>,
    folders: &[String],
) -> Result<SweepStatus, MailboxError> {
    for folder in folders {
        if let Err(e) = mailbox.select_folder(folder) {
            if matches!(e, MailboxError::Closed | MailboxError::Io(_)) {
                return Err(e);
            }
            warn!(folder = %folder, error = %e, "Failed to select folder");
            continue;
        }
        engine.counters_mut().incr(FOLDERS_SWEPT);
        if engine.sweep_folder(mailbox, mailer)? == SweepStatus::Aborted {
            return Ok(SweepStatus::Aborted);
        }
    }
    Ok(SweepStatus::Completed)
}

/// One complete sweep over a fresh IMAP session.
///
/// The session logs out when it goes out of scope, on every exit path.
pub fn run_once<K: Clock>(
    account: &AccountConfig,
    settings: &Settings,
    engine: &mut RuleEngine<K>,
    mailer: Option<&dyn Mailer>,
    scope: SweepScope,
) -> Result<SweepStatus, MailboxError> {
    let started = Instant::now();
    info!(scope = scope.as_str(), host = %account.imap_host, "Starting sweep");

    let status = {
        let mut mailbox = ImapMailbox::connect(account, &settings.trash_folder)?;
        let folders = folders_to_sweep(&mut mailbox, settings, scope)?;
        sweep_folders(engine, &mut mailbox, mailer, &folders)?
    };

    engine.counters_mut().add_time("connection", started.elapsed());
    info!(
        scope = scope.as_str(),
        status = ?status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Sweep finished"
    );
    Ok(status)
}
