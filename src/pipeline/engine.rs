//! Rule engine: runs every message of a folder through the ordered rule list.
//!
//! Per message:
//! 1. Fetch the body if some rule needs it and the message lacks one
//! 2. Evaluate rules in declaration order (inert rules are skipped)
//! 3. Apply the actions of each matched rule
//! 4. Stop at the first rule that attempted a move or delete
//!
//! The abort flag is only checked between messages.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mail::{Mailbox, Mailer, Message};
use crate::pipeline::counters::{
    ACTIONS_FAILED, ACTIONS_TAKEN, EMAILS_EXCEPTED, EMAILS_MATCHED, EMAILS_SEEN, FETCH_ERRORS,
    RULE_EVALUATIONS, RULES_CHECKED, RunCounters,
};
use crate::pipeline::execute::{ActionContext, apply};
use crate::rules::{Rule, RuleId, RuleOutcome};

/// Source of "now" for relative date conditions.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Real clock implementation using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Global settings the engine applies to actions.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Mark read before moving, unless a move action overrides it.
    pub mark_as_read_on_move: bool,
    /// Sender address for forwarded mail.
    pub forward_from: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mark_as_read_on_move: true,
            forward_from: String::new(),
        }
    }
}

/// How a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStatus {
    Completed,
    /// Stopped early because the abort flag was raised.
    Aborted,
}

/// Evaluates messages against an ordered, immutable rule list.
pub struct RuleEngine<K: Clock = SystemClock> {
    rules: Arc<[Rule]>,
    settings: EngineSettings,
    counters: RunCounters,
    /// Rules evaluated at least once this run.
    checked: HashSet<RuleId>,
    needs_body: bool,
    abort: Arc<AtomicBool>,
    clock: K,
}

impl RuleEngine<SystemClock> {
    pub fn new(rules: impl Into<Arc<[Rule]>>, settings: EngineSettings) -> Self {
        Self::with_clock(rules, settings, SystemClock)
    }
}

impl<K: Clock> RuleEngine<K> {
    pub fn with_clock(rules: impl Into<Arc<[Rule]>>, settings: EngineSettings, clock: K) -> Self {
        let rules = rules.into();
        let needs_body = rules.iter().any(|r| !r.is_inert() && r.references_body());
        Self {
            rules,
            settings,
            counters: RunCounters::new(),
            checked: HashSet::new(),
            needs_body,
            abort: Arc::new(AtomicBool::new(false)),
            clock,
        }
    }

    /// Share an externally owned abort flag.
    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Flag that stops the engine at the next message boundary when set.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut RunCounters {
        &mut self.counters
    }

    pub fn into_counters(self) -> RunCounters {
        self.counters
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Run an already-fetched message sequence through the rules.
    pub fn run_over_messages<I>(
        &mut self,
        messages: I,
        mailbox: &mut dyn Mailbox,
        mailer: Option<&dyn Mailer>,
    ) -> SweepStatus
    where
        I: IntoIterator<Item = Message>,
    {
        for message in messages {
            if self.aborted() {
                info!("Sweep aborted");
                return SweepStatus::Aborted;
            }
            self.process_message(message, mailbox, mailer);
        }
        SweepStatus::Completed
    }

    /// Fetch and process every message of the mailbox's current folder,
    /// one at a time.
    ///
    /// Per-message fetch failures are logged and skipped; a lost connection
    /// ends the sweep with an error.
    pub fn sweep_folder(
        &mut self,
        mailbox: &mut dyn Mailbox,
        mailer: Option<&dyn Mailer>,
    ) -> Result<SweepStatus, MailboxError> {
        let started = Instant::now();
        let folder = mailbox.current_folder_name().to_string();
        let ids = mailbox.list_message_ids()?;
        info!(folder = %folder, messages = ids.len(), "Sweeping folder");

        let mut status = SweepStatus::Completed;
        for id in ids {
            if self.aborted() {
                info!(folder = %folder, "Sweep aborted");
                status = SweepStatus::Aborted;
                break;
            }
            match mailbox.fetch_message(id) {
                Ok(Some(message)) => self.process_message(message, mailbox, mailer),
                Ok(None) => debug!(uid = id, "Message disappeared before fetch"),
                Err(e @ (MailboxError::Closed | MailboxError::Io(_))) => {
                    self.counters.add_time("sweep", started.elapsed());
                    return Err(e);
                }
                Err(e) => {
                    self.counters.incr(FETCH_ERRORS);
                    warn!(uid = id, error = %e, "Failed to fetch message");
                }
            }
        }

        self.counters.add_time("sweep", started.elapsed());
        Ok(status)
    }

    /// Evaluate one message against every rule and apply what matches.
    pub fn process_message(
        &mut self,
        mut message: Message,
        mailbox: &mut dyn Mailbox,
        mailer: Option<&dyn Mailer>,
    ) {
        self.counters.incr(EMAILS_SEEN);
        let now = self.clock.now();

        if self.needs_body && message.body.is_none() {
            match mailbox.fetch_body(message.id) {
                Ok(body) => message.body = body,
                Err(e) => warn!(uid = message.id, error = %e, "Failed to fetch body"),
            }
        }

        let rules = Arc::clone(&self.rules);
        let mut matched = false;
        let mut excepted = false;

        for rule in rules.iter() {
            if rule.is_inert() {
                continue;
            }
            self.counters.incr(RULE_EVALUATIONS);
            if self.checked.insert(rule.id) {
                self.counters.incr(RULES_CHECKED);
            }

            let outcome = rule.evaluate(&message, now);
            match outcome {
                RuleOutcome::NoMatch => {
                    debug!(
                        rule = %rule.name,
                        uid = message.id,
                        outcome = outcome.label(),
                        "No match"
                    );
                }
                RuleOutcome::MatchedAndExcepted => {
                    excepted = true;
                    info!(
                        rule = %rule.name,
                        uid = message.id,
                        subject = %message.display_subject(),
                        outcome = outcome.label(),
                        "Matched but suppressed by exception"
                    );
                }
                RuleOutcome::Matched => {
                    matched = true;
                    info!(
                        rule = %rule.name,
                        uid = message.id,
                        subject = %message.display_subject(),
                        outcome = outcome.label(),
                        "Rule matched"
                    );
                    let mut ctx = ActionContext {
                        mailbox: &mut *mailbox,
                        mailer,
                        settings: &self.settings,
                    };
                    let report = apply(rule, &message, &mut ctx);
                    self.counters.add(ACTIONS_TAKEN, report.executed);
                    self.counters.add(ACTIONS_FAILED, report.failed);
                    if report.destructive_attempted {
                        break;
                    }
                }
            }
        }

        if matched {
            self.counters.incr(EMAILS_MATCHED);
        } else if excepted {
            self.counters.incr(EMAILS_EXCEPTED);
        }
    }
}
