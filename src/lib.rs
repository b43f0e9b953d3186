//! Mailsweep: rule-based IMAP mailbox processor.

pub mod config;
pub mod error;
pub mod mail;
pub mod pipeline;
pub mod rules;
pub mod scheduler;
