//! Configuration types.
//!
//! Account credentials come from the environment; sweep settings and rules
//! come from the JSON rules file (see [`crate::rules::loader`]).

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Mail account connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Sender address used for forwarded mail.
    pub from_address: String,
    /// Path to the JSON rules file.
    pub rules_path: PathBuf,
    /// Directory for rolling log files; stderr when unset.
    pub log_dir: Option<PathBuf>,
}

impl AccountConfig {
    /// Build config from environment variables.
    /// `MAILSWEEP_IMAP_HOST` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = std::env::var("MAILSWEEP_IMAP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("MAILSWEEP_IMAP_HOST".into()))?;

        let imap_port = parse_port("MAILSWEEP_IMAP_PORT", 993)?;

        let smtp_host = std::env::var("MAILSWEEP_SMTP_HOST")
            .unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port = parse_port("MAILSWEEP_SMTP_PORT", 587)?;

        let username = std::env::var("MAILSWEEP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("MAILSWEEP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("MAILSWEEP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        let rules_path = std::env::var("MAILSWEEP_RULES")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./rules.json"));

        let log_dir = std::env::var("MAILSWEEP_LOG_DIR").ok().map(PathBuf::from);

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            rules_path,
            log_dir,
        })
    }
}

fn parse_port(key: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}' is not a port number"),
        }),
        Err(_) => Ok(default),
    }
}

/// Global sweep settings from the `settings` object of the rules file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Mark messages read before a move unless the action says otherwise.
    pub mark_as_read_on_move: bool,
    /// Folders swept on every poll.
    pub folders: Vec<String>,
    /// Folders (and everything below them) never swept.
    pub exclude_folders: Vec<String>,
    /// Destination for non-permanent deletes.
    pub trash_folder: String,
    pub poll_interval_minutes: u64,
    pub full_sweep_interval_hours: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mark_as_read_on_move: true,
            folders: vec!["INBOX".to_string()],
            exclude_folders: Vec::new(),
            trash_folder: "Trash".to_string(),
            poll_interval_minutes: 5,
            full_sweep_interval_hours: 24,
        }
    }
}

/// Longest period the scheduler accepts.
const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 3600);

impl Settings {
    /// Poll period, between one minute and a year.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.max(1).saturating_mul(60))
            .min(MAX_INTERVAL)
    }

    /// Full sweep period, between one hour and a year.
    pub fn full_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.full_sweep_interval_hours.max(1).saturating_mul(3600))
            .min(MAX_INTERVAL)
    }
}
