//! Error types for mailsweep.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Mailer error: {0}")]
    Mailer(#[from] MailerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse rules file {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox collaborator errors (connection, protocol, per-message commands).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("Server rejected `{command}`: {response}")]
    CommandFailed { command: String, response: String },

    #[error("Malformed server response: {0}")]
    Protocol(String),

    #[error("No folder selected")]
    NoFolderSelected,

    #[error("Message {0} not found")]
    MessageNotFound(u32),

    #[error("Connection closed by server")]
    Closed,

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    SendFailed(String),

    #[error("No mailer configured")]
    NotConfigured,
}

/// Result type alias for mailsweep.
pub type Result<T> = std::result::Result<T, Error>;
