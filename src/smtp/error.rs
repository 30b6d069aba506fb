//! Error types for the SMTP listener

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Invalid state for command")]
    InvalidState(String),

    #[error("Invalid syntax")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Path too long (max {max} characters)")]
    PathTooLong { max: usize },

    #[error("Too many recipients (max {max})")]
    TooManyRecipients { max: usize },

    #[error("Too much mail data (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Domain name too long (max {max} characters)")]
    DomainTooLong { max: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from starting or running the listener
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to bind SMTP listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-connection limits enforced by the listener
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a domain name
    pub const DOMAIN_MAX_LENGTH: usize = 64;

    /// Maximum length of a path (reverse-path or forward-path)
    pub const PATH_MAX_LENGTH: usize = 256;

    /// Maximum length of a command line including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a reply line including CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;

    /// Maximum number of recipients per message
    pub const MAX_RECIPIENTS: usize = 50;

    /// Maximum size of the message data
    pub const MAX_DATA_SIZE: usize = 1024 * 1024; // 1 MiB

    /// Largest piece of a message data line buffered at once
    pub const DATA_CHUNK_LENGTH: usize = 64 * 1024;

    /// Socket read timeout
    pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Socket write timeout
    pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Maps SMTP errors to appropriate response codes
impl SmtpError {
    pub fn to_response_code(&self) -> u16 {
        match self {
            SmtpError::Io(_) => 421,
            SmtpError::InvalidCommand => 500,
            SmtpError::InvalidState(_) => 503,
            SmtpError::InvalidSyntax(_) => 501,
            SmtpError::LineTooLong { .. } => 500,
            SmtpError::PathTooLong { .. } => 501,
            SmtpError::TooManyRecipients { .. } => 452,
            SmtpError::TooMuchData { .. } => 552,
            SmtpError::DomainTooLong { .. } => 501,
            SmtpError::Storage(_) => 451,
        }
    }

    pub fn to_response_message(&self) -> String {
        match self {
            SmtpError::Io(_) => "Service not available".to_string(),
            SmtpError::InvalidCommand => "Syntax error, command unrecognized".to_string(),
            SmtpError::InvalidState(msg) => format!("Bad sequence of commands: {msg}"),
            SmtpError::InvalidSyntax(msg) => format!("Syntax error: {msg}"),
            SmtpError::LineTooLong { max } => format!("Line too long (max {max} characters)"),
            SmtpError::PathTooLong { max } => format!("Path too long (max {max} characters)"),
            SmtpError::TooManyRecipients { max } => {
                format!("Maximum limit of {max} recipients reached")
            }
            SmtpError::TooMuchData { max } => format!("Too much mail data (max {max} bytes)"),
            SmtpError::DomainTooLong { max } => {
                format!("Domain name too long (max {max} characters)")
            }
            SmtpError::Storage(_) => {
                "Requested action aborted: local error in processing".to_string()
            }
        }
    }
}
