//! SMTP replies

use std::fmt;

use crate::smtp::error::{SmtpError, SmtpLimits};

/// A reply sent to the client: a three-digit code and one or more text lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    pub code: u16,
    /// Never empty. Every line but the last is sent as a continuation.
    pub lines: Vec<String>,
}

impl SmtpResponse {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// A reply whose first line is `text`, followed by `extra`
    pub fn with_lines(code: u16, text: impl Into<String>, extra: Vec<String>) -> Self {
        let mut lines = Vec::with_capacity(extra.len() + 1);
        lines.push(text.into());
        lines.extend(extra);
        Self { code, lines }
    }

    /// 250 OK
    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    /// 220 banner sent on connect
    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{hostname} ESMTP Service Ready"))
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new(250, format!("{hostname} Hello {client_domain}"))
    }

    /// HELO reply followed by the advertised extensions
    pub fn ehlo(hostname: &str, client_domain: &str) -> Self {
        Self::with_lines(
            250,
            format!("{hostname} Hello {client_domain}"),
            vec![
                "PIPELINING".to_string(),
                "8BITMIME".to_string(),
                format!("SIZE {}", SmtpLimits::MAX_DATA_SIZE),
            ],
        )
    }

    pub fn data_start() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    /// 250 for a committed message, naming its id
    pub fn queued(id: &str) -> Self {
        Self::new(250, format!("OK: queued as {id}"))
    }

    pub fn quit() -> Self {
        Self::new(221, "Bye")
    }

    pub fn from_error(error: &SmtpError) -> Self {
        Self::new(error.to_response_code(), error.to_response_message())
    }

    /// First text line
    pub fn text(&self) -> &str {
        self.lines.first().map_or("", String::as_str)
    }

    /// Wire form, CRLF-terminated
    pub fn format(&self) -> String {
        self.to_string()
    }

    /// Whether any line exceeds the reply length limit once framed
    pub fn exceeds_line_limit(&self) -> bool {
        // "NNN-" prefix plus CRLF
        self.lines
            .iter()
            .any(|line| line.len() + 6 > SmtpLimits::REPLY_LINE_MAX_LENGTH)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 4xx or 5xx
    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.code)
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            write!(f, "{}{sep}{line}\r\n", self.code)?;
        }
        Ok(())
    }
}
