//! Implementation of SMTP commands

use std::io::{self, BufRead, Read};

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{CaptureSession, SessionState};

/// Per-connection protocol state wrapped around a capture session
pub struct Conversation {
    /// Client domain from HELO/EHLO
    pub client_domain: Option<String>,
    /// RCPT commands accepted in the current transaction
    pub recipient_count: usize,
    /// The capture session for this connection
    pub session: CaptureSession,
}

impl Conversation {
    pub fn new(session: CaptureSession) -> Self {
        Self {
            client_domain: None,
            recipient_count: 0,
            session,
        }
    }

    /// Abandon the current transaction, keeping the greeting
    pub fn reset(&mut self) {
        self.recipient_count = 0;
        self.session.reset();
    }

    /// Check if the connection is ready for a specific command
    pub fn can_execute_command(&self, command: &str) -> bool {
        match command.to_uppercase().as_str() {
            "HELO" | "EHLO" => true,
            "MAIL" => self.client_domain.is_some() && self.session.state() == SessionState::Idle,
            "RCPT" => matches!(
                self.session.state(),
                SessionState::SenderSet | SessionState::RecipientSet
            ),
            "DATA" => self.session.state() == SessionState::RecipientSet,
            "RSET" | "NOOP" | "QUIT" => true,
            _ => false,
        }
    }
}

/// Handles SMTP commands and returns appropriate responses
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
}

impl<'a> SmtpCommandHandler<'a> {
    /// Create a new command handler
    pub fn new(hostname: &'a str) -> Self {
        Self { hostname }
    }

    /// Domain announced to clients
    pub fn hostname(&self) -> &'a str {
        self.hostname
    }

    /// Process a command line and return a response.
    ///
    /// A `354` response means the caller must now read the message data and
    /// hand it to [`CaptureSession::on_data`].
    pub fn process_command(
        &self,
        command_line: &str,
        conversation: &mut Conversation,
    ) -> Result<SmtpResponse, SmtpError> {
        // Check command line length
        if command_line.len() > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let parts: Vec<&str> = command_line.split_whitespace().collect();
        if parts.is_empty() {
            return Err(SmtpError::InvalidCommand);
        }

        let cmd = parts[0].to_uppercase();

        match cmd.as_str() {
            "HELO" => self.handle_helo(&parts, conversation, false),
            "EHLO" => self.handle_helo(&parts, conversation, true),
            "MAIL" => self.handle_mail(&parts, conversation),
            "RCPT" => self.handle_rcpt(&parts, conversation),
            "DATA" => self.handle_data(&parts, conversation),
            "RSET" => self.handle_rset(conversation),
            "NOOP" => Ok(SmtpResponse::ok()),
            "QUIT" => Ok(SmtpResponse::quit()),
            _ => Err(SmtpError::InvalidCommand),
        }
    }

    /// Handle HELO and EHLO
    fn handle_helo(
        &self,
        parts: &[&str],
        conversation: &mut Conversation,
        extended: bool,
    ) -> Result<SmtpResponse, SmtpError> {
        if parts.len() < 2 {
            return Err(SmtpError::InvalidSyntax(format!(
                "{} requires domain argument",
                parts[0].to_uppercase()
            )));
        }

        let client_domain = parts[1];
        if client_domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        conversation.reset(); // Clear any existing transaction
        conversation.client_domain = Some(client_domain.to_string());

        if extended {
            Ok(SmtpResponse::ehlo(self.hostname, client_domain))
        } else {
            Ok(SmtpResponse::helo(self.hostname, client_domain))
        }
    }

    /// Handle MAIL command
    fn handle_mail(
        &self,
        parts: &[&str],
        conversation: &mut Conversation,
    ) -> Result<SmtpResponse, SmtpError> {
        if conversation.client_domain.is_none() {
            return Err(SmtpError::InvalidState(
                "MAIL command requires HELO first".to_string(),
            ));
        }
        if !conversation.can_execute_command("MAIL") {
            return Err(SmtpError::InvalidState("Nested MAIL command".to_string()));
        }

        let addr = parse_path(parts, "FROM:")?;
        conversation.session.on_sender(addr);

        Ok(SmtpResponse::ok())
    }

    /// Handle RCPT command
    fn handle_rcpt(
        &self,
        parts: &[&str],
        conversation: &mut Conversation,
    ) -> Result<SmtpResponse, SmtpError> {
        if !conversation.can_execute_command("RCPT") {
            return Err(SmtpError::InvalidState(
                "RCPT command requires MAIL first".to_string(),
            ));
        }

        let addr = parse_path(parts, "TO:")?;
        if addr.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "TO address cannot be empty".to_string(),
            ));
        }

        if conversation.recipient_count >= SmtpLimits::MAX_RECIPIENTS {
            return Err(SmtpError::TooManyRecipients {
                max: SmtpLimits::MAX_RECIPIENTS,
            });
        }

        conversation.session.on_recipient(addr);
        conversation.recipient_count += 1;

        Ok(SmtpResponse::ok())
    }

    /// Handle DATA command
    fn handle_data(
        &self,
        parts: &[&str],
        conversation: &mut Conversation,
    ) -> Result<SmtpResponse, SmtpError> {
        if !conversation.can_execute_command("DATA") {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        if parts.len() > 1 {
            return Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            ));
        }

        Ok(SmtpResponse::data_start())
    }

    /// Handle RSET command
    fn handle_rset(&self, conversation: &mut Conversation) -> Result<SmtpResponse, SmtpError> {
        conversation.reset();
        Ok(SmtpResponse::ok())
    }
}

/// Extract the address from `FROM:<addr> [params]` or `TO:<addr> [params]`.
///
/// Parameters after the path are accepted and ignored. The address itself
/// is returned as given, without further validation.
fn parse_path<'l>(parts: &[&'l str], keyword: &str) -> Result<&'l str, SmtpError> {
    let usage = || {
        SmtpError::InvalidSyntax(format!(
            "Expected '{keyword}<address>' after {}",
            parts[0].to_uppercase()
        ))
    };

    let first: &'l str = parts.get(1).copied().ok_or_else(usage)?;
    if !first
        .get(..keyword.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
    {
        return Err(usage());
    }

    // Allow a space between the keyword and the path: "FROM: <a@b>"
    let path = match &first[keyword.len()..] {
        "" => parts.get(2).copied().ok_or_else(usage)?,
        rest => rest,
    };

    let addr = path
        .strip_prefix('<')
        .and_then(|p| p.strip_suffix('>'))
        .ok_or_else(|| {
            SmtpError::InvalidSyntax("Address must be enclosed in angle brackets".to_string())
        })?;

    if addr.len() > SmtpLimits::PATH_MAX_LENGTH {
        return Err(SmtpError::PathTooLong {
            max: SmtpLimits::PATH_MAX_LENGTH,
        });
    }

    Ok(addr)
}

/// Reads SMTP message data up to the terminating `.` line.
///
/// Yields the raw bytes with line endings intact and leading dots unstuffed.
/// Reaching the end of the underlying stream before the terminator is an
/// [`io::ErrorKind::UnexpectedEof`] error.
///
/// Lines are buffered at most [`SmtpLimits::DATA_CHUNK_LENGTH`] bytes at a
/// time, so one endless line cannot grow memory past that.
pub struct DataReader<'r, R: BufRead> {
    inner: &'r mut R,
    line: Vec<u8>,
    pos: usize,
    done: bool,
    /// Whether the next chunk begins a new line
    at_line_start: bool,
}

impl<'r, R: BufRead> DataReader<'r, R> {
    pub fn new(inner: &'r mut R) -> Self {
        Self {
            inner,
            line: Vec::new(),
            pos: 0,
            done: false,
            at_line_start: true,
        }
    }

    /// Whether the terminating line has been consumed
    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Consume and discard whatever is left of the data
    pub fn drain(&mut self) -> io::Result<()> {
        io::copy(self, &mut io::sink())?;
        Ok(())
    }

    fn next_line(&mut self) -> io::Result<()> {
        self.line.clear();
        self.pos = 0;

        let limit = SmtpLimits::DATA_CHUNK_LENGTH as u64;
        if (&mut *self.inner).take(limit).read_until(b'\n', &mut self.line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during DATA",
            ));
        }

        // Continuation of a long line: no terminator or stuffing to check
        let starts_line = self.at_line_start;
        self.at_line_start = self.line.last() == Some(&b'\n');
        if !starts_line {
            return Ok(());
        }

        if self.line == b".\r\n" || self.line == b".\n" {
            self.line.clear();
            self.done = true;
        } else if self.line.first() == Some(&b'.') {
            self.pos = 1;
        }
        Ok(())
    }
}

impl<R: BufRead> Read for DataReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.line.len() {
            if self.done {
                return Ok(0);
            }
            self.next_line()?;
        }

        let available = &self.line[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}
