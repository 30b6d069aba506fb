//! SMTP listener lifecycle

use crate::smtp::commands::{Conversation, DataReader, SmtpCommandHandler};
use crate::smtp::error::{ServiceError, SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::CaptureBackend;

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often the accept loop checks for a stop request
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// TCP port to listen on (0 picks a free port)
    pub port: u16,
    /// Interface address to bind
    pub bind_address: String,
    /// Domain announced in the greeting and HELO replies
    pub hostname: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 2525,
            bind_address: "0.0.0.0".to_string(),
            hostname: "localhost".to_string(),
        }
    }
}

impl ServiceConfig {
    /// `bind_address:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// SMTP service that captures every message into the backend's store.
///
/// Start and stop may be called any number of times. Stopping is abrupt:
/// open connections are shut down without waiting for them to finish.
pub struct SmtpService {
    config: ServiceConfig,
    backend: CaptureBackend,
    running: Mutex<Option<RunningServer>>,
}

/// Handles owned while the accept loop is alive
struct RunningServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    connections: Arc<ConnectionRegistry>,
    accept_thread: JoinHandle<()>,
}

/// Open client sockets, so a stop can cut them off
#[derive(Default)]
struct ConnectionRegistry {
    next_id: AtomicU64,
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    /// Set by `close_all`; later registrations are refused
    closed: bool,
    streams: HashMap<u64, TcpStream>,
}

impl ConnectionRegistry {
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `stream`. Returns `None`, with the stream already shut down,
    /// once the registry has been closed.
    fn register(&self, stream: &TcpStream) -> io::Result<Option<u64>> {
        let clone = stream.try_clone()?;
        let mut state = self.state();
        if state.closed {
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(None);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.streams.insert(id, clone);
        Ok(Some(id))
    }

    fn deregister(&self, id: u64) {
        self.state().streams.remove(&id);
    }

    /// Shut down every tracked stream and refuse new ones
    fn close_all(&self) -> usize {
        let streams: Vec<TcpStream> = {
            let mut state = self.state();
            state.closed = true;
            state.streams.drain().map(|(_, s)| s).collect()
        };
        for stream in &streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
        streams.len()
    }

    fn len(&self) -> usize {
        self.state().streams.len()
    }
}

impl SmtpService {
    /// Create a stopped service
    pub fn new(config: ServiceConfig, backend: CaptureBackend) -> Self {
        Self {
            config,
            backend,
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningServer>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the listener and start accepting connections in the background.
    ///
    /// Does nothing if the service is already running. A bind failure leaves
    /// the service stopped.
    pub fn start(&self) -> Result<(), ServiceError> {
        let mut running = self.running();
        if running.is_some() {
            return Ok(());
        }

        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).map_err(|source| ServiceError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(ConnectionRegistry::default());
        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            let connections = Arc::clone(&connections);
            let backend = self.backend.clone();
            let hostname: Arc<str> = Arc::from(self.config.hostname.as_str());
            thread::Builder::new()
                .name("smtp-accept".to_string())
                .spawn(move || accept_loop(listener, shutdown, connections, backend, hostname))?
        };

        tracing::info!(addr = %local_addr, "SMTP server listening");
        *running = Some(RunningServer {
            local_addr,
            shutdown,
            connections,
            accept_thread,
        });
        Ok(())
    }

    /// Close the listener and drop every open connection. Does nothing if
    /// the service is not running.
    pub fn stop(&self) {
        let Some(server) = self.running().take() else {
            return;
        };

        server.shutdown.store(true, Ordering::Release);
        let dropped = server.connections.close_all();
        if server.accept_thread.join().is_err() {
            tracing::error!("SMTP accept thread panicked");
        }
        tracing::info!(addr = %server.local_addr, dropped, "SMTP server stopped");
    }

    /// Stop if running, start otherwise
    pub fn toggle(&self) -> Result<(), ServiceError> {
        if self.is_running() {
            self.stop();
            Ok(())
        } else {
            self.start()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// The configured port
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// The bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|server| server.local_addr)
    }

    /// Number of client connections currently open
    pub fn connection_count(&self) -> usize {
        self.running()
            .as_ref()
            .map_or(0, |server| server.connections.len())
    }
}

impl Drop for SmtpService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    connections: Arc<ConnectionRegistry>,
    backend: CaptureBackend,
    hostname: Arc<str>,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let connections = Arc::clone(&connections);
                let backend = backend.clone();
                let hostname = Arc::clone(&hostname);
                let spawned = thread::Builder::new()
                    .name(format!("smtp-{peer}"))
                    .spawn(move || serve_connection(stream, peer, &connections, &backend, &hostname));
                if let Err(e) = spawned {
                    tracing::error!(peer = %peer, error = %e, "Failed to spawn connection thread");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error accepting connection");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    connections: &ConnectionRegistry,
    backend: &CaptureBackend,
    hostname: &str,
) {
    let id = match configure_stream(&stream).and_then(|()| connections.register(&stream)) {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::debug!(peer = %peer, "Listener stopped, dropping connection");
            return;
        }
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Failed to set up connection");
            return;
        }
    };

    tracing::debug!(peer = %peer, "Client connected");
    let command_handler = SmtpCommandHandler::new(hostname);
    if let Err(e) = handle_client(stream, &command_handler, backend) {
        tracing::debug!(peer = %peer, error = %e, "Error handling client");
    }
    connections.deregister(id);
    tracing::debug!(peer = %peer, "Client disconnected");
}

fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(SmtpLimits::READ_TIMEOUT))?;
    stream.set_write_timeout(Some(SmtpLimits::WRITE_TIMEOUT))?;
    Ok(())
}

/// Handle a client connection
fn handle_client(
    mut stream: TcpStream,
    command_handler: &SmtpCommandHandler,
    backend: &CaptureBackend,
) -> Result<(), SmtpError> {
    let mut conversation = Conversation::new(backend.new_session());
    let mut reader = BufReader::new(stream.try_clone()?);

    // Send greeting
    send_response(
        &mut stream,
        &SmtpResponse::greeting(command_handler.hostname()),
    )?;

    let mut line_buffer = Vec::new();
    let result: Result<(), SmtpError> = loop {
        line_buffer.clear();

        match read_command_line(&mut reader, &mut line_buffer) {
            Ok(CommandLine::Closed) => break Ok(()),
            Ok(CommandLine::TooLong) => {
                let error = SmtpError::LineTooLong {
                    max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
                };
                send_response(&mut stream, &SmtpResponse::from_error(&error))?;
            }
            Ok(CommandLine::Complete) => {
                let line = String::from_utf8_lossy(&line_buffer);
                let command = line.trim();
                if command.is_empty() {
                    continue;
                }

                let response = match command_handler.process_command(command, &mut conversation) {
                    Ok(response) => response,
                    Err(e) => SmtpResponse::from_error(&e),
                };
                send_response(&mut stream, &response)?;

                match response.code {
                    221 => break Ok(()), // QUIT
                    354 => {
                        let response = receive_data(&mut reader, &mut conversation)?;
                        send_response(&mut stream, &response)?;
                    }
                    _ => {}
                }
            }
            Err(e) => break Err(e.into()),
        }
    };

    conversation.session.logout();
    result
}

/// Outcome of reading one command line
#[derive(Debug, PartialEq, Eq)]
enum CommandLine {
    Complete,
    /// The line was over the limit; it has been consumed and discarded
    TooLong,
    Closed,
}

/// Read one command line into `buf` without buffering more than the
/// command line limit (plus CRLF).
fn read_command_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<CommandLine> {
    let limit = SmtpLimits::COMMAND_LINE_MAX_LENGTH + 2;
    if (&mut *reader).take(limit as u64).read_until(b'\n', buf)? == 0 {
        return Ok(CommandLine::Closed);
    }
    if buf.ends_with(b"\n") || buf.len() < limit {
        return Ok(CommandLine::Complete);
    }

    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(CommandLine::Closed);
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(CommandLine::TooLong);
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Read the message data after a `354` and commit it.
///
/// Returns the reply for the client, or an error when the connection itself
/// failed and must be closed.
fn receive_data<R: BufRead>(
    reader: &mut R,
    conversation: &mut Conversation,
) -> Result<SmtpResponse, SmtpError> {
    let mut data = DataReader::new(reader);
    let result = conversation.session.on_data(&mut data);
    let drained = data.drain();
    conversation.reset();

    match result {
        Ok(message) => Ok(SmtpResponse::queued(&message.id)),
        Err(SmtpError::Io(e)) => Err(SmtpError::Io(e)),
        Err(e) => {
            drained?;
            tracing::warn!(error = %e, "Message rejected");
            Ok(SmtpResponse::from_error(&e))
        }
    }
}

/// Send a response to the client
fn send_response(stream: &mut TcpStream, response: &SmtpResponse) -> Result<(), SmtpError> {
    let formatted = if response.exceeds_line_limit() {
        SmtpResponse::new(response.code, "Response too long (truncated)").format()
    } else {
        response.format()
    };
    stream.write_all(formatted.as_bytes())?;
    stream.flush()?;
    Ok(())
}
