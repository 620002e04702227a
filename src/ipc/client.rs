// IPC Client - One request per connection to the daemon's control socket

use crate::control::Action;
use crate::error::{OverseerError, Result};
use crate::ipc::server::DEFAULT_SOCKET_PATH;
use crate::ipc::{ActionOutcome, Command, DaemonCommand, ProcessInfo, Request, Response, ResponseData};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bound on waiting for a reply; a restart may spend both the stop and
/// start timeouts of every process in its walk
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking client for the daemon's control socket.
///
/// Requests are never retried: a control action may already have run when a
/// reply is lost.
pub struct IpcClient {
    socket_path: PathBuf,
    reply_timeout: Duration,
    next_id: AtomicU64,
}

impl IpcClient {
    pub fn new() -> Self {
        Self::with_socket_path(DEFAULT_SOCKET_PATH)
    }

    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Apply `action` to a process, group or `all`; one outcome per process
    pub fn control(&self, action: Action, target: &str) -> Result<Vec<ActionOutcome>> {
        match self.request(Command::Control {
            action,
            target: target.to_string(),
        })? {
            ResponseData::ActionApplied { outcomes, .. } => Ok(outcomes),
            other => Err(unexpected("control", &other)),
        }
    }

    pub fn status(&self, target: Option<&str>) -> Result<Vec<ProcessInfo>> {
        match self.request(Command::Status {
            target: target.map(String::from),
        })? {
            ResponseData::Status(processes) => Ok(processes),
            other => Err(unexpected("status", &other)),
        }
    }

    /// Uptime of the running daemon
    pub fn daemon_uptime(&self) -> Result<Duration> {
        match self.request(Command::Daemon(DaemonCommand::Status))? {
            ResponseData::DaemonStatus { uptime, .. } => Ok(uptime),
            other => Err(unexpected("daemon status", &other)),
        }
    }

    pub fn shutdown_daemon(&self) -> Result<()> {
        self.request(Command::Daemon(DaemonCommand::Shutdown))
            .map(|_| ())
    }

    /// Send a command; a refusal by the daemon becomes `Rejected`
    pub fn request(&self, command: Command) -> Result<ResponseData> {
        self.send_command(command)?
            .result
            .map_err(OverseerError::Rejected)
    }

    /// Send a command and return the raw response
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let request = Request::new(self.next_id.fetch_add(1, Ordering::SeqCst), command);
        let response = self.exchange(&request)?;

        if response.id != request.id {
            return Err(OverseerError::ProtocolError(format!(
                "Response ID mismatch: expected {}, got {}",
                request.id, response.id
            )));
        }
        Ok(response)
    }

    fn exchange(&self, request: &Request) -> Result<Response> {
        let mut stream = self.connect()?;
        stream
            .set_read_timeout(Some(self.reply_timeout))
            .map_err(|e| OverseerError::IpcError(format!("Failed to set reply timeout: {}", e)))?;

        let mut line = serde_json::to_string(request).map_err(|e| {
            OverseerError::SerializationError(format!("Failed to serialize request: {}", e))
        })?;
        line.push('\n');
        stream
            .write_all(line.as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|e| OverseerError::IpcError(format!("Failed to send request: {}", e)))?;

        let mut reply = String::new();
        let read = BufReader::new(stream).read_line(&mut reply).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                OverseerError::IpcError(format!(
                    "No reply from daemon within {}s",
                    self.reply_timeout.as_secs()
                ))
            }
            _ => OverseerError::IpcError(format!("Failed to read response: {}", e)),
        })?;
        if read == 0 {
            return Err(OverseerError::ProtocolError(
                "Daemon closed the connection without replying".to_string(),
            ));
        }

        serde_json::from_str(&reply).map_err(|e| {
            OverseerError::DeserializationError(format!("Failed to deserialize response: {}", e))
        })
    }

    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(OverseerError::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                OverseerError::DaemonNotRunning
            }
            _ => OverseerError::ConnectionError(e.to_string()),
        })
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

fn unexpected(request: &str, data: &ResponseData) -> OverseerError {
    OverseerError::ProtocolError(format!("Unexpected reply to {}: {:?}", request, data))
}
