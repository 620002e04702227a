// IPC Server - Listens for client connections and handles requests

use crate::error::{OverseerError, Result};
use crate::ipc::{Command, Request, Response};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Default socket path for daemon communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/overseer.sock";

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    /// Create a new IPC server with the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(DEFAULT_SOCKET_PATH)
    }

    /// Create a new IPC server with a custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            listener: None,
        }
    }

    /// Bind to the Unix socket, replacing a stale socket file
    pub fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                OverseerError::IpcError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| OverseerError::IpcError(format!("Failed to bind to socket: {}", e)))?;

        // Only the owner may talk to the daemon
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
                OverseerError::IpcError(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        self.listener = Some(listener);
        Ok(())
    }

    /// Accept connections until shutdown, one task per connection
    pub async fn run<F, Fut>(&self, handler: F, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send,
    {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| OverseerError::IpcError("Server not started".to_string()))?;
        let handler = Arc::new(handler);

        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::serve(stream, handler.as_ref()).await {
                    warn!("IPC connection failed: {}", e);
                }
            });
        }

        debug!("IPC server stopped accepting connections");
        Ok(())
    }

    /// Answer the single request carried by a connection
    async fn serve<F, Fut>(stream: UnixStream, handler: &F) -> Result<()>
    where
        F: Fn(Command) -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        let (read_half, mut write_half) = stream.into_split();

        let mut request_line = String::new();
        BufReader::new(read_half)
            .read_line(&mut request_line)
            .await
            .map_err(|e| OverseerError::IpcError(format!("Failed to read request: {}", e)))?;

        let request: Request = serde_json::from_str(&request_line).map_err(|e| {
            OverseerError::DeserializationError(format!("Failed to deserialize request: {}", e))
        })?;
        debug!("IPC request {}: {:?}", request.id, request.command);

        // The response always carries the request's id
        let response = match handler(request.command).await {
            Ok(resp) => Response {
                id: request.id,
                result: resp.result,
            },
            Err(e) => Response::error(request.id, e.to_string()),
        };

        let mut response_json = serde_json::to_string(&response).map_err(|e| {
            OverseerError::SerializationError(format!("Failed to serialize response: {}", e))
        })?;
        response_json.push('\n');

        write_half
            .write_all(response_json.as_bytes())
            .await
            .map_err(|e| OverseerError::IpcError(format!("Failed to write response: {}", e)))?;
        write_half
            .flush()
            .await
            .map_err(|e| OverseerError::IpcError(format!("Failed to flush stream: {}", e)))?;

        Ok(())
    }

    /// Stop the server and clean up the socket file
    pub fn stop(&mut self) -> Result<()> {
        self.listener = None;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                OverseerError::IpcError(format!("Failed to remove socket file: {}", e))
            })?;
        }

        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for IpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Action;
    use crate::ipc::{IpcClient, ResponseData};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_server_with_custom_path() {
        let server = IpcServer::with_socket_path("/tmp/custom_overseer.sock");
        assert_eq!(server.socket_path(), Path::new("/tmp/custom_overseer.sock"));
        assert_eq!(IpcServer::new().socket_path(), Path::new(DEFAULT_SOCKET_PATH));
    }

    #[tokio::test]
    async fn test_server_start_stop() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("start_stop.sock");
        let mut server = IpcServer::with_socket_path(&socket_path);

        server.start().unwrap();
        assert!(socket_path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        server.stop().unwrap();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_cleanup_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("drop.sock");
        {
            let mut server = IpcServer::with_socket_path(&socket_path);
            server.start().unwrap();
            assert!(socket_path.exists());
        }
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_run_without_start() {
        let server = IpcServer::with_socket_path("/tmp/never_started.sock");
        let (_tx, rx) = watch::channel(false);
        let result = server
            .run(|_| async { Ok(Response::success(0, ResponseData::Success("ok".into()))) }, rx)
            .await;
        assert!(matches!(result, Err(OverseerError::IpcError(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_request_response_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("roundtrip.sock");
        let mut server = IpcServer::with_socket_path(&socket_path);
        server.start().unwrap();

        let (tx, rx) = watch::channel(false);
        let server_task = tokio::spawn(async move {
            server
                .run(
                    |command| async move {
                        match command {
                            Command::Control { action, target } => Ok(Response::success(
                                0,
                                ResponseData::Success(format!("{} {}", action, target)),
                            )),
                            _ => Err(OverseerError::Other("unexpected".to_string())),
                        }
                    },
                    rx,
                )
                .await
        });

        let client_path = socket_path.clone();
        let response = tokio::task::spawn_blocking(move || {
            IpcClient::with_socket_path(client_path).send_command(Command::Control {
                action: Action::Restart,
                target: "web".to_string(),
            })
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(
            response.result,
            Ok(ResponseData::Success("restart web".to_string()))
        );

        let client_path = socket_path.clone();
        let response = tokio::task::spawn_blocking(move || {
            IpcClient::with_socket_path(client_path).send_command(Command::Status { target: None })
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.result, Err("unexpected".to_string()));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), server_task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}
