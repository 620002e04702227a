use super::event::ParsedEvent;
use crate::error::{OverseerError, Result};
use crate::resource::Amount;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::{info, warn};

/// Notification emitted by an `alert` rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub action: String,
    pub rule: String,
    pub date: String,
    pub service: String,
    pub description: String,
    pub value: String,
    pub message_id: u64,
}

/// Bound on connecting to the alert socket and writing one message
pub const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers alerts as JSON lines to a listening Unix socket
pub struct AlertChannel {
    socket: Option<PathBuf>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl AlertChannel {
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self {
            socket,
            timeout: ALERT_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the message for a triggered event; ids increase monotonically
    pub fn compose(&self, event: &ParsedEvent, value: Amount) -> AlertMessage {
        AlertMessage {
            action: event.action.to_string(),
            rule: event.rule.clone(),
            date: Local::now().to_rfc3339(),
            service: event.process.clone(),
            description: event
                .description
                .clone()
                .unwrap_or_else(|| format!("{} matched '{}'", event.process, event.rule)),
            value: value.to_string(),
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }

    pub async fn send(&self, event: &ParsedEvent, value: Amount) -> Result<AlertMessage> {
        let message = self.compose(event, value);

        let Some(ref path) = self.socket else {
            info!(
                "Alert #{} for {}: {} (value {})",
                message.message_id, message.service, message.description, message.value
            );
            return Ok(message);
        };

        let mut line = serde_json::to_vec(&message)
            .map_err(|e| OverseerError::SerializationError(e.to_string()))?;
        line.push(b'\n');

        // A listener that stops reading must not stall the event monitor
        tokio::time::timeout(self.timeout, deliver(path, &line))
            .await
            .map_err(|_| {
                warn!(
                    "Alert socket {} did not accept alert #{} within {:?}",
                    path.display(),
                    message.message_id,
                    self.timeout
                );
                OverseerError::AlertError(format!("timed out writing to {}", path.display()))
            })??;

        info!(
            "Delivered alert #{} for {} to {}",
            message.message_id,
            message.service,
            path.display()
        );
        Ok(message)
    }
}

async fn deliver(path: &Path, line: &[u8]) -> Result<()> {
    let mut stream = UnixStream::connect(path).await.map_err(|e| {
        warn!("Alert socket {} unreachable: {}", path.display(), e);
        OverseerError::AlertError(format!("connect {}: {}", path.display(), e))
    })?;
    stream
        .write_all(line)
        .await
        .map_err(|e| OverseerError::AlertError(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| OverseerError::AlertError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventConfig;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::UnixListener;

    fn alert_event() -> ParsedEvent {
        let config = EventConfig {
            process: Some("db".to_string()),
            rule: "memory_used > 1mb".to_string(),
            duration_secs: None,
            interval_secs: Some(0),
            action: "alert".to_string(),
            description: Some("db is leaking".to_string()),
        };
        ParsedEvent::compile("backend", "db", &config).unwrap()
    }

    #[test]
    fn test_message_ids_increase() {
        let channel = AlertChannel::new(None);
        let event = alert_event();

        let first = channel.compose(&event, Amount::Integer(1));
        let second = channel.compose(&event, Amount::Integer(2));

        assert!(second.message_id > first.message_id);
        assert_eq!(first.service, "db");
        assert_eq!(first.action, "alert");
        assert_eq!(first.description, "db is leaking");
    }

    #[tokio::test]
    async fn test_log_only_without_socket() {
        let channel = AlertChannel::new(None);
        let message = channel
            .send(&alert_event(), Amount::Integer(2_000_000))
            .await
            .unwrap();
        assert_eq!(message.value, "2000000");
    }

    #[tokio::test]
    async fn test_delivers_json_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("alerts.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let receiver = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await.unwrap();
            line
        });

        let channel = AlertChannel::new(Some(path));
        let sent = channel
            .send(&alert_event(), Amount::Integer(4096))
            .await
            .unwrap();

        let line = receiver.await.unwrap();
        let received: AlertMessage = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(received, sent);
        assert_eq!(received.rule, "memory_used > 1mb");
    }

    #[tokio::test]
    async fn test_unreachable_socket() {
        let temp_dir = TempDir::new().unwrap();
        let channel = AlertChannel::new(Some(temp_dir.path().join("missing.sock")));

        let result = channel.send(&alert_event(), Amount::Integer(1)).await;
        assert!(matches!(result, Err(OverseerError::AlertError(_))));
    }

    #[tokio::test]
    async fn test_stalled_listener_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("alerts.sock");
        // Bound but never accepted or read, so a large write cannot complete
        let _listener = UnixListener::bind(&path).unwrap();

        let mut event = alert_event();
        event.description = Some("x".repeat(8 * 1024 * 1024));
        let channel = AlertChannel::new(Some(path)).with_timeout(Duration::from_millis(200));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            channel.send(&event, Amount::Integer(1)),
        )
        .await
        .expect("send was not bounded by its timeout");
        assert!(matches!(result, Err(OverseerError::AlertError(_))));
    }
}
