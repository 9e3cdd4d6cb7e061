//! Telemetry publisher writing to the log
//!
//! Every sample is logged at info level under the `telemetry` target and,
//! when an outbox path is set, appended to that file as one JSON object per
//! line. Reachability is a plain flag so uplink loss can be simulated.

use crate::core::publisher::TelemetryPublisher;
use crate::core::types::{BufferedRecord, Value};
use crate::error::PublishError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tracing::info;

#[derive(Serialize)]
struct OutboxLine<'a> {
    topic: &'a str,
    #[serde(flatten)]
    record: BufferedRecord,
}

#[derive(Debug)]
pub struct LogPublisher {
    outbox: Option<PathBuf>,
    write_lock: Mutex<()>,
    connected: watch::Sender<bool>,
}

impl LogPublisher {
    pub fn new(outbox: Option<PathBuf>) -> Self {
        let (connected, _) = watch::channel(true);
        Self {
            outbox,
            write_lock: Mutex::new(()),
            connected,
        }
    }

    pub fn outbox(&self) -> Option<&Path> {
        self.outbox.as_deref()
    }

    /// Flip reachability; each change is one connect/disconnect edge
    pub fn set_connected(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    async fn append(&self, line: &str) -> Result<(), PublishError> {
        let Some(path) = &self.outbox else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PublishError::Io(e.to_string()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| PublishError::Io(e.to_string()))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| PublishError::Io(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| PublishError::Io(e.to_string()))
    }

    fn ensure_connected(&self) -> Result<(), PublishError> {
        if *self.connected.borrow() {
            Ok(())
        } else {
            Err(PublishError::Disconnected)
        }
    }
}

#[async_trait]
impl TelemetryPublisher for LogPublisher {
    async fn publish_to(
        &self,
        topic: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), PublishError> {
        self.ensure_connected()?;
        let line = serde_json::to_string(&OutboxLine {
            topic,
            record: BufferedRecord::new(name, value.clone()),
        })
        .map_err(|e| PublishError::Rejected(e.to_string()))?;
        info!(target: "telemetry", "{}/{} = {}", topic, name, value);
        self.append(&line).await
    }

    async fn publish_raw(&self, name: &str, payload: &str) -> Result<(), PublishError> {
        self.ensure_connected()?;
        info!(target: "telemetry", "{} (replayed) {}", name, payload);
        self.append(payload).await
    }

    fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}
