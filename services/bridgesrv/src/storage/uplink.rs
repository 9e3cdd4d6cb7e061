//! Routing of detected changes to the publisher or the offline buffer

use crate::core::publisher::TelemetryPublisher;
use crate::core::types::{BufferedRecord, Telemetry};
use crate::error::Result;
use crate::storage::offline_buffer::OfflineBuffer;
use crate::storage::process_log::ProcessLog;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where a sample ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Published,
    Buffered,
    /// Neither published nor buffered (buffer I/O failed)
    Lost,
}

pub struct Uplink {
    publisher: Arc<dyn TelemetryPublisher>,
    buffer: Arc<OfflineBuffer>,
    process_log: Option<ProcessLog>,
}

impl std::fmt::Debug for Uplink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uplink")
            .field("buffer", &self.buffer.path())
            .field("process_log", &self.process_log.as_ref().map(ProcessLog::path))
            .field("connected", &self.publisher.is_connected())
            .finish()
    }
}

impl Uplink {
    pub fn new(
        publisher: Arc<dyn TelemetryPublisher>,
        buffer: Arc<OfflineBuffer>,
        process_log: Option<ProcessLog>,
    ) -> Self {
        Self {
            publisher,
            buffer,
            process_log,
        }
    }

    pub fn publisher(&self) -> &Arc<dyn TelemetryPublisher> {
        &self.publisher
    }

    pub fn buffer(&self) -> &Arc<OfflineBuffer> {
        &self.buffer
    }

    /// Publish when the uplink is up, buffer otherwise or on publish failure
    pub async fn send(&self, telemetry: &Telemetry) -> Delivery {
        let connected = self.publisher.is_connected();

        if let Some(log) = &self.process_log {
            if let Err(e) = log.record(telemetry, connected).await {
                warn!("Process log write failed: {}", e);
            }
        }

        if connected {
            let (topic, metric) = telemetry.route();
            match self.publisher.publish_to(topic, metric, &telemetry.value).await {
                Ok(()) => {
                    debug!(
                        "Published {}/{} = {} [{}]",
                        topic, metric, telemetry.value, telemetry.category
                    );
                    return Delivery::Published;
                },
                Err(e) => warn!("Publish {} failed: {}, buffering", telemetry.name, e),
            }
        }

        self.store(BufferedRecord::new(&telemetry.name, telemetry.value.clone()))
            .await
    }

    /// Buffer without trying the publisher
    pub async fn store(&self, record: BufferedRecord) -> Delivery {
        match self.buffer.append(&record).await {
            Ok(()) => {
                info!("Uplink down -> buffered {} = {}", record.name, record.value);
                Delivery::Buffered
            },
            Err(e) => {
                error!("Failed to buffer {}: {}", record.name, e);
                Delivery::Lost
            },
        }
    }

    /// Replay buffered records in order
    ///
    /// Stops at the first failed publish and restores that record and the rest
    /// to the head of the buffer. Returns the number of records published.
    pub async fn replay(&self) -> Result<usize> {
        let records = self.buffer.drain_and_clear().await?;
        if records.is_empty() {
            return Ok(0);
        }

        for (index, record) in records.iter().enumerate() {
            let payload = serde_json::to_string(record)?;
            if let Err(e) = self.publisher.publish_raw(&record.name, &payload).await {
                warn!(
                    "Replay interrupted after {}/{} records: {}",
                    index,
                    records.len(),
                    e
                );
                self.buffer.restore(&records[index..]).await?;
                return Ok(index);
            }
        }

        info!("Replayed {} buffered records", records.len());
        Ok(records.len())
    }
}
