//! Telemetry publisher capability
//!
//! Implemented by the uplink transport (MQTT / Sparkplug B). The transport's
//! connect and disconnect callbacks are expressed as a `watch` channel of the
//! connection flag: every edge on that channel is one callback.

use crate::core::types::Value;
use crate::error::PublishError;
use async_trait::async_trait;
use tokio::sync::watch;

#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    /// Publish `value` as metric `name` on the topic named `topic`
    async fn publish_to(&self, topic: &str, name: &str, value: &Value)
        -> Result<(), PublishError>;

    /// Publish on the topic named after the metric
    async fn publish(&self, name: &str, value: &Value) -> Result<(), PublishError> {
        self.publish_to(name, name, value).await
    }

    /// Publish a pre-serialized payload (replayed buffer records)
    async fn publish_raw(&self, name: &str, payload: &str) -> Result<(), PublishError>;

    fn connection(&self) -> watch::Receiver<bool>;

    fn is_connected(&self) -> bool {
        *self.connection().borrow()
    }
}
