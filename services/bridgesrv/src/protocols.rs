//! Built-in device links and publishers
//!
//! Vendor drivers (SLMP/MC, FINS, OPC-UA, EtherNet/IP, S7) and the MQTT
//! transport plug in through `DeviceLink` / `TelemetryPublisher`; the
//! factories below know the built-in ones.

pub mod log_publisher;
pub mod virt;

pub use log_publisher::LogPublisher;
pub use virt::{VirtualHandle, VirtualLink};

use crate::core::config::app::PublisherConfig;
use crate::core::config::{AppConfig, DeviceConfig};
use crate::core::link::DeviceLink;
use crate::error::ConfigurationError;

/// Create the link for a configured device
pub fn create_link(device: &DeviceConfig) -> Result<Box<dyn DeviceLink>, ConfigurationError> {
    match device.protocol.to_ascii_lowercase().as_str() {
        "virtual" | "virt" => Ok(Box::new(VirtualLink::new(
            device.endpoint.clone(),
            device.initial.clone(),
        ))),
        other => Err(ConfigurationError::invalid(
            format!("devices.{}.protocol", device.name),
            format!("no driver for protocol '{}'", other),
        )),
    }
}

/// Create the configured publisher; paths resolve against the config directory
pub fn create_publisher(
    config: &AppConfig,
    publisher: &PublisherConfig,
) -> Result<LogPublisher, ConfigurationError> {
    match publisher.kind.to_ascii_lowercase().as_str() {
        "log" => Ok(LogPublisher::new(
            publisher.outbox.as_deref().map(|p| config.resolve(p)),
        )),
        other => Err(ConfigurationError::invalid(
            "publisher.kind",
            format!("unsupported publisher '{}'", other),
        )),
    }
}
