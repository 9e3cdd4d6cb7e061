//! Core data model, capabilities and configuration

pub mod config;
pub mod link;
pub mod publisher;
pub mod types;

pub use link::DeviceLink;
pub use publisher::TelemetryPublisher;
pub use types::{
    now_timestamp, BufferedRecord, Category, MachineStatus, Telemetry, Value, Variable,
    VariableGroup, VariableKind,
};
