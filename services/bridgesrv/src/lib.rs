//! PLC Bridge Service (bridgesrv)
//!
//! Polls process variables from industrial controllers, derives a machine
//! status from raw bits and publishes changes to a telemetry uplink, buffering
//! everything produced while the uplink is away.
//!
//! # Architecture
//!
//! - **`core`**: data model, `DeviceLink` / `TelemetryPublisher` capabilities, configuration
//! - **`runtime`**: connection supervision, pause gate, group and status polling, pipeline
//! - **`storage`**: offline buffer, process log and uplink routing
//! - **`protocols`**: built-in virtual device and log publisher
//!
//! ```text
//! ┌──────────────┐    ┌─────────────────┐    ┌──────────────┐
//! │  DeviceLink  │───►│ PollingScheduler│───►│    Uplink    │──► TelemetryPublisher
//! │ (supervised) │    │  StatusPoller   │    │              │
//! └──────────────┘    └─────────────────┘    └──────┬───────┘
//!                                                   ▼
//!                                            ┌──────────────┐
//!                                            │OfflineBuffer │
//!                                            └──────────────┘
//! ```
//!
//! # Command Line Usage
//!
//! ```bash
//! bridgesrv --config config/bridgesrv.yaml
//! bridgesrv --config config/bridgesrv.yaml --validate
//! BRIDGESRV_BUFFER__PATH=/var/lib/bridge/buffer.jsonl bridgesrv -c bridge.yaml
//! ```

pub mod core;
pub mod error;
pub mod protocols;
pub mod runtime;
pub mod storage;
pub mod test_utils;

pub use crate::core::config::AppConfig;
pub use crate::core::types::{MachineStatus, Value, Variable, VariableGroup, VariableKind};
pub use crate::error::{BridgeSrvError, Result};
pub use crate::runtime::{ConnectionSupervisor, Pipeline, PipelineHandle, PollingScheduler};
pub use crate::storage::{OfflineBuffer, Uplink};
