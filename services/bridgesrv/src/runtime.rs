//! Runtime orchestration
//!
//! Connection supervision, the shared pause gate, group and status polling,
//! and the pipeline that wires them to the uplink.

pub mod gate;
pub mod pipeline;
pub mod scheduler;
pub mod status;
pub mod supervisor;

pub use gate::PauseGate;
pub use pipeline::{LinkEvent, Pipeline, PipelineHandle};
pub use scheduler::{CycleReport, GroupPoller, PollingScheduler};
pub use status::{StatusBoard, StatusPoller};
pub use supervisor::{
    ConnectionSupervisor, LinkObserver, LinkState, Liveness, SupervisorPolicy, SupervisorStats,
};
