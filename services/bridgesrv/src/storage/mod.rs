//! Local persistence: offline buffer, process log and uplink routing

pub mod offline_buffer;
pub mod process_log;
pub mod uplink;

pub use offline_buffer::OfflineBuffer;
pub use process_log::{ProcessLog, PROCESS_LOG_HEADER};
pub use uplink::{Delivery, Uplink};
