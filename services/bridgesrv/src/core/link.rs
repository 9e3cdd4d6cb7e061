//! Device link capability
//!
//! Implemented by protocol drivers (SLMP/MC, FINS, OPC-UA, EtherNet/IP, S7 ...).
//! A link is driven by exactly one `ConnectionSupervisor`, which serializes
//! access and bounds every call with its I/O timeout.

use crate::core::types::{Value, VariableKind};
use crate::error::LinkError;
use async_trait::async_trait;

#[async_trait]
pub trait DeviceLink: Send {
    /// Endpoint description for logs (`192.168.3.39:5007`, `opc.tcp://...`)
    fn endpoint(&self) -> String;

    async fn connect(&mut self) -> Result<(), LinkError>;

    async fn disconnect(&mut self) -> Result<(), LinkError>;

    async fn read(
        &mut self,
        address: &str,
        kind: VariableKind,
        count: u16,
    ) -> Result<Value, LinkError>;

    async fn write(
        &mut self,
        address: &str,
        value: &Value,
        kind: VariableKind,
    ) -> Result<(), LinkError>;
}
