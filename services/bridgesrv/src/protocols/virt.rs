//! Virtual device link
//!
//! In-memory address table standing in for a controller. Reachability and
//! values are changed through a [`VirtualHandle`] shared with the link, so a
//! running pipeline can be driven from outside.

use crate::core::link::DeviceLink;
use crate::core::types::{Value, VariableKind};
use crate::error::LinkError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Device {
    reachable: bool,
    values: HashMap<String, Value>,
}

/// Shared view of a virtual device
#[derive(Debug, Clone)]
pub struct VirtualHandle {
    device: Arc<RwLock<Device>>,
}

impl VirtualHandle {
    pub fn set_reachable(&self, reachable: bool) {
        self.device.write().reachable = reachable;
        info!("Virtual device reachable={}", reachable);
    }

    pub fn is_reachable(&self) -> bool {
        self.device.read().reachable
    }

    pub fn set(&self, address: impl Into<String>, value: Value) {
        self.device.write().values.insert(address.into(), value);
    }

    pub fn get(&self, address: &str) -> Option<Value> {
        self.device.read().values.get(address).cloned()
    }
}

pub struct VirtualLink {
    endpoint: String,
    device: Arc<RwLock<Device>>,
    connected: bool,
}

impl std::fmt::Debug for VirtualLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualLink")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.connected)
            .finish()
    }
}

impl VirtualLink {
    /// Reachable device seeded with `initial`
    pub fn new(endpoint: impl Into<String>, initial: impl IntoIterator<Item = (String, Value)>) -> Self {
        let device = Device {
            reachable: true,
            values: initial.into_iter().collect(),
        };
        Self {
            endpoint: endpoint.into(),
            device: Arc::new(RwLock::new(device)),
            connected: false,
        }
    }

    pub fn handle(&self) -> VirtualHandle {
        VirtualHandle {
            device: self.device.clone(),
        }
    }

    fn ensure_reachable(&self) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if !self.device.read().reachable {
            return Err(LinkError::Io(format!("{} unreachable", self.endpoint)));
        }
        Ok(())
    }
}

/// Value an unset address reads as
fn zero(kind: VariableKind) -> Value {
    match kind {
        VariableKind::Bit => Value::Bool(false),
        VariableKind::Real => Value::Float(0.0),
        VariableKind::String => Value::Text(String::new()),
        VariableKind::Word | VariableKind::DWord | VariableKind::Counter | VariableKind::Timer => {
            Value::Int(0)
        },
    }
}

#[async_trait]
impl DeviceLink for VirtualLink {
    fn endpoint(&self) -> String {
        format!("virtual://{}", self.endpoint)
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        if !self.device.read().reachable {
            return Err(LinkError::Connect {
                endpoint: self.endpoint(),
                reason: "device unreachable".to_string(),
            });
        }
        self.connected = true;
        debug!("Virtual link {} connected", self.endpoint);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.connected = false;
        debug!("Virtual link {} disconnected", self.endpoint);
        Ok(())
    }

    async fn read(
        &mut self,
        address: &str,
        kind: VariableKind,
        _count: u16,
    ) -> Result<Value, LinkError> {
        self.ensure_reachable()?;
        Ok(self
            .device
            .read()
            .values
            .get(address)
            .cloned()
            .unwrap_or_else(|| zero(kind)))
    }

    async fn write(
        &mut self,
        address: &str,
        value: &Value,
        kind: VariableKind,
    ) -> Result<(), LinkError> {
        self.ensure_reachable()?;
        if kind == VariableKind::Bit && !matches!(value, Value::Bool(_) | Value::Int(0 | 1)) {
            return Err(LinkError::write(address, format!("{} is not a bit", value)));
        }
        self.device
            .write()
            .values
            .insert(address.to_string(), value.clone());
        Ok(())
    }
}
