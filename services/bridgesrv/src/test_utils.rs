//! Test utilities for bridgesrv
//!
//! Scripted device link, recording publisher and helpers shared by the unit
//! and integration tests. Nothing here touches the network.

use crate::core::link::DeviceLink;
use crate::core::publisher::TelemetryPublisher;
use crate::core::types::{Value, VariableKind};
use crate::error::{LinkError, PublishError};
use crate::runtime::supervisor::{LinkObserver, SupervisorPolicy};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ==================== Scripted device link ====================

#[derive(Debug, Default)]
struct Script {
    connect_results: VecDeque<Result<(), LinkError>>,
    values: HashMap<String, Value>,
    queued: HashMap<String, VecDeque<Value>>,
    failing: HashSet<String>,
    fail_all: bool,
    read_delay: Option<Duration>,
    connects: usize,
    disconnects: usize,
    reads: HashMap<String, usize>,
    writes: Vec<(String, Value)>,
}

/// Handle for steering a [`ScriptedLink`] after it was boxed
#[derive(Debug, Clone, Default)]
pub struct LinkScript {
    inner: Arc<Mutex<Script>>,
}

impl LinkScript {
    /// Result of the next connect; connects succeed once the queue is empty
    pub fn push_connect(&self, result: Result<(), LinkError>) {
        self.inner.lock().connect_results.push_back(result);
    }

    /// Value returned for `address` whenever nothing is queued
    pub fn set_value(&self, address: &str, value: Value) {
        self.inner.lock().values.insert(address.to_string(), value);
    }

    /// Values returned once each, before the sticky value
    pub fn queue_values(&self, address: &str, values: Vec<Value>) {
        self.inner
            .lock()
            .queued
            .entry(address.to_string())
            .or_default()
            .extend(values);
    }

    pub fn fail_address(&self, address: &str, fail: bool) {
        let mut script = self.inner.lock();
        if fail {
            script.failing.insert(address.to_string());
        } else {
            script.failing.remove(address);
        }
    }

    /// Device unreachable: every connect and read fails
    pub fn fail_all(&self, fail: bool) {
        self.inner.lock().fail_all = fail;
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.inner.lock().read_delay = Some(delay);
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.inner.lock().disconnects
    }

    pub fn reads(&self, address: &str) -> usize {
        self.inner.lock().reads.get(address).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<(String, Value)> {
        self.inner.lock().writes.clone()
    }
}

/// `DeviceLink` answering from a script
#[derive(Debug, Default)]
pub struct ScriptedLink {
    script: LinkScript,
    connected: bool,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> LinkScript {
        self.script.clone()
    }
}

#[async_trait]
impl DeviceLink for ScriptedLink {
    fn endpoint(&self) -> String {
        "scripted".to_string()
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        let result = {
            let mut script = self.script.inner.lock();
            script.connects += 1;
            if script.fail_all {
                Err(LinkError::Connect {
                    endpoint: "scripted".to_string(),
                    reason: "unreachable".to_string(),
                })
            } else {
                script.connect_results.pop_front().unwrap_or(Ok(()))
            }
        };
        self.connected = result.is_ok();
        result
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.script.inner.lock().disconnects += 1;
        self.connected = false;
        Ok(())
    }

    async fn read(
        &mut self,
        address: &str,
        kind: VariableKind,
        _count: u16,
    ) -> Result<Value, LinkError> {
        let delay = self.script.inner.lock().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.inner.lock();
        *script.reads.entry(address.to_string()).or_default() += 1;
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if script.fail_all || script.failing.contains(address) {
            return Err(LinkError::read(address, "scripted failure"));
        }
        if let Some(value) = script.queued.get_mut(address).and_then(VecDeque::pop_front) {
            return Ok(value);
        }
        script
            .values
            .get(address)
            .cloned()
            .ok_or_else(|| LinkError::read(address, format!("no {} value scripted", kind.as_str())))
    }

    async fn write(
        &mut self,
        address: &str,
        value: &Value,
        _kind: VariableKind,
    ) -> Result<(), LinkError> {
        let mut script = self.script.inner.lock();
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if script.fail_all || script.failing.contains(address) {
            return Err(LinkError::write(address, "scripted failure"));
        }
        script.writes.push((address.to_string(), value.clone()));
        script.values.insert(address.to_string(), value.clone());
        Ok(())
    }
}

/// Short timings so paused-clock tests run many cycles quickly
pub fn fast_policy() -> SupervisorPolicy {
    SupervisorPolicy {
        backoff: Duration::from_millis(100),
        confirm_interval: Duration::from_millis(10),
        monitor_interval: Duration::from_millis(50),
        debounce: 5,
        io_timeout: Duration::from_millis(500),
    }
}

// ==================== Observers and publishers ====================

/// Records link episode edges in order
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<&'static str>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn recovered(&self) -> usize {
        self.count("recovered")
    }

    pub fn disconnected(&self) -> usize {
        self.count("disconnected")
    }

    pub fn sequence(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }
}

impl LinkObserver for EventLog {
    fn on_recovered(&self, _link: &str) {
        self.events.lock().push("recovered");
    }

    fn on_disconnected(&self, _link: &str) {
        self.events.lock().push("disconnected");
    }
}

#[derive(Debug, Default)]
struct Recorded {
    published: Vec<(String, Value)>,
    routed: Vec<(String, String)>,
    raw: Vec<(String, String)>,
    fail_publishes: bool,
    raw_budget: Option<usize>,
}

/// `TelemetryPublisher` keeping everything it was handed
#[derive(Debug)]
pub struct RecordingPublisher {
    connected: watch::Sender<bool>,
    recorded: Mutex<Recorded>,
}

impl RecordingPublisher {
    pub fn new(connected: bool) -> Arc<Self> {
        let (tx, _) = watch::channel(connected);
        Arc::new(Self {
            connected: tx,
            recorded: Mutex::new(Recorded::default()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.recorded.lock().published.clone()
    }

    /// `(topic, metric)` of every accepted publish
    pub fn routed(&self) -> Vec<(String, String)> {
        self.recorded.lock().routed.clone()
    }

    pub fn raw(&self) -> Vec<(String, String)> {
        self.recorded.lock().raw.clone()
    }

    /// Make every `publish` fail while set
    pub fn fail_publishes(&self, fail: bool) {
        self.recorded.lock().fail_publishes = fail;
    }

    /// Accept `count` more raw publishes, then fail; `usize::MAX` lifts the limit
    pub fn fail_raw_after(&self, count: usize) {
        self.recorded.lock().raw_budget = (count != usize::MAX).then_some(count);
    }
}

#[async_trait]
impl TelemetryPublisher for RecordingPublisher {
    async fn publish_to(
        &self,
        topic: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), PublishError> {
        if !*self.connected.borrow() {
            return Err(PublishError::Disconnected);
        }
        let mut recorded = self.recorded.lock();
        if recorded.fail_publishes {
            return Err(PublishError::Rejected("scripted failure".to_string()));
        }
        recorded.published.push((name.to_string(), value.clone()));
        recorded.routed.push((topic.to_string(), name.to_string()));
        Ok(())
    }

    async fn publish_raw(&self, name: &str, payload: &str) -> Result<(), PublishError> {
        if !*self.connected.borrow() {
            return Err(PublishError::Disconnected);
        }
        let mut recorded = self.recorded.lock();
        match recorded.raw_budget {
            Some(0) => return Err(PublishError::Rejected("budget exhausted".to_string())),
            Some(ref mut left) => *left -= 1,
            None => {},
        }
        recorded.raw.push((name.to_string(), payload.to_string()));
        Ok(())
    }

    fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

// ==================== Helpers ====================

/// Poll `condition` every 5 ms until it holds
///
/// Gives up after 30 s of wall time so a paused clock still makes progress
/// on blocking file I/O. Panics on timeout.
pub async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while !condition() {
        assert!(
            std::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
