//! Machine status task
//!
//! Reads the status bits, evaluates the status rules and publishes
//! `machineStatus` when the result differs from the previous status. It is the
//! only writer of the status board.

use crate::core::types::{Category, MachineStatus, Telemetry, VariableKind};
use crate::runtime::gate::PauseGate;
use crate::runtime::scheduler::pace;
use crate::runtime::supervisor::ConnectionSupervisor;
use crate::storage::uplink::Uplink;
use bridge_rules::StatusEvaluator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Current machine status, readable by anyone, written by the status task
#[derive(Debug)]
pub struct StatusBoard {
    current: watch::Sender<Option<MachineStatus>>,
    republish: AtomicBool,
}

impl Default for StatusBoard {
    fn default() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current,
            republish: AtomicBool::new(false),
        }
    }
}

impl StatusBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> Option<MachineStatus> {
        *self.current.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MachineStatus>> {
        self.current.subscribe()
    }

    /// Ask the status task to publish the current status again
    pub fn request_republish(&self) {
        self.republish.store(true, Ordering::Release);
    }

    fn set(&self, status: MachineStatus) -> Option<MachineStatus> {
        self.current.send_replace(Some(status))
    }

    fn take_republish(&self) -> bool {
        self.republish.swap(false, Ordering::AcqRel)
    }
}

/// Address reported as the source of status telemetry
const STATUS_ADDRESS: &str = "status";

pub struct StatusPoller {
    evaluator: StatusEvaluator<MachineStatus>,
    supervisor: Arc<ConnectionSupervisor>,
    gate: Arc<PauseGate>,
    uplink: Arc<Uplink>,
    board: Arc<StatusBoard>,
    interval: Duration,
    last_error: Option<String>,
}

impl StatusPoller {
    pub fn new(
        evaluator: StatusEvaluator<MachineStatus>,
        supervisor: Arc<ConnectionSupervisor>,
        gate: Arc<PauseGate>,
        uplink: Arc<Uplink>,
        board: Arc<StatusBoard>,
        interval: Duration,
    ) -> Self {
        Self {
            evaluator,
            supervisor,
            gate,
            uplink,
            board,
            interval,
            last_error: None,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Status task on {}: {} bits, {} rules",
            self.supervisor.name(),
            self.evaluator.table().len(),
            self.evaluator.formula().rules().len()
        );

        loop {
            if !self.gate.wait_open(&cancel).await {
                break;
            }
            self.poll_once(&cancel).await;
            if !pace(self.interval, &cancel).await {
                break;
            }
        }

        debug!("Status task stopped");
    }

    /// One read-evaluate-publish pass; returns the status published, if any
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Option<MachineStatus> {
        // The machine is on as soon as its controller answers
        if self.board.current().is_none() {
            self.board.set(MachineStatus::On);
            self.publish(MachineStatus::On).await;
            return Some(MachineStatus::On);
        }
        if self.board.take_republish() {
            if let Some(current) = self.board.current() {
                info!("Republishing status {}", current);
                self.publish(current).await;
            }
        }

        let addresses = self.evaluator.table().addresses().to_vec();
        let mut bits = Vec::with_capacity(addresses.len());
        for address in &addresses {
            let read = tokio::select! {
                () = cancel.cancelled() => return None,
                read = self.supervisor.read(address, VariableKind::Bit, 1) => read,
            };
            match read {
                Ok(value) => bits.push(value.is_truthy()),
                Err(e) => {
                    warn!("Status bit {} read failed: {}", address, e);
                    self.supervisor.report_failure();
                    return None;
                },
            }
        }

        let previous = self.board.current();
        match self.evaluator.evaluate(&bits, previous) {
            Ok(Some(status)) if Some(status) != previous => {
                self.last_error = None;
                self.board.set(status);
                info!(
                    "Machine status {} -> {}",
                    previous.map_or_else(|| "-".to_string(), |s| s.to_string()),
                    status
                );
                self.publish(status).await;
                Some(status)
            },
            Ok(result) => {
                self.last_error = None;
                trace!("Status unchanged ({:?})", result);
                None
            },
            Err(e) => {
                // Status frozen; log each distinct error once
                let message = e.to_string();
                if self.last_error.as_deref() != Some(message.as_str()) {
                    warn!("Status evaluation failed, keeping {:?}: {}", previous, message);
                    self.last_error = Some(message);
                }
                None
            },
        }
    }

    async fn publish(&self, status: MachineStatus) {
        let telemetry = Telemetry {
            name: MachineStatus::TELEMETRY_NAME.to_string(),
            address: STATUS_ADDRESS.to_string(),
            value: status.value(),
            category: Category::Status,
        };
        self.uplink.send(&telemetry).await;
    }
}
