//! Pipeline composition
//!
//! Wires supervisors, group pollers, the status task and the uplink together
//! and owns the tasks they run on:
//!
//! ```text
//! ┌──────────────┐ on_disconnected ┌───────────┐  wait_open  ┌──────────────┐
//! │ Connection   │────────────────►│ PauseGate │◄────────────│ GroupPoller  │
//! │ Supervisor   │  on_recovered   └───────────┘             │ StatusPoller │
//! └──────────────┘                                           └──────┬───────┘
//!        │ LinkEvent                                                │ Telemetry
//!        ▼                                                          ▼
//! ┌──────────────┐  EthernetDisconnected  ┌────────┐ buffered ┌───────────────┐
//! │ link events  │───────────────────────►│ Uplink │─────────►│ OfflineBuffer │
//! └──────────────┘                        └────────┘          └───────────────┘
//!                                             ▲ replay on reconnect
//!                                        uplink watcher
//! ```

use crate::core::config::{AppConfig, DeviceConfig, StatusSetup};
use crate::core::link::DeviceLink;
use crate::core::publisher::TelemetryPublisher;
use crate::core::types::{BufferedRecord, Category, MachineStatus, Telemetry, VariableGroup};
use crate::error::ConfigurationError;
use crate::runtime::gate::PauseGate;
use crate::runtime::scheduler::PollingScheduler;
use crate::runtime::status::{StatusBoard, StatusPoller};
use crate::runtime::supervisor::{ConnectionSupervisor, Liveness, LinkObserver};
use crate::storage::{OfflineBuffer, ProcessLog, Uplink};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Episode edge of a supervised link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Recovered(String),
    Disconnected(String),
}

/// Forwards supervisor callbacks to the link event task
struct LinkEvents {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkObserver for LinkEvents {
    fn on_recovered(&self, link: &str) {
        self.forward(LinkEvent::Recovered(link.to_string()));
    }

    fn on_disconnected(&self, link: &str) {
        self.forward(LinkEvent::Disconnected(link.to_string()));
    }
}

impl LinkEvents {
    fn forward(&self, event: LinkEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("Link event task gone, dropped {:?}", e.0);
        }
    }
}

pub struct Pipeline {
    supervisors: BTreeMap<String, Arc<ConnectionSupervisor>>,
    groups: Vec<VariableGroup>,
    status: Option<StatusSetup>,
    uplink: Arc<Uplink>,
    board: Arc<StatusBoard>,
}

impl Pipeline {
    pub fn new(uplink: Arc<Uplink>) -> Self {
        Self {
            supervisors: BTreeMap::new(),
            groups: Vec::new(),
            status: None,
            uplink,
            board: StatusBoard::new(),
        }
    }

    /// Build from configuration, creating links through `make_link`
    pub fn from_config<F>(
        config: &AppConfig,
        publisher: Arc<dyn TelemetryPublisher>,
        mut make_link: F,
    ) -> Result<Self, ConfigurationError>
    where
        F: FnMut(&DeviceConfig) -> Result<Box<dyn DeviceLink>, ConfigurationError>,
    {
        config.validate()?;

        let buffer = Arc::new(OfflineBuffer::new(config.resolve(&config.buffer.path)));
        let process_log = if config.process_log.enabled {
            let path = config.resolve(&config.process_log.path);
            Some(ProcessLog::open(&path).map_err(|e| {
                ConfigurationError::invalid("process_log.path", format!("{}: {}", path.display(), e))
            })?)
        } else {
            None
        };
        let uplink = Arc::new(Uplink::new(publisher, buffer, process_log));

        let mut pipeline = Self::new(uplink);
        for device in &config.devices {
            let link = make_link(device)?;
            let supervisor = ConnectionSupervisor::new(
                device.name.clone(),
                link,
                Liveness {
                    address: device.liveness.address.clone(),
                    kind: device.liveness.kind,
                },
                device.supervisor.to_policy(),
            );
            pipeline.add_supervisor(Arc::new(supervisor))?;
        }
        for group in config.build_groups()? {
            pipeline.add_group(group)?;
        }
        if let Some(status) = config.build_status()? {
            pipeline.set_status(status)?;
        }

        Ok(pipeline)
    }

    pub fn add_supervisor(
        &mut self,
        supervisor: Arc<ConnectionSupervisor>,
    ) -> Result<(), ConfigurationError> {
        let name = supervisor.name().to_string();
        if self.supervisors.contains_key(&name) {
            return Err(ConfigurationError::invalid(
                "devices",
                format!("duplicate device {}", name),
            ));
        }
        self.supervisors.insert(name, supervisor);
        Ok(())
    }

    pub fn add_group(&mut self, group: VariableGroup) -> Result<(), ConfigurationError> {
        self.require_device(&group.device, &format!("groups.{}", group.name))?;
        self.groups.push(group);
        Ok(())
    }

    pub fn set_status(&mut self, status: StatusSetup) -> Result<(), ConfigurationError> {
        self.require_device(&status.device, "status.device")?;
        self.status = Some(status);
        Ok(())
    }

    pub fn supervisor(&self, name: &str) -> Option<&Arc<ConnectionSupervisor>> {
        self.supervisors.get(name)
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    pub fn uplink(&self) -> &Arc<Uplink> {
        &self.uplink
    }

    fn require_device(&self, device: &str, field: &str) -> Result<(), ConfigurationError> {
        if self.supervisors.contains_key(device) {
            Ok(())
        } else {
            Err(ConfigurationError::invalid(
                field,
                format!("unknown device {}", device),
            ))
        }
    }

    /// Spawn every task; they run until `cancel` fires
    pub fn start(self, cancel: CancellationToken) -> PipelineHandle {
        let gate = PauseGate::new(self.supervisors.keys());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();

        for supervisor in self.supervisors.values() {
            supervisor.subscribe(gate.clone());
            supervisor.subscribe(Arc::new(LinkEvents {
                tx: event_tx.clone(),
            }));
            let supervisor = supervisor.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move { supervisor.run(cancel).await }));
        }
        drop(event_tx);

        let mut scheduler = PollingScheduler::new(gate.clone(), self.uplink.clone());
        for group in self.groups {
            // add_group checked the device
            if let Some(supervisor) = self.supervisors.get(&group.device) {
                scheduler.spawn_group(group, supervisor.clone(), cancel.clone());
            }
        }
        let group_count = scheduler.len();
        tasks.extend(scheduler.into_tasks());

        if let Some(status) = self.status {
            if let Some(supervisor) = self.supervisors.get(&status.device) {
                let poller = StatusPoller::new(
                    status.evaluator,
                    supervisor.clone(),
                    gate.clone(),
                    self.uplink.clone(),
                    self.board.clone(),
                    status.interval,
                );
                tasks.push(tokio::spawn(poller.run(cancel.clone())));
            }
        }

        tasks.push(tokio::spawn(link_events(
            event_rx,
            self.uplink.clone(),
            self.board.clone(),
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(uplink_watcher(
            self.uplink.clone(),
            self.board.clone(),
            cancel.clone(),
        )));

        info!(
            "Pipeline started: {} devices, {} groups, {} tasks",
            self.supervisors.len(),
            group_count,
            tasks.len()
        );

        PipelineHandle {
            cancel,
            tasks,
            supervisors: self.supervisors,
            gate,
            board: self.board,
            uplink: self.uplink,
        }
    }
}

/// Publishes link loss once per episode and requests a status republish after recovery
async fn link_events(
    mut rx: mpsc::UnboundedReceiver<LinkEvent>,
    uplink: Arc<Uplink>,
    board: Arc<StatusBoard>,
    cancel: CancellationToken,
) {
    let mut recovered_once = HashSet::new();

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            LinkEvent::Disconnected(link) => {
                warn!("Link {} lost", link);
                let telemetry = Telemetry {
                    name: MachineStatus::TELEMETRY_NAME.to_string(),
                    address: link,
                    value: MachineStatus::EthernetDisconnected.value(),
                    category: Category::Status,
                };
                uplink.send(&telemetry).await;
            },
            LinkEvent::Recovered(link) => {
                if recovered_once.insert(link.clone()) {
                    info!("Link {} up", link);
                } else {
                    info!("Link {} recovered", link);
                    board.request_republish();
                }
            },
        }
    }

    debug!("Link event task stopped");
}

/// Pause between buffer replay attempts while the uplink stays up
pub const REPLAY_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Follows the publisher's connection edges
///
/// Disconnect: one `WifiDisconnected` record goes to the buffer. Reconnect:
/// the buffer is replayed, then the current status is republished. While
/// connected, records left behind by failed publishes are retried every
/// [`REPLAY_RETRY_INTERVAL`].
async fn uplink_watcher(uplink: Arc<Uplink>, board: Arc<StatusBoard>, cancel: CancellationToken) {
    let mut rx = uplink.publisher().connection();
    let mut connected = *rx.borrow_and_update();

    // Leftovers of a previous run; no status has been published yet
    if connected {
        replay(&uplink).await;
    }

    let mut retry = tokio::time::interval(REPLAY_RETRY_INTERVAL);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    retry.reset();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!("Publisher connection channel closed");
                    break;
                }
            },
            _ = retry.tick() => {
                if connected && !uplink.buffer().is_empty().await.unwrap_or(true) {
                    debug!("Retrying buffered records");
                    replay(&uplink).await;
                }
                continue;
            },
        }

        let now = *rx.borrow_and_update();
        if now == connected {
            continue;
        }
        connected = now;

        if connected {
            info!("Uplink reconnected");
            replay(&uplink).await;
            board.request_republish();
        } else {
            warn!("Uplink lost, buffering telemetry");
            uplink
                .store(BufferedRecord::new(
                    MachineStatus::TELEMETRY_NAME,
                    MachineStatus::WifiDisconnected.value(),
                ))
                .await;
        }
    }

    debug!("Uplink watcher stopped");
}

async fn replay(uplink: &Uplink) {
    match uplink.replay().await {
        Ok(0) => {},
        Ok(count) => debug!("Replay published {} records", count),
        Err(e) => error!("Buffer replay failed: {}", e),
    }
}

/// Running pipeline
pub struct PipelineHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    supervisors: BTreeMap<String, Arc<ConnectionSupervisor>>,
    gate: Arc<PauseGate>,
    board: Arc<StatusBoard>,
    uplink: Arc<Uplink>,
}

impl PipelineHandle {
    pub fn supervisor(&self, name: &str) -> Option<&Arc<ConnectionSupervisor>> {
        self.supervisors.get(name)
    }

    pub fn gate(&self) -> &Arc<PauseGate> {
        &self.gate
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    pub fn uplink(&self) -> &Arc<Uplink> {
        &self.uplink
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every task and wait for all of them
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let results = futures::future::join_all(self.tasks).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            error!("{} pipeline tasks ended abnormally", failed);
        }
        info!("Pipeline stopped");
    }
}
