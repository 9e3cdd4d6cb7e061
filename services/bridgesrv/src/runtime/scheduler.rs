//! Polling scheduler
//!
//! One task per variable group. Each task walks its variables in declared
//! order, waits on the shared pause gate before every read and publishes a
//! variable only when its value changed since the previous read.

use crate::core::types::{Telemetry, VariableGroup};
use crate::runtime::gate::PauseGate;
use crate::runtime::supervisor::ConnectionSupervisor;
use crate::storage::uplink::{Delivery, Uplink};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one pass over a group
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub reads: usize,
    pub published: usize,
    pub buffered: usize,
    /// A read failed and the rest of the cycle was skipped
    pub aborted: bool,
    pub cancelled: bool,
}

/// Poll loop of one group; owns the group's `last_value`s
pub struct GroupPoller {
    group: VariableGroup,
    supervisor: Arc<ConnectionSupervisor>,
    gate: Arc<PauseGate>,
    uplink: Arc<Uplink>,
}

impl GroupPoller {
    pub fn new(
        group: VariableGroup,
        supervisor: Arc<ConnectionSupervisor>,
        gate: Arc<PauseGate>,
        uplink: Arc<Uplink>,
    ) -> Self {
        Self {
            group,
            supervisor,
            gate,
            uplink,
        }
    }

    pub fn group(&self) -> &VariableGroup {
        &self.group
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Polling group {} ({} variables, {:?}) on {}",
            self.group.name,
            self.group.variables.len(),
            self.group.poll_interval(),
            self.supervisor.name()
        );

        loop {
            let report = self.poll_cycle(&cancel).await;
            if report.cancelled {
                break;
            }
            if report.aborted && !pace(self.group.poll_interval(), &cancel).await {
                break;
            }
        }

        debug!("Polling group {} stopped", self.group.name);
    }

    /// One pass over the group's variables
    pub async fn poll_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();
        let interval = self.group.poll_interval();

        for index in 0..self.group.variables.len() {
            if !self.gate.wait_open(cancel).await {
                report.cancelled = true;
                return report;
            }

            let variable = &self.group.variables[index];
            let read = tokio::select! {
                () = cancel.cancelled() => {
                    report.cancelled = true;
                    return report;
                },
                read = self.supervisor.read(&variable.address, variable.kind, variable.count) => read,
            };
            report.reads += 1;

            match read {
                Ok(raw) => {
                    let variable = &mut self.group.variables[index];
                    if variable.observe(&raw) {
                        let telemetry = Telemetry {
                            name: variable.name.clone(),
                            address: variable.address.clone(),
                            value: self.group.publish_value(&raw),
                            category: self.group.category,
                        };
                        match self.uplink.send(&telemetry).await {
                            Delivery::Published => report.published += 1,
                            Delivery::Buffered => report.buffered += 1,
                            Delivery::Lost => {},
                        }
                    }
                },
                Err(e) => {
                    warn!(
                        "Group {}: read {} ({}) failed: {}",
                        self.group.name, variable.name, variable.address, e
                    );
                    self.supervisor.report_failure();
                    report.aborted = true;
                    return report;
                },
            }

            if !pace(interval, cancel).await {
                report.cancelled = true;
                return report;
            }
        }

        report
    }
}

/// Cancellable sleep; `false` when cancelled
pub(crate) async fn pace(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(interval) => true,
    }
}

/// Spawns and tracks the group pollers
pub struct PollingScheduler {
    gate: Arc<PauseGate>,
    uplink: Arc<Uplink>,
    tasks: Vec<JoinHandle<()>>,
}

impl PollingScheduler {
    pub fn new(gate: Arc<PauseGate>, uplink: Arc<Uplink>) -> Self {
        Self {
            gate,
            uplink,
            tasks: Vec::new(),
        }
    }

    pub fn gate(&self) -> &Arc<PauseGate> {
        &self.gate
    }

    /// Block every loop before its next unit of work
    pub fn pause_all(&self, link: &str) {
        self.gate.pause(link);
    }

    /// Release the loops once `link` (and every other link) is up
    pub fn resume_all(&self, link: &str) {
        self.gate.resume(link);
    }

    pub fn spawn_group(
        &mut self,
        group: VariableGroup,
        supervisor: Arc<ConnectionSupervisor>,
        cancel: CancellationToken,
    ) {
        let poller = GroupPoller::new(group, supervisor, self.gate.clone(), self.uplink.clone());
        self.tasks.push(tokio::spawn(poller.run(cancel)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::types::{Category, Value, Variable, VariableKind};
    use crate::runtime::supervisor::Liveness;
    use crate::storage::OfflineBuffer;
    use crate::test_utils::{fast_policy, wait_for, RecordingPublisher, ScriptedLink};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        supervisor: Arc<ConnectionSupervisor>,
        gate: Arc<PauseGate>,
        uplink: Arc<Uplink>,
        publisher: Arc<RecordingPublisher>,
        cancel: CancellationToken,
    }

    async fn fixture(link: ScriptedLink) -> Fixture {
        let dir = TempDir::new().unwrap();
        let supervisor = Arc::new(ConnectionSupervisor::new(
            "plc",
            Box::new(link),
            Liveness::bit("SM400"),
            fast_policy(),
        ));
        let gate = PauseGate::new(["plc"]);
        supervisor.subscribe(gate.clone());

        let publisher = RecordingPublisher::new(true);
        let buffer = Arc::new(OfflineBuffer::new(dir.path().join("buffer.jsonl")));
        let uplink = Arc::new(Uplink::new(publisher.clone(), buffer, None));

        let cancel = CancellationToken::new();
        tokio::spawn({
            let supervisor = supervisor.clone();
            let cancel = cancel.clone();
            async move { supervisor.run(cancel).await }
        });
        wait_for(|| gate.is_open()).await;

        Fixture {
            _dir: dir,
            supervisor,
            gate,
            uplink,
            publisher,
            cancel,
        }
    }

    fn counters() -> VariableGroup {
        VariableGroup::new("counters", Category::Counting, "plc").with_variables(vec![
            Variable::new("D10", VariableKind::Word, "goodParts"),
            Variable::new("D12", VariableKind::Word, "badParts"),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_reads_publish_once() {
        let link = ScriptedLink::new();
        let script = link.script();
        script.set_value("SM400", true.into());
        script.set_value("D10", Value::Int(5));
        script.set_value("D12", Value::Int(0));
        let fx = fixture(link).await;

        let mut poller =
            GroupPoller::new(counters(), fx.supervisor.clone(), fx.gate.clone(), fx.uplink.clone());

        let first = poller.poll_cycle(&fx.cancel).await;
        assert_eq!(first.reads, 2);
        assert_eq!(first.published, 2);

        for _ in 0..5 {
            let again = poller.poll_cycle(&fx.cancel).await;
            assert_eq!(again.reads, 2);
            assert_eq!(again.published, 0);
        }

        script.set_value("D12", Value::Int(1));
        let changed = poller.poll_cycle(&fx.cancel).await;
        assert_eq!(changed.published, 1);

        assert_eq!(
            fx.publisher.published(),
            vec![
                ("goodParts".to_string(), Value::Int(5)),
                ("badParts".to_string(), Value::Int(0)),
                ("badParts".to_string(), Value::Int(1)),
            ]
        );
        fx.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_applied_to_published_value_only() {
        let link = ScriptedLink::new();
        let script = link.script();
        script.set_value("SM400", true.into());
        script.set_value("D200", Value::Int(2550));
        let fx = fixture(link).await;

        let group = VariableGroup::new("settings", Category::Setting, "plc")
            .with_variables(vec![Variable::new("D200", VariableKind::Word, "moldTemp")])
            .with_scale(0.01)
            .with_interval(Duration::from_millis(10));
        let mut poller = GroupPoller::new(group, fx.supervisor.clone(), fx.gate.clone(), fx.uplink.clone());

        poller.poll_cycle(&fx.cancel).await;
        assert_eq!(
            poller.group().variables[0].last_value,
            Some(Value::Int(2550))
        );
        assert_eq!(
            fx.publisher.published(),
            vec![("moldTemp".to_string(), Value::Float(25.5))]
        );
        fx.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_aborts_cycle_and_reports() {
        let link = ScriptedLink::new();
        let script = link.script();
        script.set_value("SM400", true.into());
        script.set_value("D12", Value::Int(3));
        script.fail_address("D10", true);
        let fx = fixture(link).await;

        let mut poller =
            GroupPoller::new(counters(), fx.supervisor.clone(), fx.gate.clone(), fx.uplink.clone());
        let report = poller.poll_cycle(&fx.cancel).await;
        assert!(report.aborted);
        assert_eq!(report.reads, 1);
        assert_eq!(script.reads("D12"), 0);

        // The supervisor degrades, which closes the gate
        wait_for(|| !fx.gate.is_open()).await;
        assert_eq!(fx.supervisor.stats().disconnects, 1);
        fx.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_blocks_before_next_read() {
        let link = ScriptedLink::new();
        let script = link.script();
        script.set_value("SM400", true.into());
        script.set_value("D10", Value::Int(1));
        script.set_value("D12", Value::Int(2));
        let fx = fixture(link).await;

        let mut scheduler = PollingScheduler::new(fx.gate.clone(), fx.uplink.clone());
        scheduler.spawn_group(counters(), fx.supervisor.clone(), fx.cancel.clone());
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        scheduler.pause_all("maintenance");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let reads_at_pause = script.reads("D10");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(script.reads("D10"), reads_at_pause);

        scheduler.resume_all("maintenance");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(script.reads("D10") > reads_at_pause);

        fx.cancel.cancel();
        for task in scheduler.into_tasks() {
            task.await.unwrap();
        }
    }
}
