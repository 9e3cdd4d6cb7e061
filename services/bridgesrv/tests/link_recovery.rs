//! Link recovery scenarios against the public supervisor API

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use bridgesrv::runtime::{ConnectionSupervisor, LinkState, Liveness, PauseGate};
use bridgesrv::test_utils::{fast_policy, wait_for, EventLog, ScriptedLink};
use bridgesrv::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn spawn(
    sup: &Arc<ConnectionSupervisor>,
    cancel: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let sup = sup.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { sup.run(cancel).await })
}

#[tokio::test(start_paused = true)]
async fn test_five_truthy_liveness_reads_one_recovery() {
    let link = ScriptedLink::new();
    let script = link.script();
    script.queue_values("SM400", vec![Value::Bool(true); 5]);
    // Afterwards the bit keeps reading true
    script.set_value("SM400", Value::Int(1));

    let sup = Arc::new(ConnectionSupervisor::new(
        "press",
        Box::new(link),
        Liveness::bit("SM400"),
        fast_policy(),
    ));
    let events = EventLog::new();
    let gate = PauseGate::new(["press"]);
    sup.subscribe(events.clone());
    sup.subscribe(gate.clone());

    let cancel = CancellationToken::new();
    let task = spawn(&sup, &cancel);

    wait_for(|| gate.is_open()).await;
    assert!(script.reads("SM400") >= 5);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(events.recovered(), 1);
    assert_eq!(events.disconnected(), 0);
    assert_eq!(sup.state(), LinkState::Healthy);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_outage_closes_gate_until_recovered() {
    let link = ScriptedLink::new();
    let script = link.script();
    script.set_value("SM400", Value::Bool(true));

    let sup = Arc::new(ConnectionSupervisor::new(
        "press",
        Box::new(link),
        Liveness::bit("SM400"),
        fast_policy(),
    ));
    let events = EventLog::new();
    let gate = PauseGate::new(["press"]);
    sup.subscribe(events.clone());
    sup.subscribe(gate.clone());

    let cancel = CancellationToken::new();
    let task = spawn(&sup, &cancel);
    wait_for(|| gate.is_open()).await;

    script.fail_all(true);
    wait_for(|| !gate.is_open()).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!gate.is_open());
    assert!(sup.stats().failed_connects > 0);

    script.fail_all(false);
    wait_for(|| gate.is_open()).await;
    assert_eq!(events.sequence(), vec!["recovered", "disconnected", "recovered"]);

    cancel.cancel();
    task.await.unwrap();
}
