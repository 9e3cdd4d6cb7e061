//! Store-and-forward through a running pipeline
//!
//! Uplink down for three changes: the buffer holds the disconnect marker and
//! the three samples in order; on reconnect all of them are replayed in order
//! and the buffer is empty.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use bridgesrv::core::types::{
    BufferedRecord, Category, MachineStatus, Value, Variable, VariableGroup, VariableKind,
};
use bridgesrv::runtime::{ConnectionSupervisor, Liveness, Pipeline};
use bridgesrv::storage::{OfflineBuffer, Uplink};
use bridgesrv::test_utils::{fast_policy, wait_for, RecordingPublisher, ScriptedLink};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn wait_buffered(buffer: &OfflineBuffer, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while buffer.len().await.unwrap() < count {
        assert!(Instant::now() < deadline, "buffer never reached {} records", count);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_events_buffered_and_replayed_in_order() {
    let dir = TempDir::new().unwrap();
    let publisher = RecordingPublisher::new(true);

    let link = ScriptedLink::new();
    let script = link.script();
    script.set_value("SM400", true.into());
    script.set_value("C0", Value::Int(0));

    let buffer = Arc::new(OfflineBuffer::new(dir.path().join("stored_disconnect_data.jsonl")));
    let uplink = Arc::new(Uplink::new(publisher.clone(), buffer.clone(), None));
    let mut pipeline = Pipeline::new(uplink);
    pipeline
        .add_supervisor(Arc::new(ConnectionSupervisor::new(
            "plc",
            Box::new(link),
            Liveness::bit("SM400"),
            fast_policy(),
        )))
        .unwrap();
    pipeline
        .add_group(
            VariableGroup::new("counters", Category::Counting, "plc")
                .with_variables(vec![Variable::new("C0", VariableKind::Counter, "goodParts")]),
        )
        .unwrap();

    let handle = pipeline.start(CancellationToken::new());
    wait_for(|| publisher.published().len() == 1).await;

    publisher.set_connected(false);
    wait_buffered(&buffer, 1).await;

    for (i, count) in [3, 4, 5].into_iter().enumerate() {
        script.set_value("C0", Value::Int(count));
        wait_buffered(&buffer, i + 2).await;
    }
    assert_eq!(buffer.len().await.unwrap(), 4);
    assert_eq!(publisher.published().len(), 1);

    publisher.set_connected(true);
    wait_for(|| publisher.raw().len() == 4).await;

    let replayed: Vec<BufferedRecord> = publisher
        .raw()
        .iter()
        .map(|(_, payload)| serde_json::from_str(payload).unwrap())
        .collect();
    let names: Vec<&str> = replayed.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["machineStatus", "goodParts", "goodParts", "goodParts"]);
    let values: Vec<Value> = replayed.into_iter().map(|r| r.value).collect();
    assert_eq!(
        values,
        vec![
            MachineStatus::WifiDisconnected.value(),
            Value::Int(3),
            Value::Int(4),
            Value::Int(5),
        ]
    );
    assert!(buffer.is_empty().await.unwrap());

    handle.shutdown().await;
}
