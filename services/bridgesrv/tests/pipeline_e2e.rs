//! End-to-end: YAML configuration, CSV table, virtual device, recording uplink

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use bridgesrv::core::config::AppConfig;
use bridgesrv::core::types::{MachineStatus, Value};
use bridgesrv::protocols::{VirtualHandle, VirtualLink};
use bridgesrv::test_utils::{wait_for, RecordingPublisher};
use bridgesrv::Pipeline;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
devices:
  - name: press
    protocol: virtual
    endpoint: "192.168.3.39:5007"
    liveness:
      address: SM400
    supervisor:
      backoff_ms: 100
      confirm_interval_ms: 10
      monitor_interval_ms: 50
      io_timeout_ms: 500
    initial:
      SM400: true
      M0: true
      M1: false
      M2: false
      D10: 5
      D100: 2550
groups:
  - name: counters
    category: Counting
    device: press
    variables:
      - { address: D10, kind: WORD, name: goodParts }
  - name: settings
    category: Setting
    device: press
    table: tables/settings.csv
    kind: WORD
    interval_ms: 100
    scale: 0.01
status:
  device: press
  addresses: [SM400, M0, M1, M2]
  guard: "{SM400}"
  interval_ms: 50
  rules:
    - { priority: 0, formula: "{M0} . /{M2}", status: Run }
    - { priority: 1, formula: "{M1} . /{M2}", status: Idle, suppressed_after: [Setup, On] }
    - { priority: 2, formula: "{M2}", status: Alarm }
buffer:
  path: data/buffer.jsonl
process_log:
  enabled: false
"#;

const SETTINGS_TABLE: &str = "No.,Setting_ID,Setting_Name\n0,D100,moldTemp\n";

fn write_config(dir: &TempDir) -> PathBuf {
    std::fs::create_dir_all(dir.path().join("tables")).unwrap();
    std::fs::write(dir.path().join("tables/settings.csv"), SETTINGS_TABLE).unwrap();
    let path = dir.path().join("bridgesrv.yaml");
    std::fs::write(&path, CONFIG).unwrap();
    path
}

fn statuses(publisher: &RecordingPublisher) -> Vec<Value> {
    publisher
        .published()
        .into_iter()
        .filter(|(name, _)| name == MachineStatus::TELEMETRY_NAME)
        .map(|(_, value)| value)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_configured_pipeline_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = AppConfig::load(Some(&write_config(&dir))).unwrap();
    let publisher = RecordingPublisher::new(true);

    let mut devices: Vec<VirtualHandle> = Vec::new();
    let pipeline = Pipeline::from_config(&config, publisher.clone(), |device| {
        let link = VirtualLink::new(device.endpoint.clone(), device.initial.clone());
        devices.push(link.handle());
        Ok(Box::new(link))
    })
    .unwrap();
    let press = devices.remove(0);

    let handle = pipeline.start(CancellationToken::new());

    // On first, then the evaluated status
    wait_for(|| statuses(&publisher).len() >= 2).await;
    assert_eq!(
        statuses(&publisher),
        vec![MachineStatus::On.value(), MachineStatus::Run.value()]
    );
    wait_for(|| publisher.published().iter().any(|(n, _)| n == "moldTemp")).await;
    let published = publisher.published();
    assert!(published.contains(&("goodParts".to_string(), Value::Int(5))));
    assert!(published.contains(&("moldTemp".to_string(), Value::Float(25.5))));

    // Alarm bit raised
    press.set("M2", Value::Bool(true));
    wait_for(|| statuses(&publisher).len() >= 3).await;
    assert_eq!(statuses(&publisher)[2], MachineStatus::Alarm.value());

    // Link lost and back: one EthernetDisconnected, then the status again
    press.set_reachable(false);
    wait_for(|| statuses(&publisher).len() >= 4).await;
    press.set_reachable(true);
    wait_for(|| statuses(&publisher).len() >= 5).await;
    assert_eq!(
        statuses(&publisher)[3..5],
        [
            MachineStatus::EthernetDisconnected.value(),
            MachineStatus::Alarm.value()
        ]
    );
    assert!(handle.gate().is_open());
    assert_eq!(handle.board().current(), Some(MachineStatus::Alarm));

    // Counter unchanged across the outage: no republish
    let good_parts = publisher
        .published()
        .iter()
        .filter(|(n, _)| n == "goodParts")
        .count();
    assert_eq!(good_parts, 1);

    handle.shutdown().await;
}

#[test]
fn test_validation_rejects_unknown_protocol() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir);
    let yaml = std::fs::read_to_string(&path)
        .unwrap()
        .replace("protocol: virtual", "protocol: fins");
    std::fs::write(&path, yaml).unwrap();

    let config = AppConfig::load(Some(&path)).unwrap();
    let publisher = RecordingPublisher::new(true);
    let result = Pipeline::from_config(&config, publisher, bridgesrv::protocols::create_link);
    assert!(result.is_err());
}
