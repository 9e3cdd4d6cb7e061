//! Service configuration
//!
//! Loaded through figment: compiled defaults, then the YAML/TOML/JSON file
//! given on the command line, then `BRIDGESRV_*` environment variables
//! (`__` separates nested keys, e.g. `BRIDGESRV_BUFFER__PATH`).

use crate::core::config::csv_table::load_variable_table;
use crate::core::types::{Category, MachineStatus, Value, Variable, VariableGroup, VariableKind};
use crate::error::ConfigurationError;
use crate::runtime::supervisor::SupervisorPolicy;
use bridge_rules::{Formula, StatusEvaluator, StatusFormula, StatusRule, SymbolTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "BRIDGESRV_";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/bridgesrv.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
    pub devices: Vec<DeviceConfig>,
    pub groups: Vec<GroupConfig>,
    pub status: Option<StatusConfig>,
    pub buffer: BufferConfig,
    pub process_log: ProcessLogConfig,
    pub publisher: PublisherConfig,

    /// Directory relative paths are resolved against (the config file's directory)
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            logging: LoggingConfig::default(),
            devices: Vec::new(),
            groups: Vec::new(),
            status: None,
            buffer: BufferConfig::default(),
            process_log: ProcessLogConfig::default(),
            publisher: PublisherConfig::default(),
            base_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "bridgesrv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
    pub json: bool,
}

/// One controller and how to supervise it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub name: String,
    /// Driver name; `virtual` is built in, wire protocols are provided by drivers
    pub protocol: String,
    #[serde(default)]
    pub endpoint: String,
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Seed values for the `virtual` driver
    #[serde(default)]
    pub initial: BTreeMap<String, Value>,
}

/// Always-on variable used to confirm the link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessConfig {
    pub address: String,
    #[serde(default = "default_liveness_kind")]
    pub kind: VariableKind,
}

fn default_liveness_kind() -> VariableKind {
    VariableKind::Bit
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub backoff_ms: u64,
    pub confirm_interval_ms: u64,
    pub monitor_interval_ms: u64,
    pub debounce: u32,
    pub io_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let policy = SupervisorPolicy::default();
        Self {
            backoff_ms: policy.backoff.as_millis() as u64,
            confirm_interval_ms: policy.confirm_interval.as_millis() as u64,
            monitor_interval_ms: policy.monitor_interval.as_millis() as u64,
            debounce: policy.debounce,
            io_timeout_ms: policy.io_timeout.as_millis() as u64,
        }
    }
}

impl SupervisorConfig {
    pub fn to_policy(&self) -> SupervisorPolicy {
        SupervisorPolicy {
            backoff: Duration::from_millis(self.backoff_ms),
            confirm_interval: Duration::from_millis(self.confirm_interval_ms),
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
            debounce: self.debounce,
            io_timeout: Duration::from_millis(self.io_timeout_ms),
        }
    }
}

/// A variable group, inline or from a CSV table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupConfig {
    pub name: String,
    pub category: Category,
    pub device: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// CSV table, relative to the configuration file
    #[serde(default)]
    pub table: Option<PathBuf>,
    /// Kind for tables without a `Type` column
    #[serde(default)]
    pub kind: Option<VariableKind>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    pub device: String,
    /// Bit addresses in symbol order (`a`, `b`, ...)
    pub addresses: Vec<String>,
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    pub rules: Vec<StatusRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRuleConfig {
    pub priority: u32,
    /// Symbols and/or `{ADDRESS}` placeholders
    pub formula: String,
    pub status: MachineStatus,
    #[serde(default)]
    pub suppressed_after: Vec<MachineStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    pub path: PathBuf,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/stored_disconnect_data.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessLogConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for ProcessLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("data/process_log.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublisherConfig {
    /// Transport; `log` is built in
    pub kind: String,
    /// JSON-lines outbox of the `log` publisher
    pub outbox: Option<PathBuf>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            kind: "log".to_string(),
            outbox: None,
        }
    }
}

/// Status polling setup, validated against its rules
#[derive(Debug, Clone)]
pub struct StatusSetup {
    pub device: String,
    pub interval: Duration,
    pub evaluator: StatusEvaluator<MachineStatus>,
}

impl AppConfig {
    /// Load with layering; relative paths resolve against the file's directory
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let figment = common::config_loader::figment_for::<AppConfig>(path, ENV_PREFIX)
            .map_err(|e| ConfigurationError::Load(e.to_string()))?;
        let mut config: AppConfig = figment
            .extract()
            .map_err(|e: figment::Error| ConfigurationError::Load(e.to_string()))?;
        config.base_dir = path.and_then(Path::parent).map(Path::to_path_buf);
        debug!(
            "Configuration: {} devices, {} groups",
            config.devices.len(),
            config.groups.len()
        );
        Ok(config)
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Structural checks that need no file access
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.devices.is_empty() {
            return Err(ConfigurationError::Missing("devices".to_string()));
        }
        if self.groups.is_empty() && self.status.is_none() {
            return Err(ConfigurationError::Missing(
                "groups or status (nothing to poll)".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(ConfigurationError::invalid(
                    "devices",
                    format!("duplicate device '{}'", device.name),
                ));
            }
            if device.liveness.address.trim().is_empty() {
                return Err(ConfigurationError::invalid(
                    format!("devices.{}.liveness", device.name),
                    "address is empty",
                ));
            }
            if device.supervisor.debounce == 0 {
                return Err(ConfigurationError::invalid(
                    format!("devices.{}.supervisor.debounce", device.name),
                    "must be at least 1",
                ));
            }
            if device.supervisor.io_timeout_ms == 0 {
                return Err(ConfigurationError::invalid(
                    format!("devices.{}.supervisor.io_timeout_ms", device.name),
                    "must be positive",
                ));
            }
        }

        for group in &self.groups {
            if self.device(&group.device).is_none() {
                return Err(ConfigurationError::invalid(
                    format!("groups.{}.device", group.name),
                    format!("unknown device '{}'", group.device),
                ));
            }
            if group.variables.is_empty() && group.table.is_none() {
                return Err(ConfigurationError::invalid(
                    format!("groups.{}", group.name),
                    "needs inline variables or a table",
                ));
            }
            if group.category == Category::Status {
                return Err(ConfigurationError::invalid(
                    format!("groups.{}.category", group.name),
                    "status bits are configured in the status block",
                ));
            }
        }

        if let Some(status) = &self.status {
            if self.device(&status.device).is_none() {
                return Err(ConfigurationError::invalid(
                    "status.device",
                    format!("unknown device '{}'", status.device),
                ));
            }
            if status.rules.is_empty() {
                return Err(ConfigurationError::Missing("status.rules".to_string()));
            }
        }

        Ok(())
    }

    /// Materialize the variable groups, reading CSV tables
    pub fn build_groups(&self) -> Result<Vec<VariableGroup>, ConfigurationError> {
        let mut groups = Vec::with_capacity(self.groups.len());
        for config in &self.groups {
            let mut variables = config.variables.clone();
            if let Some(table) = &config.table {
                variables.extend(load_variable_table(&self.resolve(table), config.kind)?);
            }
            if variables.is_empty() {
                return Err(ConfigurationError::invalid(
                    format!("groups.{}", config.name),
                    "no variables",
                ));
            }

            let mut group = VariableGroup::new(&config.name, config.category, &config.device)
                .with_variables(variables);
            if let Some(ms) = config.interval_ms {
                group = group.with_interval(Duration::from_millis(ms));
            }
            if let Some(scale) = config.scale {
                group = group.with_scale(scale);
            }
            info!(
                "Group {} ({}): {} variables every {:?}",
                group.name,
                group.category,
                group.variables.len(),
                group.poll_interval()
            );
            groups.push(group);
        }
        Ok(groups)
    }

    /// Symbol table, placeholder expansion and rule validation
    pub fn build_status(&self) -> Result<Option<StatusSetup>, ConfigurationError> {
        let Some(config) = &self.status else {
            return Ok(None);
        };

        let table = SymbolTable::new(config.addresses.iter().cloned())?;
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let formula = Formula::parse(&table.expand(&rule.formula)?)?;
            rules.push(
                StatusRule::new(rule.priority, formula, rule.status)
                    .suppressed_after(rule.suppressed_after.iter().copied()),
            );
        }

        let mut status_formula = StatusFormula::new(rules);
        if let Some(guard) = &config.guard {
            status_formula = status_formula.with_guard(Formula::parse(&table.expand(guard)?)?);
        }

        let evaluator = StatusEvaluator::new(table, status_formula)?;
        Ok(Some(StatusSetup {
            device: config.device.clone(),
            interval: Duration::from_millis(
                config
                    .interval_ms
                    .unwrap_or(Category::Status.default_interval().as_millis() as u64),
            ),
            evaluator,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
devices:
  - name: plc
    protocol: virtual
    endpoint: "192.168.3.39:5007"
    liveness:
      address: SM400
    supervisor:
      backoff_ms: 1000
groups:
  - name: settings
    category: Setting
    device: plc
    table: tables/settings.csv
    kind: WORD
    scale: 0.01
  - name: alarms
    category: Alarm
    device: plc
    interval_ms: 50
    variables:
      - { address: M200, kind: BIT, name: overheat }
status:
  device: plc
  addresses: [SM400, M0, M1, M2]
  guard: "{SM400}"
  rules:
    - { priority: 0, formula: "{M0} . /{M2}", status: Run }
    - { priority: 1, formula: "c", status: Idle, suppressed_after: [Setup, On] }
    - { priority: 2, formula: "d", status: Alarm }
buffer:
  path: data/buffer.jsonl
"#;

    fn write_config(dir: &TempDir) -> PathBuf {
        std::fs::create_dir_all(dir.path().join("tables")).unwrap();
        let mut table = std::fs::File::create(dir.path().join("tables/settings.csv")).unwrap();
        writeln!(table, "No.,Setting_ID,Setting_Name").unwrap();
        writeln!(table, "0,D100,moldTemp").unwrap();

        let path = dir.path().join("bridgesrv.yaml");
        std::fs::write(&path, CONFIG).unwrap();
        path
    }

    #[test]
    fn test_load_and_build() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir);
        let config = AppConfig::load(Some(&path)).unwrap();
        config.validate().unwrap();

        assert_eq!(config.devices[0].supervisor.backoff_ms, 1000);
        // Untouched fields keep their defaults
        assert_eq!(config.devices[0].supervisor.debounce, 5);
        assert_eq!(config.devices[0].liveness.kind, VariableKind::Bit);
        assert_eq!(config.resolve(&config.buffer.path), dir.path().join("data/buffer.jsonl"));

        let groups = config.build_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].variables[0].name, "moldTemp");
        assert_eq!(groups[0].variables[0].kind, VariableKind::Word);
        assert_eq!(groups[0].scale, Some(0.01));
        assert_eq!(groups[1].poll_interval(), Duration::from_millis(50));

        let status = config.build_status().unwrap().unwrap();
        assert_eq!(status.device, "plc");
        assert_eq!(status.interval, Duration::from_millis(100));
        let evaluator = status.evaluator;
        assert_eq!(
            evaluator.evaluate(&[true, true, false, false], None).unwrap(),
            Some(MachineStatus::Run)
        );
        assert_eq!(
            evaluator
                .evaluate(&[true, false, true, false], Some(MachineStatus::Setup))
                .unwrap(),
            None
        );
        assert_eq!(evaluator.evaluate(&[false, true, false, false], None).unwrap(), None);
    }

    #[test]
    fn test_defaults_validate_fails_without_devices() {
        let config = AppConfig::default();
        assert!(matches!(config.validate(), Err(ConfigurationError::Missing(_))));
    }

    #[test]
    fn test_unknown_device_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir);
        let mut config = AppConfig::load(Some(&path)).unwrap();
        config.groups[1].device = "press".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::Invalid { .. })
        ));
    }

    #[test]
    fn test_status_rule_errors_surface_as_configuration() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir);
        let mut config = AppConfig::load(Some(&path)).unwrap();
        if let Some(status) = config.status.as_mut() {
            status.rules[0].formula = "{M9}".to_string();
        }
        assert!(matches!(config.build_status(), Err(ConfigurationError::Rules(_))));

        if let Some(status) = config.status.as_mut() {
            status.rules[0].formula = "e".to_string();
        }
        assert!(matches!(config.build_status(), Err(ConfigurationError::Rules(_))));
    }
}
