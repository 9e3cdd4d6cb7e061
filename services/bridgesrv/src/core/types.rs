//! Data model shared by links, the scheduler and the uplink

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Timestamp format of buffered records and the process log
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Local time with microsecond precision, e.g. `2024-05-01T08:30:00.123456`
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A value read from a device or published upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Bools as-is, numbers when non-zero, text when non-empty
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !s.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) => None,
        }
    }

    /// Numeric values multiplied by `factor`; bools and text unchanged
    pub fn scaled(&self, factor: f64) -> Value {
        match self {
            Value::Int(i) => Value::Float(*i as f64 * factor),
            Value::Float(f) => Value::Float(f * factor),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Device data type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VariableKind {
    Bit,
    Word,
    DWord,
    Real,
    String,
    Counter,
    Timer,
}

impl VariableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableKind::Bit => "BIT",
            VariableKind::Word => "WORD",
            VariableKind::DWord => "DWORD",
            VariableKind::Real => "REAL",
            VariableKind::String => "STRING",
            VariableKind::Counter => "COUNTER",
            VariableKind::Timer => "TIMER",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableKind {
    type Err = String;

    /// Case-insensitive; also accepts the aliases seen in vendor tables
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BIT" | "BOOL" | "BOOLEAN" => Ok(VariableKind::Bit),
            "WORD" | "INT" | "INT16" => Ok(VariableKind::Word),
            "DWORD" | "DINT" | "INT32" => Ok(VariableKind::DWord),
            "REAL" | "FLOAT" => Ok(VariableKind::Real),
            "STRING" | "STR" => Ok(VariableKind::String),
            "COUNTER" => Ok(VariableKind::Counter),
            "TIMER" => Ok(VariableKind::Timer),
            other => Err(format!("unknown variable kind '{}'", other)),
        }
    }
}

/// Variable group category; decides the default poll pace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Setting,
    Counting,
    Checking,
    Alarm,
    Status,
}

impl Category {
    pub const FAST_INTERVAL: Duration = Duration::from_millis(100);
    pub const SLOW_INTERVAL: Duration = Duration::from_secs(10);

    /// Pause between two variables of a group
    pub fn default_interval(&self) -> Duration {
        match self {
            Category::Setting => Self::SLOW_INTERVAL,
            Category::Counting | Category::Checking | Category::Alarm | Category::Status => {
                Self::FAST_INTERVAL
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Setting => "Setting",
            Category::Counting => "Counting",
            Category::Checking => "Checking",
            Category::Alarm => "Alarm",
            Category::Status => "Status",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One polled address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub address: String,
    pub kind: VariableKind,
    pub name: String,
    /// Element count passed to the link (string length, array size)
    #[serde(default = "default_count")]
    pub count: u16,
    /// Last value seen by the owning poll task
    #[serde(skip)]
    pub last_value: Option<Value>,
}

fn default_count() -> u16 {
    1
}

impl Variable {
    pub fn new(address: impl Into<String>, kind: VariableKind, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            kind,
            name: name.into(),
            count: 1,
            last_value: None,
        }
    }

    /// Record `value`; true when it differs from the previous one
    pub fn observe(&mut self, value: &Value) -> bool {
        if self.last_value.as_ref() == Some(value) {
            return false;
        }
        self.last_value = Some(value.clone());
        true
    }
}

/// Variables polled together by one task
#[derive(Debug, Clone, PartialEq)]
pub struct VariableGroup {
    pub name: String,
    pub category: Category,
    /// Device the group is read from
    pub device: String,
    pub interval: Option<Duration>,
    /// Deployment-specific factor applied before publishing (e.g. 0.01)
    pub scale: Option<f64>,
    pub variables: Vec<Variable>,
}

impl VariableGroup {
    pub fn new(name: impl Into<String>, category: Category, device: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category,
            device: device.into(),
            interval: None,
            scale: None,
            variables: Vec::new(),
        }
    }

    pub fn with_variables(mut self, variables: Vec<Variable>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.interval
            .unwrap_or_else(|| self.category.default_interval())
    }

    pub fn publish_value(&self, raw: &Value) -> Value {
        match self.scale {
            Some(factor) => raw.scaled(factor),
            None => raw.clone(),
        }
    }
}

/// Machine classification; the discriminant is the published wire value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineStatus {
    On = 0,
    Run = 1,
    Idle = 2,
    Alarm = 3,
    Setup = 4,
    Off = 5,
    Ready = 6,
    WifiDisconnected = 7,
    EthernetDisconnected = 8,
}

impl MachineStatus {
    /// Telemetry name the status is published under
    pub const TELEMETRY_NAME: &'static str = "machineStatus";

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => MachineStatus::On,
            1 => MachineStatus::Run,
            2 => MachineStatus::Idle,
            3 => MachineStatus::Alarm,
            4 => MachineStatus::Setup,
            5 => MachineStatus::Off,
            6 => MachineStatus::Ready,
            7 => MachineStatus::WifiDisconnected,
            8 => MachineStatus::EthernetDisconnected,
            _ => return None,
        })
    }

    pub fn value(self) -> Value {
        Value::Int(self.code())
    }

    /// Connectivity markers are not machine states and never become `previous`
    pub fn is_connectivity(self) -> bool {
        matches!(
            self,
            MachineStatus::WifiDisconnected | MachineStatus::EthernetDisconnected
        )
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// A telemetry sample kept while the uplink is down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedRecord {
    pub name: String,
    pub value: Value,
    pub timestamp: String,
}

impl BufferedRecord {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: now_timestamp(),
        }
    }
}

/// A detected change on its way to the uplink
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub name: String,
    pub address: String,
    pub value: Value,
    pub category: Category,
}

impl Telemetry {
    /// `(topic, metric)` the sample is published under
    ///
    /// Alarms use the variable name as topic and the device address as metric.
    pub fn route(&self) -> (&str, &str) {
        match self.category {
            Category::Alarm => (&self.name, &self.address),
            _ => (&self.name, &self.name),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_value_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-3).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::Text(String::new()).is_truthy());
        assert!(Value::from("on").is_truthy());
    }

    #[test]
    fn test_value_json_is_plain_scalar() {
        assert_eq!(serde_json::to_string(&Value::Int(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&Value::Bool(false)).unwrap(), "false");
        assert_eq!(serde_json::from_str::<Value>("1.5").unwrap(), Value::Float(1.5));
        assert_eq!(serde_json::from_str::<Value>("7").unwrap(), Value::Int(7));
        assert_eq!(
            serde_json::from_str::<Value>("\"LOT-7\"").unwrap(),
            Value::from("LOT-7")
        );
    }

    #[test]
    fn test_scaling() {
        let group = VariableGroup::new("settings", Category::Setting, "plc").with_scale(0.01);
        assert_eq!(group.publish_value(&Value::Int(2550)), Value::Float(25.5));
        assert_eq!(group.publish_value(&Value::Bool(true)), Value::Bool(true));
    }

    #[test]
    fn test_poll_interval_defaults() {
        let setting = VariableGroup::new("s", Category::Setting, "plc");
        assert_eq!(setting.poll_interval(), Duration::from_secs(10));
        let alarm = VariableGroup::new("a", Category::Alarm, "plc");
        assert_eq!(alarm.poll_interval(), Duration::from_millis(100));
        let custom = alarm.with_interval(Duration::from_millis(500));
        assert_eq!(custom.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_variable_observe_detects_changes() {
        let mut var = Variable::new("D100", VariableKind::Word, "spindleSpeed");
        assert!(var.observe(&Value::Int(10)));
        assert!(!var.observe(&Value::Int(10)));
        assert!(var.observe(&Value::Int(11)));
        assert_eq!(var.last_value, Some(Value::Int(11)));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("bit".parse::<VariableKind>().unwrap(), VariableKind::Bit);
        assert_eq!(" DWORD ".parse::<VariableKind>().unwrap(), VariableKind::DWord);
        assert_eq!("float".parse::<VariableKind>().unwrap(), VariableKind::Real);
        assert!("blob".parse::<VariableKind>().is_err());
        assert_eq!(
            serde_json::to_string(&VariableKind::DWord).unwrap(),
            "\"DWORD\""
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(MachineStatus::On.code(), 0);
        assert_eq!(MachineStatus::EthernetDisconnected.code(), 8);
        for code in 0..=8 {
            assert_eq!(MachineStatus::from_code(code).unwrap().code(), code);
        }
        assert_eq!(MachineStatus::from_code(9), None);
        assert!(MachineStatus::WifiDisconnected.is_connectivity());
        assert!(!MachineStatus::Run.is_connectivity());
    }

    #[test]
    fn test_record_timestamp_has_microseconds() {
        let record = BufferedRecord::new("counter", Value::Int(1));
        let (_, fraction) = record.timestamp.rsplit_once('.').unwrap();
        assert_eq!(fraction.len(), 6);
        assert!(chrono::NaiveDateTime::parse_from_str(&record.timestamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_alarm_routed_by_variable_topic() {
        let mut telemetry = Telemetry {
            name: "doorOpen".to_string(),
            address: "X0".to_string(),
            value: Value::Bool(true),
            category: Category::Alarm,
        };
        assert_eq!(telemetry.route(), ("doorOpen", "X0"));

        telemetry.category = Category::Counting;
        assert_eq!(telemetry.route(), ("doorOpen", "doorOpen"));
    }
}
