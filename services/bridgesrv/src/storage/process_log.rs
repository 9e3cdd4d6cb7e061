//! Local CSV log of every detected change

use crate::core::types::{now_timestamp, Telemetry};
use crate::error::Result;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const PROCESS_LOG_HEADER: [&str; 7] = [
    "No.",
    "VarAddr",
    "VarName",
    "VarValue",
    "Timestamp",
    "KindofData",
    "is_ConnectedWifi",
];

#[derive(Debug)]
pub struct ProcessLog {
    path: PathBuf,
    /// Row counter, restarts with the process
    next_no: Arc<Mutex<u64>>,
}

impl ProcessLog {
    /// Open the log, writing the header when the file is new
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if path.exists() {
            info!("Process log {} already exists", path.display());
        } else {
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(PROCESS_LOG_HEADER)?;
            writer.flush()?;
            info!("Process log {} created", path.display());
        }

        Ok(Self {
            path,
            next_no: Arc::new(Mutex::new(0)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row on the blocking pool; `uplink_connected` is written as 0/1
    pub async fn record(&self, telemetry: &Telemetry, uplink_connected: bool) -> Result<()> {
        let path = self.path.clone();
        let next_no = Arc::clone(&self.next_no);
        let fields = [
            telemetry.address.clone(),
            telemetry.name.clone(),
            telemetry.value.to_string(),
            now_timestamp(),
            telemetry.category.to_string(),
            u8::from(uplink_connected).to_string(),
        ];

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut next_no = next_no.lock();
            let file = OpenOptions::new().append(true).open(&path)?;
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            writer.write_field(next_no.to_string())?;
            writer.write_record(&fields)?;
            writer.flush()?;
            *next_no += 1;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::types::{Category, Value};
    use tempfile::TempDir;

    fn telemetry(name: &str, value: Value) -> Telemetry {
        Telemetry {
            name: name.to_string(),
            address: "D100".to_string(),
            value,
            category: Category::Counting,
        }
    }

    #[tokio::test]
    async fn test_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let log = ProcessLog::open(dir.path().join("logs/process.csv")).unwrap();
        log.record(&telemetry("goodParts", Value::Int(12)), true).await.unwrap();
        log.record(&telemetry("goodParts", Value::Int(13)), false).await.unwrap();

        let mut reader = csv::Reader::from_path(log.path()).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, PROCESS_LOG_HEADER);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "0");
        assert_eq!(&rows[0][3], "12");
        assert_eq!(&rows[0][5], "Counting");
        assert_eq!(&rows[0][6], "1");
        assert_eq!(&rows[1][0], "1");
        assert_eq!(&rows[1][6], "0");
    }

    #[tokio::test]
    async fn test_reopen_keeps_single_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("process.csv");
        ProcessLog::open(&path)
            .unwrap()
            .record(&telemetry("x", Value::Bool(true)), true)
            .await
            .unwrap();
        ProcessLog::open(&path)
            .unwrap()
            .record(&telemetry("x", Value::Bool(false)), true)
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("No.,VarAddr").count(), 1);
        assert_eq!(content.lines().count(), 3);
    }
}
