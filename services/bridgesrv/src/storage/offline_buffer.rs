//! Store-and-forward buffer for telemetry produced while the uplink is down
//!
//! One JSON object per line (`name`, `value`, `timestamp`). All operations hold
//! the same async lock, so an append is either fully before or fully after a
//! drain.
//!
//! `drain_and_clear` removes the file as soon as it has been read, before the
//! caller has replayed anything: a crash between the two loses the drained
//! records (at-most-once across restarts). Within a running process the caller
//! hands failed records back through `restore`.

use crate::core::types::BufferedRecord;
use crate::error::{BridgeSrvError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct OfflineBuffer {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OfflineBuffer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync it to disk
    pub async fn append(&self, record: &BufferedRecord) -> Result<()> {
        let line = encode(record)?;
        let _guard = self.lock.lock().await;
        self.write_line(&line).await?;
        debug!("Buffered {} = {}", record.name, record.value);
        Ok(())
    }

    /// All records in insertion order; the store is empty afterwards
    pub async fn drain_and_clear(&self) -> Result<Vec<BufferedRecord>> {
        let _guard = self.lock.lock().await;

        let records = match self.read_records().await? {
            Some(records) => records,
            None => return Ok(Vec::new()),
        };
        fs::remove_file(&self.path).await?;

        if !records.is_empty() {
            info!(
                "Drained {} buffered records from {}",
                records.len(),
                self.path.display()
            );
        }
        Ok(records)
    }

    /// Put records back in front of anything appended since the drain
    pub async fn restore(&self, records: &[BufferedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut content = String::new();
        for record in records {
            content.push_str(&encode(record)?);
        }

        let _guard = self.lock.lock().await;
        if let Some(existing) = self.read_raw().await? {
            content.push_str(&existing);
            if !content.ends_with('\n') {
                content.push('\n');
            }
        }

        let tmp = self.path.with_extension("restore");
        fs::write(&tmp, content.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;
        warn!("Restored {} records to the offline buffer", records.len());
        Ok(())
    }

    /// Number of decodable records currently stored
    pub async fn len(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        Ok(self.read_records().await?.map_or(0, |r| r.len()))
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn read_raw(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_records(&self) -> Result<Option<Vec<BufferedRecord>>> {
        let Some(content) = self.read_raw().await? else {
            return Ok(None);
        };

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<BufferedRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping undecodable line {} of {}: {}",
                    index + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(Some(records))
    }
}

fn encode(record: &BufferedRecord) -> Result<String> {
    let mut line = serde_json::to_string(record)
        .map_err(|e| BridgeSrvError::Buffer(format!("encode {}: {}", record.name, e)))?;
    line.push('\n');
    Ok(line)
}
