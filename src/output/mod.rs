use crate::models::CompletedRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Receives completed records; filtering and export happen downstream
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn accept(&self, record: CompletedRecord) -> Result<()>;
}

/// Appends one JSON object per line, optionally mirroring each record to
/// `<raw_dir>/<listing id>.json`
pub struct JsonLinesSink {
    file: tokio::sync::Mutex<File>,
    raw_dir: Option<PathBuf>,
}

impl JsonLinesSink {
    pub async fn create(path: &Path, raw_dir: Option<PathBuf>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open output file {}", path.display()))?;

        if let Some(dir) = &raw_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        Ok(Self {
            file: tokio::sync::Mutex::new(file),
            raw_dir,
        })
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn accept(&self, record: CompletedRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        {
            let mut file = self.file.lock().await;
            file.write_all(line.as_bytes())
                .await
                .context("Failed to append record")?;
            file.flush().await?;
        }

        if let Some(dir) = &self.raw_dir {
            let filename = dir.join(format!("{}.json", record.listing_id));
            let json = serde_json::to_string_pretty(&record)?;
            tokio::fs::write(&filename, json)
                .await
                .with_context(|| format!("Failed to write {}", filename.display()))?;
        }

        Ok(())
    }
}

/// Keeps records in memory
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<CompletedRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CompletedRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn accept(&self, record: CompletedRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fields, ListingId};
    use chrono::Utc;
    use serde_json::json;

    fn record(id: &str) -> CompletedRecord {
        let mut fields = Fields::new();
        fields.insert("name".to_string(), json!("Loft"));
        CompletedRecord {
            listing_id: ListingId::new(id),
            fields,
            partial: false,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_one_line_per_record_and_raw_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let raw = dir.path().join("raw");

        let sink = JsonLinesSink::create(&path, Some(raw.clone())).await.unwrap();
        sink.accept(record("L1")).await.unwrap();
        sink.accept(record("L2")).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["listing_id"], "L2");
        assert_eq!(lines[0]["fields"]["name"], "Loft");
        assert!(raw.join("L1.json").exists());
    }
}
