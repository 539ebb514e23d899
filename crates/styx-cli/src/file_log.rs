//! Transport log kept in a local JSON file.
//!
//! The file holds a JSON array of records in append order (oldest first).
//! Useful for demos and for replaying captured logs through the pipeline.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use styx_inbox::{
    ListQuery, OutgoingRecord, RawInstruction, RawRecord, TransportError, TransportLog,
    TransportWriter,
};
use styx_proto::RailConfig;
use tokio::sync::Mutex;

pub struct FileLog {
    path: PathBuf,
    rails: RailConfig,
    write_lock: Mutex<()>,
}

fn io_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Fatal(e.to_string())
}

impl FileLog {
    pub fn new(path: impl Into<PathBuf>, rails: RailConfig) -> Self {
        Self { path: path.into(), rails, write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<RawRecord>, TransportError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(io_error),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_error(e)),
        }
    }
}

#[async_trait]
impl TransportLog for FileLog {
    async fn list_records(&self, query: &ListQuery) -> Result<Vec<RawRecord>, TransportError> {
        let records = self.load().await?;
        let start = query
            .since
            .as_ref()
            .and_then(|since| records.iter().position(|r| &r.id == since))
            .map_or(0, |pos| pos + 1);
        let end = query
            .before
            .as_ref()
            .and_then(|before| records.iter().position(|r| &r.id == before))
            .unwrap_or(records.len())
            .max(start);
        Ok(records[start..end].iter().rev().take(query.limit).cloned().collect())
    }

    async fn fetch_record(&self, id: &str) -> Result<RawRecord, TransportError> {
        self.load()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| TransportError::Fatal(format!("record {id} not in {}", self.path.display())))
    }
}

#[async_trait]
impl TransportWriter for FileLog {
    async fn submit(&self, record: &OutgoingRecord) -> Result<String, TransportError> {
        let _guard = self.write_lock.lock().await;
        let (program, data) = match record {
            OutgoingRecord::Narrow(text) => (self.rails.narrow_program.clone(), text.as_bytes().to_vec()),
            OutgoingRecord::Wide(bytes) => {
                let program = self
                    .rails
                    .wide_program
                    .clone()
                    .ok_or_else(|| TransportError::Fatal("no wide rail program configured".into()))?;
                (program, bytes.clone())
            }
        };

        let mut records = self.load().await?;
        let slot = records.iter().map(|r| r.slot).max().unwrap_or(0) + 1;
        let id = uuid::Uuid::new_v4().simple().to_string();
        records.push(RawRecord {
            id: id.clone(),
            slot,
            sender: None,
            instructions: Some(vec![RawInstruction { program, data }]),
        });
        let json = serde_json::to_vec_pretty(&records).map_err(io_error)?;
        tokio::fs::write(&self.path, json).await.map_err(io_error)?;
        tracing::debug!(target: "styx_cli", event = "record_appended", record_id = %id, slot);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::new(dir.path().join("log.json"), RailConfig::default());

        let a = log.submit(&OutgoingRecord::Narrow("styx1:AA".into())).await.unwrap();
        let b = log.submit(&OutgoingRecord::Narrow("styx1:BB".into())).await.unwrap();
        let c = log.submit(&OutgoingRecord::Narrow("styx1:CC".into())).await.unwrap();

        let query = ListQuery { owner: "bob".into(), limit: 10, before: None, since: None };
        let ids: Vec<_> = log.list_records(&query).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c.clone(), b.clone(), a.clone()]);

        let since = ListQuery { since: Some(a.clone()), ..query.clone() };
        assert_eq!(log.list_records(&since).await.unwrap().len(), 2);

        let before = ListQuery { before: Some(c.clone()), limit: 1, ..query };
        let ids: Vec<_> = log.list_records(&before).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.clone()]);

        assert_eq!(log.fetch_record(&b).await.unwrap().slot, 2);
    }

    #[tokio::test]
    async fn wide_needs_a_program() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::new(dir.path().join("log.json"), RailConfig::default());
        let err = log.submit(&OutgoingRecord::Wide(vec![1])).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
