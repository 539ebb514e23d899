//! In-memory transport log shared by the integration tests.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use styx_inbox::{
    ListQuery, OutgoingRecord, RawInstruction, RawRecord, TransportError, TransportLog,
    TransportWriter,
};
use styx_proto::RailConfig;
use tokio::sync::Mutex;

pub const WIDE_PROGRAM: &str = "StyxRelay11111111111111111111111111111111111";

pub fn rails() -> RailConfig {
    RailConfig { wide_program: Some(WIDE_PROGRAM.into()), ..RailConfig::default() }
}

#[derive(Default)]
pub struct MemoryLog {
    pub records: Mutex<Vec<RawRecord>>,
    /// List without instructions, forcing per-record detail fetches.
    pub summaries_only: bool,
    /// Fail this many list calls transiently before answering.
    pub transient_list_failures: AtomicU32,
    pub fatal_list: bool,
    /// Answer every list call as if `before` were unset.
    pub ignore_before: bool,
    pub list_calls: AtomicU32,
    pub detail_calls: AtomicU32,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, program: &str, data: Vec<u8>) -> String {
        let mut records = self.records.lock().await;
        let slot = records.len() as u64 + 1;
        let id = format!("sig-{slot:04}");
        records.push(RawRecord {
            id: id.clone(),
            slot,
            sender: Some("alice".into()),
            instructions: Some(vec![RawInstruction { program: program.into(), data }]),
        });
        id
    }

    pub async fn push_raw(&self, record: RawRecord) {
        self.records.lock().await.push(record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl TransportLog for MemoryLog {
    async fn list_records(&self, query: &ListQuery) -> Result<Vec<RawRecord>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fatal_list {
            return Err(TransportError::Fatal("unauthorized".into()));
        }
        let pending = self.transient_list_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_list_failures.store(pending - 1, Ordering::SeqCst);
            return Err(TransportError::Transient("rate limited".into()));
        }

        let records = self.records.lock().await;
        let start = match &query.since {
            Some(since) => records.iter().position(|r| &r.id == since).map_or(0, |p| p + 1),
            None => 0,
        };
        let end = match &query.before {
            Some(before) if !self.ignore_before => {
                records.iter().position(|r| &r.id == before).unwrap_or(records.len())
            }
            _ => records.len(),
        }
        .max(start);
        let mut out: Vec<RawRecord> =
            records[start..end].iter().rev().take(query.limit).cloned().collect();
        if self.summaries_only {
            for record in &mut out {
                record.instructions = None;
            }
        }
        Ok(out)
    }

    async fn fetch_record(&self, id: &str) -> Result<RawRecord, TransportError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| TransportError::Fatal(format!("no record {id}")))
    }
}

#[async_trait]
impl TransportWriter for MemoryLog {
    async fn submit(&self, record: &OutgoingRecord) -> Result<String, TransportError> {
        let id = match record {
            OutgoingRecord::Narrow(text) => {
                self.push(&RailConfig::default().narrow_program, text.clone().into_bytes()).await
            }
            OutgoingRecord::Wide(bytes) => self.push(WIDE_PROGRAM, bytes.clone()).await,
        };
        Ok(id)
    }
}
