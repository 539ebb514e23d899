//! Seams to the transport log.
//!
//! The log is an append-only sequence of records, each carrying one or more
//! instructions addressed to a routing target (`program`). Styx records are
//! instructions addressed to the narrow or wide rail program; everything else
//! in the log is foreign and ignored.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    pub program: String,
    #[serde(with = "b64_data")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Transport record id (the transaction signature on chain).
    pub id: String,
    pub slot: u64,
    #[serde(default)]
    pub sender: Option<String>,
    /// `None` when the listing call only returned summaries; the pipeline
    /// then fetches details per record.
    #[serde(default)]
    pub instructions: Option<Vec<RawInstruction>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub owner: String,
    pub limit: usize,
    /// Only records older than this id.
    pub before: Option<String>,
    /// Only records newer than this id.
    pub since: Option<String>,
}

/// Read side of the transport.
#[async_trait]
pub trait TransportLog: Send + Sync {
    /// Newest-first listing of at most `query.limit` records.
    async fn list_records(&self, query: &ListQuery) -> Result<Vec<RawRecord>, TransportError>;

    async fn fetch_record(&self, id: &str) -> Result<RawRecord, TransportError>;
}

/// A record ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingRecord {
    Narrow(String),
    Wide(Vec<u8>),
}

impl OutgoingRecord {
    pub fn len(&self) -> usize {
        match self {
            Self::Narrow(text) => text.len(),
            Self::Wide(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write side of the transport.
#[async_trait]
pub trait TransportWriter: Send + Sync {
    /// Submit one record; returns its transport id.
    async fn submit(&self, record: &OutgoingRecord) -> Result<String, TransportError>;
}

mod b64_data {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD.decode(s).map_err(serde::de::Error::custom)
    }
}
