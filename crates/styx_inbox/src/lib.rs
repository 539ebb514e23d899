//! styx_inbox: moving Styx records to and from a transport log
//!
//! # Modules
//! - `transport`: read/write seams to the log and its raw record shapes
//! - `pipeline`: inbox scan: extract, dedupe, decrypt, reassemble, persist cursor
//! - `outbox`: plaintext to ready-to-submit rail records, and submission
//! - `retry`: bounded exponential backoff with full jitter
//! - `config`: scan, retry and key-maintenance tunables
//! - `error`: inbox and transport error types

pub mod config;
pub mod error;
pub mod outbox;
pub mod pipeline;
pub mod retry;
pub mod transport;

pub use config::{InboxConfig, RetryPolicy, StyxConfig};
pub use error::{InboxError, TransportError};
pub use outbox::{prepare_records, submit_records, OutboundMessage, Sealer};
pub use pipeline::{
    plaintext_body, Decryptor, InboxRecord, InboxScanner, PlainMessage, ScanReport, ScanRequest,
    UndecodedReason, UndecodedRecord,
};
pub use retry::{retry, retry_transport};
pub use transport::{
    ListQuery, OutgoingRecord, RawInstruction, RawRecord, TransportLog, TransportWriter,
};
