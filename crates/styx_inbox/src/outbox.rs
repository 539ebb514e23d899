//! Outbound side: plaintext → chunk frames → envelopes → rail records.

use std::cell::OnceCell;

use styx_crypto::CryptoError;
use styx_proto::{
    encode_frame, encode_narrow, frames_for, select_rail, Envelope, EnvelopeKind, Rail,
    RailConfig, RailPreference, WideRailProbe, WideRecord,
};

use crate::{
    config::RetryPolicy,
    error::InboxError,
    retry::retry_transport,
    transport::{OutgoingRecord, TransportWriter},
};

/// Turns envelope plaintext into the envelope body (ciphertext).
pub trait Sealer {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

impl<F> Sealer for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, CryptoError>,
{
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self(plaintext)
    }
}

/// Shape of one outbound message.
#[derive(Debug, Clone)]
pub struct OutboundMessage<'a> {
    pub content_type: &'a str,
    pub kind: EnvelopeKind,
    /// Copied into every envelope's header.
    pub header: Vec<u8>,
    /// Plaintext above this size is split into chunk frames.
    pub max_chunk_bytes: usize,
    pub preference: RailPreference,
    /// Only carried by wide records.
    pub recipient: Option<[u8; 32]>,
}

impl<'a> OutboundMessage<'a> {
    pub fn new(kind: EnvelopeKind, content_type: &'a str, max_chunk_bytes: usize) -> Self {
        Self {
            content_type,
            kind,
            header: Vec::new(),
            max_chunk_bytes,
            preference: RailPreference::Auto,
            recipient: None,
        }
    }
}

/// Probes at most once, however many records ask.
struct OnceProbe<'p> {
    inner: &'p dyn WideRailProbe,
    answer: OnceCell<bool>,
}

impl WideRailProbe for OnceProbe<'_> {
    fn wide_available(&self) -> bool {
        *self.answer.get_or_init(|| self.inner.wide_available())
    }
}

/// Build the records for `plaintext`.
///
/// Plaintext that fits `max_chunk_bytes` travels as is in one envelope;
/// anything larger is split into chunk frames, one envelope each. The wide
/// rail probe result is shared by all records of the message.
pub fn prepare_records(
    plaintext: &[u8],
    message: &OutboundMessage<'_>,
    seal: &dyn Sealer,
    probe: &dyn WideRailProbe,
    config: &RailConfig,
) -> Result<Vec<OutgoingRecord>, InboxError> {
    let payloads: Vec<Vec<u8>> = if plaintext.len() <= message.max_chunk_bytes {
        vec![plaintext.to_vec()]
    } else {
        frames_for(plaintext, message.max_chunk_bytes, message.content_type)?
            .iter()
            .map(|frame| encode_frame(frame).into_bytes())
            .collect()
    };

    let probe = OnceProbe { inner: probe, answer: OnceCell::new() };
    let mut records = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let body = seal.seal(&payload)?;
        let envelope = Envelope::new(message.kind, message.header.clone(), body).encode()?;
        let record = match select_rail(&envelope, message.preference, &probe, config)? {
            Rail::Narrow => OutgoingRecord::Narrow(encode_narrow(&envelope)),
            Rail::Wide => OutgoingRecord::Wide(
                WideRecord::new(message.recipient, envelope).encode(config.max_wide_payload)?,
            ),
        };
        records.push(record);
    }

    tracing::debug!(
        target: "styx_inbox",
        event = "records_prepared",
        count = records.len(),
        plaintext_len = plaintext.len()
    );
    Ok(records)
}

/// Submit records in order, retrying transient failures. Returns the
/// transport ids. Stops at the first record that still fails.
pub async fn submit_records(
    writer: &dyn TransportWriter,
    records: &[OutgoingRecord],
    retry: &RetryPolicy,
) -> Result<Vec<String>, InboxError> {
    let mut ids = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let id = retry_transport(retry, || writer.submit(record)).await.map_err(|err| {
            tracing::warn!(
                target: "styx_inbox",
                event = "submit_failed",
                index,
                submitted = ids.len(),
                error = %err
            );
            err
        })?;
        tracing::debug!(target: "styx_inbox", event = "record_submitted", index, record_id = %id);
        ids.push(id);
    }
    Ok(ids)
}
