//! Inbox scan pipeline.
//!
//! One call to [`InboxScanner::scan`] runs
//! fetch → extract → dedupe → decrypt → frame-classify → assemble → persist.
//!
//! Per-record problems never fail the scan: they land in
//! [`ScanReport::undecoded`]. Only transport reads (after retry) and store
//! access can fail the call, in which case nothing is persisted.
//!
//! Seen-set writes and the cursor are persisted together at the end, for
//! exactly the records that were processed. A cancelled scan persists the
//! prefix it got through.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use styx_proto::{
    assemble_complete, decode_frame, decode_narrow, message_id, AssembledMessage, ChunkFrame,
    Envelope, ProtoError, Rail, RailConfig, WideRecord,
};
use styx_store::{CursorStore, SeenKey};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    config::{InboxConfig, RetryPolicy},
    error::{InboxError, TransportError},
    retry::retry_transport,
    transport::{ListQuery, RawRecord, TransportLog},
};

/// A transport record recognised as carrying a Styx envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxRecord {
    /// Transport record id.
    pub signature: String,
    pub slot: u64,
    pub rail: Rail,
    pub sender: Option<String>,
    /// Only wide records name a recipient.
    pub recipient: Option<[u8; 32]>,
    /// Hex BLAKE3 of the raw instruction data.
    pub payload_hash: String,
    pub envelope_bytes: Option<Vec<u8>>,
    pub message_id: Option<String>,
    pub envelope: Option<Envelope>,
}

/// Caller-supplied decryption. `None` means "not for me / cannot open".
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, record: &InboxRecord, envelope_bytes: &[u8]) -> Option<Vec<u8>>;
}

impl<F> Decryptor for F
where
    F: Fn(&InboxRecord, &[u8]) -> Option<Vec<u8>> + Send + Sync,
{
    fn decrypt(&self, record: &InboxRecord, envelope_bytes: &[u8]) -> Option<Vec<u8>> {
        self(record, envelope_bytes)
    }
}

/// Decryptor for unencrypted bodies: hands back the envelope body as is.
pub fn plaintext_body(record: &InboxRecord, _envelope_bytes: &[u8]) -> Option<Vec<u8>> {
    record.envelope.as_ref().map(|env| env.body.clone())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndecodedReason {
    /// The rail was recognised but its payload could not be unwrapped.
    MalformedRecord(String),
    MalformedEnvelope(String),
    DecryptFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodedRecord {
    pub record: InboxRecord,
    pub reason: UndecodedReason,
}

/// Decrypted plaintext that was not a chunk frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainMessage {
    pub record: InboxRecord,
    pub plaintext: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub owner: String,
    /// Incomplete frames returned by the previous scan.
    pub pending_frames: Vec<ChunkFrame>,
    /// Checked between records.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ScanRequest {
    pub fn new(owner: impl Into<String>) -> Self {
        Self { owner: owner.into(), ..Self::default() }
    }

    pub fn with_pending_frames(mut self, frames: Vec<ChunkFrame>) -> Self {
        self.pending_frames = frames;
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub assembled: Vec<AssembledMessage>,
    pub plain: Vec<PlainMessage>,
    pub undecoded: Vec<UndecodedRecord>,
    /// Frames of incomplete groups; pass them to the next scan.
    pub pending_frames: Vec<ChunkFrame>,
    /// Newest fully processed record after this scan.
    pub cursor: Option<String>,
    pub cancelled: bool,
    pub fetched: usize,
    /// Frames of the oldest incomplete groups evicted to respect
    /// `max_pending_frames`.
    pub dropped_frames: usize,
    pub ignored: usize,
    pub duplicates: usize,
}

/// Scan-local bookkeeping.
#[derive(Default)]
struct ScanState {
    frames: Vec<ChunkFrame>,
    delivered: HashSet<String>,
    seen_records: Vec<String>,
    seen_messages: Vec<String>,
    report: ScanReport,
}

pub struct InboxScanner {
    log: Arc<dyn TransportLog>,
    store: Option<Arc<dyn CursorStore>>,
    config: InboxConfig,
    retry: RetryPolicy,
}

impl InboxScanner {
    pub fn new(log: Arc<dyn TransportLog>, config: InboxConfig) -> Self {
        Self { log, store: None, config, retry: RetryPolicy::default() }
    }

    /// Without a store every scan is a full rescan with in-scan dedupe only.
    pub fn with_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn scan(
        &self,
        request: ScanRequest,
        decrypt: &dyn Decryptor,
    ) -> Result<ScanReport, InboxError> {
        let ScanRequest { owner, pending_frames, cancel } = request;

        let previous_cursor = match &self.store {
            Some(store) => store.get_cursor(&owner).await?,
            None => None,
        };

        // ── fetch ────────────────────────────────────────────────────────────
        let listed = self.list_unread(&owner, previous_cursor.as_deref()).await?;
        let fetched = listed.len();
        let records = self.fill_details(listed).await?;
        let records = order_after_cursor(records, previous_cursor.as_deref());

        let mut state = ScanState { frames: pending_frames, ..ScanState::default() };
        state.report.fetched = fetched;

        for raw in &records {
            if cancel.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                state.report.cancelled = true;
                tracing::info!(
                    target: "styx_inbox",
                    event = "scan_cancelled",
                    owner = %owner,
                    processed = state.seen_records.len()
                );
                break;
            }
            self.process(&owner, raw, decrypt, &mut state).await?;
            state.report.cursor = Some(raw.id.clone());
        }

        // ── assemble ─────────────────────────────────────────────────────────
        let assembly = assemble_complete(std::mem::take(&mut state.frames));
        state.report.assembled = assembly.complete;
        let (pending, dropped) = cap_pending(assembly.incomplete, self.config.max_pending_frames);
        if dropped > 0 {
            tracing::warn!(
                target: "styx_inbox",
                event = "pending_frames_dropped",
                owner = %owner,
                dropped,
                kept = pending.len()
            );
        }
        state.report.pending_frames = pending;
        state.report.dropped_frames = dropped;

        // ── persist ──────────────────────────────────────────────────────────
        if let Some(store) = &self.store {
            for id in &state.seen_records {
                store.mark_seen(&owner, SeenKey::Record(id)).await?;
            }
            for id in &state.seen_messages {
                store.mark_seen(&owner, SeenKey::Message(id)).await?;
            }
            if let Some(cursor) = &state.report.cursor {
                store.set_cursor(&owner, cursor).await?;
            }
        }

        let mut report = state.report;
        if report.cursor.is_none() {
            report.cursor = previous_cursor;
        }
        tracing::info!(
            target: "styx_inbox",
            event = "scan_complete",
            owner = %owner,
            fetched = report.fetched,
            assembled = report.assembled.len(),
            plain = report.plain.len(),
            undecoded = report.undecoded.len(),
            pending_frames = report.pending_frames.len(),
            duplicates = report.duplicates,
            ignored = report.ignored,
            cancelled = report.cancelled
        );
        Ok(report)
    }

    /// Every record newer than `since`, paging backwards `limit` at a time.
    ///
    /// Stops on a short page, on a page that contains `since` or on a page
    /// that adds no new records.
    async fn list_unread(
        &self,
        owner: &str,
        since: Option<&str>,
    ) -> Result<Vec<RawRecord>, InboxError> {
        let mut listed: Vec<RawRecord> = Vec::new();
        let mut ids = HashSet::new();
        let mut before: Option<String> = None;
        loop {
            let query = ListQuery {
                owner: owner.to_string(),
                limit: self.config.limit,
                before: before.clone(),
                since: since.map(str::to_string),
            };
            let page = retry_transport(&self.retry, || self.log.list_records(&query)).await?;
            let full = page.len() >= self.config.limit && !page.is_empty();
            let reached_cursor = since.is_some_and(|cursor| page.iter().any(|r| r.id == cursor));
            let oldest = page
                .iter()
                .min_by(|a, b| (a.slot, &a.id).cmp(&(b.slot, &b.id)))
                .map(|r| r.id.clone());

            let mut added = 0usize;
            for record in page {
                if ids.insert(record.id.clone()) {
                    listed.push(record);
                    added += 1;
                }
            }
            tracing::debug!(
                target: "styx_inbox",
                event = "list_page",
                owner = %owner,
                added,
                before = ?query.before
            );

            if !full || reached_cursor {
                break;
            }
            if added == 0 {
                tracing::warn!(target: "styx_inbox", event = "list_no_progress", owner = %owner);
                break;
            }
            before = oldest;
        }
        Ok(listed)
    }

    /// Fetch contents for records the listing returned as bare summaries,
    /// at most `detail_concurrency` at a time.
    async fn fill_details(&self, mut records: Vec<RawRecord>) -> Result<Vec<RawRecord>, InboxError> {
        let missing: Vec<(usize, String)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.instructions.is_none())
            .map(|(i, r)| (i, r.id.clone()))
            .collect();
        if missing.is_empty() {
            return Ok(records);
        }
        tracing::debug!(target: "styx_inbox", event = "fetch_details", count = missing.len());

        let permits = Arc::new(Semaphore::new(self.config.detail_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (idx, id) in missing {
            let log = Arc::clone(&self.log);
            let permits = Arc::clone(&permits);
            let policy = self.retry.clone();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| TransportError::Fatal(e.to_string()))?;
                let detail = retry_transport(&policy, || log.fetch_record(&id)).await?;
                Ok::<_, TransportError>((idx, detail))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (idx, detail) = joined
                .map_err(|e| TransportError::Fatal(format!("detail fetch task: {e}")))??;
            let record = &mut records[idx];
            record.instructions = Some(detail.instructions.unwrap_or_default());
            if record.sender.is_none() {
                record.sender = detail.sender;
            }
        }
        Ok(records)
    }

    async fn has_seen(&self, owner: &str, key: SeenKey<'_>) -> Result<bool, InboxError> {
        match &self.store {
            Some(store) => Ok(store.has_seen(owner, key).await?),
            None => Ok(false),
        }
    }

    async fn process(
        &self,
        owner: &str,
        raw: &RawRecord,
        decrypt: &dyn Decryptor,
        state: &mut ScanState,
    ) -> Result<(), InboxError> {
        // ── extract ──────────────────────────────────────────────────────────
        let Some((mut record, extracted)) = extract(raw, &self.config.rails) else {
            tracing::debug!(target: "styx_inbox", event = "record_ignored", record_id = %raw.id);
            state.report.ignored += 1;
            return Ok(());
        };

        // ── dedupe ───────────────────────────────────────────────────────────
        if self.has_seen(owner, SeenKey::Record(&raw.id)).await? {
            state.report.duplicates += 1;
            return Ok(());
        }
        state.seen_records.push(raw.id.clone());

        let bytes = match extracted {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(
                    target: "styx_inbox",
                    event = "record_malformed",
                    record_id = %raw.id,
                    error = %err
                );
                state.report.undecoded.push(UndecodedRecord {
                    record,
                    reason: UndecodedReason::MalformedRecord(err.to_string()),
                });
                return Ok(());
            }
        };

        let msg_id = message_id(&bytes);
        if state.delivered.contains(&msg_id)
            || self.has_seen(owner, SeenKey::Message(&msg_id)).await?
        {
            tracing::debug!(
                target: "styx_inbox",
                event = "duplicate_message",
                record_id = %raw.id,
                message_id = %msg_id
            );
            state.report.duplicates += 1;
            return Ok(());
        }
        record.message_id = Some(msg_id.clone());
        record.envelope_bytes = Some(bytes.clone());

        match Envelope::decode(&bytes) {
            Ok(envelope) => record.envelope = Some(envelope),
            Err(err) => {
                tracing::warn!(
                    target: "styx_inbox",
                    event = "envelope_malformed",
                    record_id = %raw.id,
                    error = %err
                );
                state.report.undecoded.push(UndecodedRecord {
                    record,
                    reason: UndecodedReason::MalformedEnvelope(err.to_string()),
                });
                return Ok(());
            }
        }

        // ── decrypt ──────────────────────────────────────────────────────────
        let Some(plaintext) = decrypt.decrypt(&record, &bytes) else {
            tracing::debug!(target: "styx_inbox", event = "decrypt_failed", record_id = %raw.id);
            state
                .report
                .undecoded
                .push(UndecodedRecord { record, reason: UndecodedReason::DecryptFailed });
            return Ok(());
        };
        state.delivered.insert(msg_id.clone());
        state.seen_messages.push(msg_id);

        // ── classify ─────────────────────────────────────────────────────────
        match std::str::from_utf8(&plaintext).ok().and_then(decode_frame) {
            Some(frame) => {
                tracing::debug!(
                    target: "styx_inbox",
                    event = "chunk_frame",
                    record_id = %raw.id,
                    msg_id = %frame.msg_id(),
                    index = frame.index(),
                    total = frame.total()
                );
                state.frames.push(frame);
            }
            None => {
                tracing::debug!(target: "styx_inbox", event = "plain_message", record_id = %raw.id);
                state.report.plain.push(PlainMessage { record, plaintext });
            }
        }
        Ok(())
    }
}

/// Ascending `(slot, id)` order, minus duplicates and anything at or before
/// `cursor` when the cursor record is part of the listing.
/// Keep at most `max` frames, evicting whole groups oldest first. Frames
/// arrive in first-seen order, so earlier groups are older.
fn cap_pending(frames: Vec<ChunkFrame>, max: usize) -> (Vec<ChunkFrame>, usize) {
    if frames.len() <= max {
        return (frames, 0);
    }
    let mut groups: Vec<(&str, usize)> = Vec::new();
    for frame in &frames {
        match groups.iter_mut().find(|(id, _)| *id == frame.msg_id()) {
            Some((_, count)) => *count += 1,
            None => groups.push((frame.msg_id(), 1)),
        }
    }
    let mut excess = frames.len() - max;
    let mut evicted = HashSet::new();
    for (id, count) in groups {
        if excess == 0 {
            break;
        }
        evicted.insert(id.to_string());
        excess = excess.saturating_sub(count);
    }
    let before = frames.len();
    let kept: Vec<ChunkFrame> = frames.into_iter().filter(|f| !evicted.contains(f.msg_id())).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

fn order_after_cursor(mut records: Vec<RawRecord>, cursor: Option<&str>) -> Vec<RawRecord> {
    records.sort_by(|a, b| (a.slot, &a.id).cmp(&(b.slot, &b.id)));
    let mut ids = HashSet::new();
    records.retain(|r| ids.insert(r.id.clone()));
    if let Some(cursor) = cursor {
        if let Some(pos) = records.iter().position(|r| r.id == cursor) {
            records.drain(..=pos);
        }
    }
    records
}

/// Recognise the rail of `raw` and unwrap its envelope bytes.
///
/// `None` for records without a Styx instruction. Otherwise the record plus
/// either the envelope bytes or the reason they could not be unwrapped.
pub fn extract(
    raw: &RawRecord,
    rails: &RailConfig,
) -> Option<(InboxRecord, Result<Vec<u8>, ProtoError>)> {
    let instructions = raw.instructions.as_deref()?;
    let (rail, data) = instructions.iter().find_map(|ins| {
        if ins.program == rails.narrow_program {
            Some((Rail::Narrow, &ins.data))
        } else if rails.wide_program.as_deref() == Some(ins.program.as_str()) {
            Some((Rail::Wide, &ins.data))
        } else {
            None
        }
    })?;

    let mut record = InboxRecord {
        signature: raw.id.clone(),
        slot: raw.slot,
        rail,
        sender: raw.sender.clone(),
        recipient: None,
        payload_hash: styx_crypto::hash::payload_hash(data),
        envelope_bytes: None,
        message_id: None,
        envelope: None,
    };

    let bytes = match rail {
        Rail::Narrow => std::str::from_utf8(data)
            .map_err(|e| ProtoError::MalformedRecord(format!("narrow record is not UTF-8: {e}")))
            .and_then(decode_narrow),
        Rail::Wide => WideRecord::decode(data).map(|wide| {
            record.recipient = wide.recipient;
            wide.payload
        }),
    };
    Some((record, bytes))
}
