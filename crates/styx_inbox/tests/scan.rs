mod common;

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use common::{rails, MemoryLog, WIDE_PROGRAM};
use styx_crypto::CryptoError;
use styx_inbox::{
    plaintext_body, prepare_records, submit_records, InboxConfig, InboxError, InboxRecord,
    InboxScanner, OutboundMessage, RawInstruction, RawRecord, RetryPolicy, ScanRequest,
    TransportError, UndecodedReason,
};
use styx_proto::{encode_narrow, Envelope, EnvelopeKind, RailPreference};
use styx_store::{CursorStore, MemoryStore};

fn config() -> InboxConfig {
    InboxConfig { rails: rails(), ..InboxConfig::default() }
}

fn clear(pt: &[u8]) -> Result<Vec<u8>, CryptoError> {
    Ok(pt.to_vec())
}

fn narrow_only() -> bool {
    false
}

async fn send(log: &MemoryLog, text: &[u8], max_chunk: usize) -> Vec<String> {
    let msg = OutboundMessage::new(EnvelopeKind::Message, "text/plain", max_chunk);
    let records = prepare_records(text, &msg, &clear, &narrow_only, &rails()).unwrap();
    submit_records(log, &records, &RetryPolicy::immediate(1)).await.unwrap()
}

#[tokio::test]
async fn chunked_message_reassembles_once() {
    let log = Arc::new(MemoryLog::new());
    let store = Arc::new(MemoryStore::new());
    let ids = send(&log, b"the quick brown fox jumps over the lazy dog", 8).await;
    assert_eq!(ids.len(), 6);

    let scanner = InboxScanner::new(log.clone(), config())
        .with_store(store.clone())
        .with_retry(RetryPolicy::immediate(2));

    let report = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert_eq!(report.assembled.len(), 1);
    assert_eq!(report.assembled[0].bytes, b"the quick brown fox jumps over the lazy dog");
    assert_eq!(report.assembled[0].content_type, "text/plain");
    assert!(report.plain.is_empty());
    assert!(report.pending_frames.is_empty());
    assert_eq!(report.cursor.as_deref(), Some(ids[5].as_str()));
    assert_eq!(store.get_cursor("bob").await.unwrap(), report.cursor);

    let again = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert!(again.assembled.is_empty());
    assert!(again.plain.is_empty());
    assert_eq!(again.fetched, 0);
    assert_eq!(again.cursor, report.cursor);
}

#[tokio::test]
async fn duplicate_envelopes_deliver_once_without_store() {
    let log = Arc::new(MemoryLog::new());
    let env = Envelope::new(EnvelopeKind::Message, vec![], b"hello".to_vec()).encode().unwrap();
    let narrow = rails().narrow_program;
    log.push(&narrow, encode_narrow(&env).into_bytes()).await;
    log.push(&narrow, encode_narrow(&env).into_bytes()).await;

    let scanner = InboxScanner::new(log.clone(), config());
    let report = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert_eq!(report.plain.len(), 1);
    assert_eq!(report.plain[0].plaintext, b"hello");
    assert_eq!(report.plain[0].record.signature, "sig-0001");
    assert_eq!(report.duplicates, 1);

    // Without a store the next scan is a full rescan.
    let rescan = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert_eq!(rescan.plain.len(), 1);
}

#[tokio::test]
async fn seen_messages_are_skipped_across_scans() {
    let log = Arc::new(MemoryLog::new());
    let store = Arc::new(MemoryStore::new());
    let scanner = InboxScanner::new(log.clone(), config()).with_store(store.clone());

    let env = Envelope::new(EnvelopeKind::Message, vec![], b"once".to_vec()).encode().unwrap();
    let narrow = rails().narrow_program;
    log.push(&narrow, encode_narrow(&env).into_bytes()).await;
    let first = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert_eq!(first.plain.len(), 1);

    // Same envelope re-posted under a new record id.
    log.push(&narrow, encode_narrow(&env).into_bytes()).await;
    let second = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert!(second.plain.is_empty());
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.cursor.as_deref(), Some("sig-0002"));
}

#[tokio::test]
async fn bad_records_are_contained() {
    let log = Arc::new(MemoryLog::new());
    let narrow = rails().narrow_program;

    let good = Envelope::new(EnvelopeKind::Message, vec![], b"fine".to_vec()).encode().unwrap();
    let secret = Envelope::new(EnvelopeKind::Message, b"locked".to_vec(), b"??".to_vec())
        .encode()
        .unwrap();
    log.push(&narrow, b"styx1:%%%".to_vec()).await;
    log.push(&narrow, encode_narrow(b"NOTANENVELOPE").into_bytes()).await;
    log.push("Vote111111111111111111111111111111111111111", b"unrelated".to_vec()).await;
    log.push(&narrow, encode_narrow(&secret).into_bytes()).await;
    let last = log.push(&narrow, encode_narrow(&good).into_bytes()).await;

    let decrypt = |record: &InboxRecord, _: &[u8]| -> Option<Vec<u8>> {
        let env = record.envelope.as_ref()?;
        (env.header != b"locked").then(|| env.body.clone())
    };
    let store = Arc::new(MemoryStore::new());
    let scanner = InboxScanner::new(log.clone(), config()).with_store(store.clone());
    let report = scanner.scan(ScanRequest::new("bob"), &decrypt).await.unwrap();

    assert_eq!(report.plain.len(), 1);
    assert_eq!(report.plain[0].plaintext, b"fine");
    assert_eq!(report.ignored, 1);
    let reasons: Vec<_> = report.undecoded.iter().map(|u| &u.reason).collect();
    assert!(matches!(reasons[0], UndecodedReason::MalformedRecord(_)));
    assert!(matches!(reasons[1], UndecodedReason::MalformedEnvelope(_)));
    assert_eq!(reasons[2], &UndecodedReason::DecryptFailed);
    assert_eq!(report.cursor.as_deref(), Some(last.as_str()));
}

#[tokio::test]
async fn split_delivery_completes_on_later_scan() {
    let log = Arc::new(MemoryLog::new());
    let msg = OutboundMessage::new(EnvelopeKind::Message, "text/plain", 5);
    let records = prepare_records(b"0123456789abcde", &msg, &clear, &narrow_only, &rails()).unwrap();
    assert_eq!(records.len(), 3);

    let store = Arc::new(MemoryStore::new());
    let scanner = InboxScanner::new(log.clone(), config()).with_store(store.clone());

    submit_records(&*log, &records[..2], &RetryPolicy::immediate(1)).await.unwrap();
    let first = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert!(first.assembled.is_empty());
    assert_eq!(first.pending_frames.len(), 2);

    submit_records(&*log, &records[2..], &RetryPolicy::immediate(1)).await.unwrap();
    let second = scanner
        .scan(
            ScanRequest::new("bob").with_pending_frames(first.pending_frames),
            &plaintext_body,
        )
        .await
        .unwrap();
    assert_eq!(second.fetched, 1);
    assert_eq!(second.assembled.len(), 1);
    assert_eq!(second.assembled[0].bytes, b"0123456789abcde");
    assert!(second.pending_frames.is_empty());
}

#[tokio::test]
async fn wide_records_are_scanned() {
    let log = Arc::new(MemoryLog::new());
    let mut msg = OutboundMessage::new(EnvelopeKind::File, "application/octet-stream", 512);
    msg.preference = RailPreference::Wide { strict: true };
    msg.recipient = Some([4; 32]);
    let wide = || true;
    let records = prepare_records(&[1u8; 100], &msg, &clear, &wide, &rails()).unwrap();
    submit_records(&*log, &records, &RetryPolicy::immediate(1)).await.unwrap();

    let scanner = InboxScanner::new(log.clone(), config());
    let report = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert_eq!(report.plain.len(), 1);
    let record = &report.plain[0].record;
    assert_eq!(record.rail, styx_proto::Rail::Wide);
    assert_eq!(record.recipient, Some([4; 32]));
    assert_eq!(record.envelope.as_ref().unwrap().kind, EnvelopeKind::File);
    assert_eq!(report.plain[0].plaintext, vec![1u8; 100]);
}

#[tokio::test]
async fn summaries_are_filled_in_with_bounded_fetches() {
    let log = Arc::new(MemoryLog { summaries_only: true, ..MemoryLog::new() });
    for i in 0..10u8 {
        let env = Envelope::new(EnvelopeKind::Message, vec![], vec![i]).encode().unwrap();
        log.push(&rails().narrow_program, encode_narrow(&env).into_bytes()).await;
    }
    let cfg = InboxConfig { detail_concurrency: 3, ..config() };
    let scanner = InboxScanner::new(log.clone(), cfg);
    let report = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();

    assert_eq!(log.detail_calls.load(Ordering::SeqCst), 10);
    let bodies: Vec<u8> = report.plain.iter().map(|p| p.plaintext[0]).collect();
    assert_eq!(bodies, (0..10).collect::<Vec<u8>>());
}

#[tokio::test]
async fn listing_pages_back_to_the_cursor() {
    let log = Arc::new(MemoryLog::new());
    send(&log, b"a", 64).await;
    send(&log, b"b", 64).await;
    send(&log, b"c", 64).await;

    let store = Arc::new(MemoryStore::new());
    let cfg = InboxConfig { limit: 2, ..config() };
    let scanner = InboxScanner::new(log.clone(), cfg).with_store(store.clone());
    let report = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    let texts: Vec<_> = report.plain.iter().map(|p| p.plaintext.clone()).collect();
    assert_eq!(texts, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(report.fetched, 3);
    // [c, b] is a full page, [a] a short one.
    assert_eq!(log.list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.cursor.as_deref(), Some("sig-0003"));

    send(&log, b"d", 64).await;
    send(&log, b"e", 64).await;
    send(&log, b"f", 64).await;
    let next = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    let texts: Vec<_> = next.plain.iter().map(|p| p.plaintext.clone()).collect();
    assert_eq!(texts, vec![b"d".to_vec(), b"e".to_vec(), b"f".to_vec()]);
    assert_eq!(next.cursor.as_deref(), Some("sig-0006"));

    let idle = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert!(idle.plain.is_empty());
    assert_eq!(idle.fetched, 0);
}

#[tokio::test]
async fn paging_stops_when_the_log_ignores_before() {
    let log = Arc::new(MemoryLog { ignore_before: true, ..MemoryLog::new() });
    for body in [b"1", b"2", b"3"] {
        send(&log, body, 64).await;
    }
    let cfg = InboxConfig { limit: 2, ..config() };
    let report = InboxScanner::new(log.clone(), cfg)
        .scan(ScanRequest::new("bob"), &plaintext_body)
        .await
        .unwrap();
    assert_eq!(log.list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.fetched, 2);
}

#[tokio::test]
async fn oldest_incomplete_groups_are_evicted() {
    let log = Arc::new(MemoryLog::new());
    let msg = OutboundMessage::new(EnvelopeKind::Message, "text/plain", 4);
    let first = prepare_records(b"aaaabbbbcccc", &msg, &clear, &narrow_only, &rails()).unwrap();
    let second = prepare_records(b"xxxxyyyyzzzz", &msg, &clear, &narrow_only, &rails()).unwrap();
    assert_eq!((first.len(), second.len()), (3, 3));
    submit_records(&*log, &first[..2], &RetryPolicy::immediate(1)).await.unwrap();
    submit_records(&*log, &second[..2], &RetryPolicy::immediate(1)).await.unwrap();

    let store = Arc::new(MemoryStore::new());
    let cfg = InboxConfig { max_pending_frames: 2, ..config() };
    let scanner = InboxScanner::new(log.clone(), cfg).with_store(store);
    let report = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert!(report.assembled.is_empty());
    assert_eq!(report.dropped_frames, 2);
    assert_eq!(report.pending_frames.len(), 2);
    let kept = report.pending_frames[0].msg_id().to_string();
    assert!(report.pending_frames.iter().all(|f| f.msg_id() == kept));

    submit_records(&*log, &second[2..], &RetryPolicy::immediate(1)).await.unwrap();
    let done = scanner
        .scan(ScanRequest::new("bob").with_pending_frames(report.pending_frames), &plaintext_body)
        .await
        .unwrap();
    assert_eq!(done.assembled.len(), 1);
    assert_eq!(done.assembled[0].bytes, b"xxxxyyyyzzzz");
    assert!(done.pending_frames.is_empty());
    assert_eq!(done.dropped_frames, 0);
}

#[tokio::test]
async fn transient_list_failures_are_retried() {
    let log = Arc::new(MemoryLog { transient_list_failures: AtomicU32::new(2), ..MemoryLog::new() });
    send(&log, b"hi", 64).await;
    let scanner = InboxScanner::new(log.clone(), config()).with_retry(RetryPolicy::immediate(4));
    let report = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert_eq!(report.plain.len(), 1);
    assert_eq!(log.list_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn fatal_list_failure_surfaces_and_keeps_cursor() {
    let log = Arc::new(MemoryLog { fatal_list: true, ..MemoryLog::new() });
    let store = Arc::new(MemoryStore::new());
    store.set_cursor("bob", "sig-0007").await.unwrap();
    let scanner = InboxScanner::new(log.clone(), config())
        .with_store(store.clone())
        .with_retry(RetryPolicy::immediate(4));

    let err = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap_err();
    assert!(matches!(err, InboxError::Transport(TransportError::Fatal(_))));
    assert_eq!(log.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get_cursor("bob").await.unwrap().as_deref(), Some("sig-0007"));
}

#[tokio::test]
async fn cancellation_stops_between_records() {
    let log = Arc::new(MemoryLog::new());
    for body in [b"1", b"2", b"3"] {
        send(&log, body, 64).await;
    }
    let store = Arc::new(MemoryStore::new());
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    // Ask to stop as soon as the first record is decrypted.
    let decrypt = move |record: &InboxRecord, bytes: &[u8]| -> Option<Vec<u8>> {
        flag.store(true, Ordering::SeqCst);
        plaintext_body(record, bytes)
    };

    let scanner = InboxScanner::new(log.clone(), config()).with_store(store.clone());
    let report = scanner
        .scan(ScanRequest::new("bob").with_cancel(cancel.clone()), &decrypt)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.plain.len(), 1);
    assert_eq!(report.cursor.as_deref(), Some("sig-0001"));
    assert_eq!(store.get_cursor("bob").await.unwrap().as_deref(), Some("sig-0001"));

    cancel.store(false, Ordering::SeqCst);
    let rest = scanner
        .scan(ScanRequest::new("bob"), &plaintext_body)
        .await
        .unwrap();
    assert_eq!(rest.plain.len(), 2);
    assert_eq!(rest.cursor.as_deref(), Some("sig-0003"));
}

#[tokio::test]
async fn records_without_styx_rail_still_move_the_cursor() {
    let log = Arc::new(MemoryLog::new());
    log.push_raw(RawRecord {
        id: "foreign".into(),
        slot: 1,
        sender: None,
        instructions: Some(vec![RawInstruction { program: WIDE_PROGRAM.into(), data: vec![] }]),
    })
    .await;
    assert_eq!(log.len().await, 1);

    // Wide rail not configured for this scanner: the record is foreign.
    let store = Arc::new(MemoryStore::new());
    let scanner = InboxScanner::new(log.clone(), InboxConfig::default()).with_store(store.clone());
    let report = scanner.scan(ScanRequest::new("bob"), &plaintext_body).await.unwrap();
    assert_eq!(report.ignored, 1);
    assert!(report.undecoded.is_empty());
    assert_eq!(store.get_cursor("bob").await.unwrap().as_deref(), Some("foreign"));
}
