//! Key exchange carried end to end: X3DH init header in the envelope header,
//! AEAD-sealed chunk frames in the bodies, reassembled by the responder's scan.

mod common;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use common::{rails, MemoryLog};
use styx_crypto::{
    aead, x3dh, IdentityKeyPair, InitialMessageHeader, PrekeyConfig, PrekeyManager, PublicKey,
    X25519,
};
use styx_inbox::{
    prepare_records, submit_records, InboxConfig, InboxRecord, InboxScanner, OutboundMessage,
    RetryPolicy, ScanRequest,
};
use styx_proto::EnvelopeKind;

struct Session {
    key: [u8; 32],
    associated_data: Vec<u8>,
}

#[tokio::test]
async fn initial_message_is_opened_by_responder() {
    let config = PrekeyConfig {
        one_time_prekey_pool_size: 3,
        one_time_prekey_low_water: 1,
        ..PrekeyConfig::default()
    };
    let bob = Arc::new(PrekeyManager::generate(Arc::new(X25519), config).unwrap());
    let alice = IdentityKeyPair::generate(&X25519);

    // ── Alice ────────────────────────────────────────────────────────────────
    let init = x3dh::initiate(&X25519, &alice, &bob.bundle()).unwrap();
    assert_eq!(init.header.one_time_prekey_id, Some(1));
    let key = init.output.shared_secret;
    let ad = init.output.associated_data.clone();
    let seal = move |pt: &[u8]| aead::encrypt(&key, pt, &ad);

    let plaintext = "a first message long enough to need several chunk frames".repeat(3);
    let mut msg = OutboundMessage::new(EnvelopeKind::KeyExchange, "text/plain", 48);
    msg.header = init.header.to_bytes().unwrap();
    let records = prepare_records(plaintext.as_bytes(), &msg, &seal, &|| false, &rails()).unwrap();
    assert!(records.len() > 1);

    let log = Arc::new(MemoryLog::new());
    submit_records(log.as_ref(), &records, &RetryPolicy::immediate(1)).await.unwrap();

    // ── Bob ──────────────────────────────────────────────────────────────────
    let sessions: Mutex<HashMap<PublicKey, Session>> = Mutex::new(HashMap::new());
    let responder = bob.clone();
    let decrypt = move |record: &InboxRecord, _: &[u8]| -> Option<Vec<u8>> {
        let envelope = record.envelope.as_ref()?;
        let header = InitialMessageHeader::from_bytes(&envelope.header).ok()?;
        let mut sessions = sessions.lock().ok()?;
        if !sessions.contains_key(&header.ephemeral_key) {
            let out = responder.respond(&header).ok()?;
            sessions.insert(
                header.ephemeral_key,
                Session { key: out.shared_secret, associated_data: out.associated_data.clone() },
            );
        }
        let session = sessions.get(&header.ephemeral_key)?;
        aead::decrypt(&session.key, &envelope.body, &session.associated_data)
            .ok()
            .map(|pt| pt.to_vec())
    };

    let config = InboxConfig { rails: rails(), ..InboxConfig::default() };
    let scanner = InboxScanner::new(log.clone(), config);
    let report = scanner.scan(ScanRequest::new("bob"), &decrypt).await.unwrap();

    assert!(report.undecoded.is_empty());
    assert_eq!(report.assembled.len(), 1);
    assert_eq!(report.assembled[0].bytes, plaintext.as_bytes());
    // Exactly one one-time prekey was consumed for the whole message.
    assert_eq!(bob.one_time_prekey_count(), 2);
}
