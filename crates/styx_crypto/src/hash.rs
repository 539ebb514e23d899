//! BLAKE3-based hash utilities
//!
//! - Deterministic message ids (content-addressed dedupe on the inbox side)
//! - Plain content hashes for payload fingerprints

const MESSAGE_ID_CONTEXT: &str = "styx-msg-id-v1";

/// Deterministic message id: domain-separated BLAKE3 of the encoded envelope,
/// hex-encoded. Identical envelopes observed under different transport record
/// ids map to the same id.
pub fn message_id(envelope_bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(MESSAGE_ID_CONTEXT);
    hasher.update(envelope_bytes);
    hex::encode(hasher.finalize().as_bytes())
}

/// Hex content hash of an arbitrary payload.
pub fn payload_hash(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}
