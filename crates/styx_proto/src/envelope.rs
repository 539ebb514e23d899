//! Binary envelope: one per transport record.
//!
//! Layout (little-endian):
//!
//! ```text
//! MAGIC "STYX" (4) | VERSION (1) = 1 | KIND (1) | HEADER_LEN (2) | HEADER | BODY
//! ```
//!
//! The header carries routing hints or key-exchange metadata; the body is
//! ciphertext and runs to the end of the record. The whole record must be
//! resident; there is no streaming decode.

use styx_crypto::hash;

use crate::error::ProtoError;

pub const MAGIC: [u8; 4] = *b"STYX";
pub const VERSION: u8 = 1;
/// Magic + version + kind + header length.
pub const FIXED_LEN: usize = 8;
pub const MAX_HEADER_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Message,
    KeyExchange,
    Receipt,
    File,
    Typing,
}

impl EnvelopeKind {
    pub fn code(self) -> u8 {
        match self {
            Self::Message => 1,
            Self::KeyExchange => 2,
            Self::Receipt => 3,
            Self::File => 4,
            Self::Typing => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Message),
            2 => Some(Self::KeyExchange),
            3 => Some(Self::Receipt),
            4 => Some(Self::File),
            5 => Some(Self::Typing),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::KeyExchange => "key-exchange",
            Self::Receipt => "receipt",
            Self::File => "file",
            Self::Typing => "typing",
        }
    }
}

impl std::str::FromStr for EnvelopeKind {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Self::Message),
            "key-exchange" => Ok(Self::KeyExchange),
            "receipt" => Ok(Self::Receipt),
            "file" => Ok(Self::File),
            "typing" => Ok(Self::Typing),
            other => Err(ProtoError::MalformedEnvelope(format!("unknown kind {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: u8,
    pub kind: EnvelopeKind,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, header: Vec<u8>, body: Vec<u8>) -> Self {
        Self { version: VERSION, kind, header, body }
    }

    pub fn encoded_len(&self) -> usize {
        FIXED_LEN + self.header.len() + self.body.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        if self.version != VERSION {
            return Err(ProtoError::MalformedEnvelope(format!(
                "only version {VERSION} can be encoded, got {}",
                self.version
            )));
        }
        let header_len = u16::try_from(self.header.len()).map_err(|_| {
            ProtoError::MalformedEnvelope(format!(
                "header of {} bytes exceeds {MAX_HEADER_LEN}",
                self.header.len()
            ))
        })?;

        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&MAGIC);
        out.push(self.version);
        out.push(self.kind.code());
        out.extend_from_slice(&header_len.to_le_bytes());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < FIXED_LEN {
            return Err(ProtoError::MalformedEnvelope(format!(
                "record of {} bytes is shorter than {FIXED_LEN}",
                buf.len()
            )));
        }
        if buf[0..4] != MAGIC {
            return Err(ProtoError::MalformedEnvelope("bad magic".into()));
        }
        let version = buf[4];
        if version != VERSION {
            return Err(ProtoError::MalformedEnvelope(format!("unsupported version {version}")));
        }
        let kind = EnvelopeKind::from_code(buf[5])
            .ok_or_else(|| ProtoError::MalformedEnvelope(format!("unknown kind {}", buf[5])))?;
        let header_len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
        let header_end = FIXED_LEN + header_len;
        if header_end > buf.len() {
            return Err(ProtoError::MalformedEnvelope(format!(
                "header length {header_len} exceeds remaining {} bytes",
                buf.len() - FIXED_LEN
            )));
        }

        Ok(Self {
            version,
            kind,
            header: buf[FIXED_LEN..header_end].to_vec(),
            body: buf[header_end..].to_vec(),
        })
    }
}

/// Content-derived id of an encoded envelope, used for dedupe.
pub fn message_id(encoded: &[u8]) -> String {
    hash::message_id(encoded)
}
