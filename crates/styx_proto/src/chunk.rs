//! Chunk frames: splitting oversized plaintext across several envelopes.
//!
//! A frame is a single line of text placed in an envelope's plaintext:
//!
//! ```text
//! styx-chunk-v1|<msgId>|<index>|<total>|<contentType>|<base64url(chunk)>
//! ```
//!
//! Frames are stateless. Grouping and ordering are rebuilt from frame content
//! alone, never from transport order, so frames may arrive in any order and
//! across several scans.
//!
//! Text that does not parse as a frame is simply "not a frame"; decoding
//! never fails loudly.

use std::collections::{BTreeMap, HashMap};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::ProtoError;

pub const FRAME_TAG: &str = "styx-chunk-v1";
const DELIMITER: char = '|';
const FIELD_COUNT: usize = 6;

/// One piece of a split plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    msg_id: String,
    index: u32,
    total: u32,
    content_type: String,
    bytes: Vec<u8>,
}

fn valid_token(s: &str) -> bool {
    !s.is_empty() && !s.contains(DELIMITER)
}

impl ChunkFrame {
    pub fn new(
        msg_id: impl Into<String>,
        index: u32,
        total: u32,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, ProtoError> {
        let msg_id = msg_id.into();
        let content_type = content_type.into();
        if !valid_token(&msg_id) {
            return Err(ProtoError::ChunkFrameInvalid(format!("bad msg id {msg_id:?}")));
        }
        if !valid_token(&content_type) {
            return Err(ProtoError::ChunkFrameInvalid(format!(
                "bad content type {content_type:?}"
            )));
        }
        if total == 0 || index >= total {
            return Err(ProtoError::ChunkFrameInvalid(format!(
                "index {index} out of range for total {total}"
            )));
        }
        Ok(Self { msg_id, index, total, content_type, bytes })
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Ceiling-divide `bytes` into chunks of at most `max_chunk_bytes`.
///
/// Input that already fits, including empty input, yields one chunk.
pub fn split(bytes: &[u8], max_chunk_bytes: usize) -> Result<Vec<Vec<u8>>, ProtoError> {
    if max_chunk_bytes == 0 {
        return Err(ProtoError::ChunkFrameInvalid("chunk size must be at least 1".into()));
    }
    if bytes.len() <= max_chunk_bytes {
        return Ok(vec![bytes.to_vec()]);
    }
    Ok(bytes.chunks(max_chunk_bytes).map(<[u8]>::to_vec).collect())
}

/// Split `bytes` and wrap every chunk in a frame sharing `msg_id`.
pub fn frames_with_id(
    msg_id: &str,
    bytes: &[u8],
    max_chunk_bytes: usize,
    content_type: &str,
) -> Result<Vec<ChunkFrame>, ProtoError> {
    let chunks = split(bytes, max_chunk_bytes)?;
    let total = u32::try_from(chunks.len())
        .map_err(|_| ProtoError::ChunkFrameInvalid("too many chunks".into()))?;
    chunks
        .into_iter()
        .zip(0u32..)
        .map(|(chunk, index)| ChunkFrame::new(msg_id, index, total, content_type, chunk))
        .collect()
}

/// Like [`frames_with_id`] with a freshly generated message id.
pub fn frames_for(
    bytes: &[u8],
    max_chunk_bytes: usize,
    content_type: &str,
) -> Result<Vec<ChunkFrame>, ProtoError> {
    let msg_id = uuid::Uuid::new_v4().simple().to_string();
    frames_with_id(&msg_id, bytes, max_chunk_bytes, content_type)
}

pub fn encode_frame(frame: &ChunkFrame) -> String {
    format!(
        "{FRAME_TAG}|{}|{}|{}|{}|{}",
        frame.msg_id,
        frame.index,
        frame.total,
        frame.content_type,
        URL_SAFE_NO_PAD.encode(&frame.bytes)
    )
}

fn parse_num(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parse a frame; `None` on any structural mismatch.
pub fn decode_frame(text: &str) -> Option<ChunkFrame> {
    let fields: Vec<&str> = text.split(DELIMITER).collect();
    if fields.len() != FIELD_COUNT || fields[0] != FRAME_TAG {
        return None;
    }
    let index = parse_num(fields[2])?;
    let total = parse_num(fields[3])?;
    let bytes = URL_SAFE_NO_PAD.decode(fields[5]).ok()?;
    ChunkFrame::new(fields[1], index, total, fields[4], bytes).ok()
}

/// A fully reassembled group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    pub msg_id: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Output of [`assemble_complete`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembly {
    pub complete: Vec<AssembledMessage>,
    /// Frames of groups that are not (yet) complete; keep them for a later pass.
    pub incomplete: Vec<ChunkFrame>,
}

struct Group {
    total: u32,
    content_type: String,
    consistent: bool,
    frames: BTreeMap<u32, ChunkFrame>,
}

impl Group {
    fn is_complete(&self) -> bool {
        // Indices are unique and < total, so a full count means exactly 0..total.
        self.consistent && self.frames.len() == self.total as usize
    }
}

/// Group frames by message id and concatenate every complete group in index
/// order. Groups are emitted in first-seen order. Duplicate (msgId, index)
/// frames collapse to the first one seen; a group whose frames disagree on
/// `total` or `contentType` never completes.
pub fn assemble_complete(frames: impl IntoIterator<Item = ChunkFrame>) -> Assembly {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Group> = HashMap::new();

    for frame in frames {
        let group = groups.entry(frame.msg_id.clone()).or_insert_with(|| {
            order.push(frame.msg_id.clone());
            Group {
                total: frame.total,
                content_type: frame.content_type.clone(),
                consistent: true,
                frames: BTreeMap::new(),
            }
        });
        if frame.total != group.total || frame.content_type != group.content_type {
            if group.consistent {
                tracing::warn!(
                    target: "styx_proto",
                    event = "chunk_group_inconsistent",
                    msg_id = %frame.msg_id
                );
            }
            group.consistent = false;
        }
        group.frames.entry(frame.index).or_insert(frame);
    }

    let mut assembly = Assembly::default();
    for msg_id in order {
        let Some(group) = groups.remove(&msg_id) else { continue };
        if group.is_complete() {
            let bytes = group.frames.values().flat_map(|f| f.bytes.iter().copied()).collect();
            assembly.complete.push(AssembledMessage {
                msg_id,
                content_type: group.content_type,
                bytes,
            });
        } else {
            assembly.incomplete.extend(group.frames.into_values());
        }
    }
    assembly
}
