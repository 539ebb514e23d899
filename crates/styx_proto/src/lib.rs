//! styx_proto: wire formats for Styx records
//!
//! Everything here is a pure function over bytes or text; no I/O.
//!
//! # Modules
//! - `envelope`: versioned binary envelope wrapping kind, header and ciphertext
//! - `chunk`: text chunk frames carried inside envelope plaintext
//! - `rail`: narrow (text) and wide (binary) transport records, rail selection
//! - `error`: protocol error type

pub mod chunk;
pub mod envelope;
pub mod error;
pub mod rail;

pub use chunk::{
    assemble_complete, decode_frame, encode_frame, frames_for, frames_with_id, split,
    AssembledMessage, Assembly, ChunkFrame,
};
pub use envelope::{message_id, Envelope, EnvelopeKind};
pub use error::ProtoError;
pub use rail::{
    decode_narrow, encode_narrow, narrow_len, select_rail, wide_capacity, Rail, RailConfig,
    RailPreference, WideRailProbe, WideRecord,
};
