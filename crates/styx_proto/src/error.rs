use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Invalid chunk frame: {0}")]
    ChunkFrameInvalid(String),

    #[error("Malformed rail record: {0}")]
    MalformedRecord(String),

    #[error("Wide rail requested but not available")]
    RailUnavailable,

    #[error("Payload of {size} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { size: usize, max: usize },
}
