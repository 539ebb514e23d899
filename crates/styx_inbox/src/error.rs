use thiserror::Error;

/// Failure reported by a transport implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Rate limiting, timeouts and the like. Worth retrying.
    #[error("Transient transport error: {0}")]
    Transient(String),

    #[error("Transport error: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum InboxError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] styx_store::StoreError),

    #[error("Protocol error: {0}")]
    Proto(#[from] styx_proto::ProtoError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] styx_crypto::CryptoError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
