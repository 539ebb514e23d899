//! Store seams used by the inbox pipeline and key management.

use async_trait::async_trait;

use crate::error::StoreError;

/// Entry in an owner's seen-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeenKey<'a> {
    /// Transport record id.
    Record(&'a str),
    /// Content-derived envelope id.
    Message(&'a str),
}

impl<'a> SeenKey<'a> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Record(_) => "record",
            Self::Message(_) => "message",
        }
    }

    pub fn value(&self) -> &'a str {
        match self {
            Self::Record(v) | Self::Message(v) => v,
        }
    }
}

/// Cursor and seen-set, both scoped by owner.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Id of the newest fully processed record, if any scan has completed.
    async fn get_cursor(&self, owner: &str) -> Result<Option<String>, StoreError>;

    async fn set_cursor(&self, owner: &str, record_id: &str) -> Result<(), StoreError>;

    async fn has_seen(&self, owner: &str, key: SeenKey<'_>) -> Result<bool, StoreError>;

    /// Idempotent.
    async fn mark_seen(&self, owner: &str, key: SeenKey<'_>) -> Result<(), StoreError>;
}

/// Opaque byte values under string keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or overwrite.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}
