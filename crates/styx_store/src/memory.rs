//! In-process store backed by hash maps.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    error::StoreError,
    traits::{CursorStore, KeyValueStore, SeenKey},
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    cursors: RwLock<HashMap<String, String>>,
    seen: RwLock<HashSet<(String, &'static str, String)>>,
    kv: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn seen_entry(owner: &str, key: SeenKey<'_>) -> (String, &'static str, String) {
        (owner.to_string(), key.kind(), key.value().to_string())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn get_cursor(&self, owner: &str) -> Result<Option<String>, StoreError> {
        Ok(self.cursors.read().await.get(owner).cloned())
    }

    async fn set_cursor(&self, owner: &str, record_id: &str) -> Result<(), StoreError> {
        self.cursors
            .write()
            .await
            .insert(owner.to_string(), record_id.to_string());
        Ok(())
    }

    async fn has_seen(&self, owner: &str, key: SeenKey<'_>) -> Result<bool, StoreError> {
        Ok(self.seen.read().await.contains(&Self::seen_entry(owner, key)))
    }

    async fn mark_seen(&self, owner: &str, key: SeenKey<'_>) -> Result<(), StoreError> {
        self.seen.write().await.insert(Self::seen_entry(owner, key));
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.kv.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.kv.write().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.kv.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cursor_is_per_owner() {
        let store = MemoryStore::new();
        assert_eq!(store.get_cursor("alice").await.unwrap(), None);
        store.set_cursor("alice", "r1").await.unwrap();
        store.set_cursor("alice", "r2").await.unwrap();
        assert_eq!(store.get_cursor("alice").await.unwrap().as_deref(), Some("r2"));
        assert_eq!(store.get_cursor("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn seen_kinds_do_not_collide() {
        let store = MemoryStore::new();
        store.mark_seen("alice", SeenKey::Record("x")).await.unwrap();
        assert!(store.has_seen("alice", SeenKey::Record("x")).await.unwrap());
        assert!(!store.has_seen("alice", SeenKey::Message("x")).await.unwrap());
        assert!(!store.has_seen("bob", SeenKey::Record("x")).await.unwrap());
    }

    #[tokio::test]
    async fn kv_put_get_delete() {
        let store = MemoryStore::new();
        store.put("k", b"v1").await.unwrap();
        store.put("k", b"v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"v2"[..]));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
