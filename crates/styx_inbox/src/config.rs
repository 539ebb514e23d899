//! Tunables for scanning, retry and key maintenance.
//!
//! Every struct deserialises with `#[serde(default)]`, so a config file only
//! needs the keys it overrides.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use styx_crypto::PrekeyConfig;
use styx_proto::RailConfig;

use crate::error::InboxError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay_ms: 250, max_delay_ms: 8_000 }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay_ms: 0, max_delay_ms: 0 }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    /// Page size of each list call. A scan pages back until it reaches the
    /// cursor.
    pub limit: usize,
    /// Parallel detail fetches when the list call omits record contents.
    pub detail_concurrency: usize,
    /// Incomplete-group frames carried between scans.
    pub max_pending_frames: usize,
    pub rails: RailConfig,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            detail_concurrency: 6,
            max_pending_frames: 4096,
            rails: RailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StyxConfig {
    pub prekeys: PrekeyConfig,
    /// Outbound record building. Scans recognise rails through `inbox.rails`.
    pub rails: RailConfig,
    pub retry: RetryPolicy,
    pub inbox: InboxConfig,
}

impl StyxConfig {
    pub fn load(path: &Path) -> Result<Self, InboxError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InboxError> {
        if self.retry.max_attempts == 0 {
            return Err(InboxError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.inbox.limit == 0 {
            return Err(InboxError::Config("inbox.limit must be at least 1".into()));
        }
        if self.inbox.detail_concurrency == 0 {
            return Err(InboxError::Config("inbox.detail_concurrency must be at least 1".into()));
        }
        if self.prekeys.one_time_prekey_low_water > self.prekeys.one_time_prekey_pool_size {
            return Err(InboxError::Config(
                "prekeys.one_time_prekey_low_water exceeds the pool size".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = StyxConfig::default();
        assert_eq!(cfg.retry.max_attempts, 4);
        assert_eq!(cfg.retry.base_delay(), Duration::from_millis(250));
        assert_eq!(cfg.retry.max_delay(), Duration::from_secs(8));
        assert_eq!(cfg.inbox.limit, 100);
        assert_eq!(cfg.inbox.detail_concurrency, 6);
        assert_eq!(cfg.rails.narrow_char_ceiling, 900);
        assert_eq!(cfg.prekeys.one_time_prekey_pool_size, 100);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("styx.json");
        std::fs::write(&path, r#"{ "retry": { "max_attempts": 2 }, "inbox": { "limit": 10 } }"#)
            .unwrap();
        let cfg = StyxConfig::load(&path).unwrap();
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.base_delay_ms, 250);
        assert_eq!(cfg.inbox.limit, 10);
        assert_eq!(cfg.inbox.detail_concurrency, 6);
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut cfg = StyxConfig::default();
        cfg.retry.max_attempts = 0;
        assert!(matches!(cfg.validate(), Err(InboxError::Config(_))));
    }
}
