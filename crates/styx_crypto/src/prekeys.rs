//! Prekey material and its lifecycle.
//!
//! Prekeys
//! -------
//! - Signed Prekey (SPK): rotated when older than `signed_prekey_lifetime_days`
//!   (30 by default); public half signed by the identity Ed25519 key. Exactly one
//!   SPK is active; the previous one is kept so handshakes started against the
//!   last published bundle still complete.
//! - One-Time Prekeys (OPK): consumed once per handshake. The private half is
//!   deleted the moment the responder uses it. The pool is replenished to
//!   `one_time_prekey_pool_size` when it drops below `one_time_prekey_low_water`.
//!
//! Ids come from one monotonically increasing counter and are never reused.
//!
//! `LocalPrekeyState` never leaves the device; `PrekeyBundle` is what gets
//! published. `PrekeyManager` puts the state behind a mutex so concurrent
//! handshakes and maintenance cannot interleave pool mutations.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    dh::DhPrimitive,
    error::CryptoError,
    identity::{b64_bytes, IdentityKeyPair, KeyPair, PublicKey},
    x3dh::{self, InitialMessageHeader, X3dhOutput},
};

pub const BUNDLE_VERSION: u8 = 1;

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrekeyConfig {
    pub signed_prekey_lifetime_days: i64,
    pub one_time_prekey_pool_size: usize,
    pub one_time_prekey_low_water: usize,
}

impl Default for PrekeyConfig {
    fn default() -> Self {
        Self {
            signed_prekey_lifetime_days: 30,
            one_time_prekey_pool_size: 100,
            one_time_prekey_low_water: 50,
        }
    }
}

impl PrekeyConfig {
    fn lifetime(&self) -> Duration {
        Duration::days(self.signed_prekey_lifetime_days)
    }
}

// ── Published types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPrekey {
    pub id: u32,
    pub public_key: PublicKey,
    /// Ed25519 signature over the raw 32 public-key bytes.
    #[serde(with = "b64_bytes")]
    pub signature: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePrekey {
    pub id: u32,
    pub public_key: PublicKey,
}

/// Publishable snapshot consumed by initiators.
///
/// Fields are optional on the wire so that a bundle fetched from an untrusted
/// source can be parsed and then rejected with a precise error by
/// [`PrekeyBundle::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrekeyBundle {
    pub version: u8,
    /// Exchange (DH) identity public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<PublicKey>,
    /// Ed25519 identity verifying key, checks `signed_prekey.signature`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<PublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_prekey: Option<SignedPrekey>,
    #[serde(default)]
    pub one_time_prekeys: Vec<OneTimePrekey>,
    pub timestamp: DateTime<Utc>,
}

/// Borrowed view of a bundle whose required fields are present and whose
/// signed prekey signature verified.
#[derive(Debug, Clone, Copy)]
pub struct ValidBundle<'a> {
    pub identity_key: &'a PublicKey,
    pub signed_prekey: &'a SignedPrekey,
    /// First available one-time prekey, chosen deterministically.
    pub one_time_prekey: Option<&'a OneTimePrekey>,
}

impl PrekeyBundle {
    pub fn to_json(&self) -> Result<String, CryptoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, CryptoError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Check presence of required fields and the SPK signature.
    ///
    /// An empty one-time prekey list is valid (zero-OPK path).
    pub fn validate(&self) -> Result<ValidBundle<'_>, CryptoError> {
        if self.version != BUNDLE_VERSION {
            return Err(CryptoError::UnsupportedBundleVersion(self.version));
        }
        let identity_key = self.identity_key.as_ref().ok_or(CryptoError::MissingIdentityKey)?;
        let signing_key = self.signing_key.as_ref().ok_or(CryptoError::MissingIdentityKey)?;
        let signed_prekey = self
            .signed_prekey
            .as_ref()
            .ok_or(CryptoError::MissingSignedPrekey)?;

        IdentityKeyPair::verify(
            signing_key,
            signed_prekey.public_key.as_bytes(),
            &signed_prekey.signature,
        )?;

        Ok(ValidBundle {
            identity_key,
            signed_prekey,
            one_time_prekey: self.one_time_prekeys.first(),
        })
    }

    /// True when the signed prekey is older than its lifetime or the
    /// one-time prekey pool is below the low-water mark.
    pub fn needs_refresh(&self, config: &PrekeyConfig, now: DateTime<Utc>) -> bool {
        let spk_stale = match &self.signed_prekey {
            Some(spk) => now - spk.timestamp > config.lifetime(),
            None => true,
        };
        spk_stale || self.one_time_prekeys.len() < config.one_time_prekey_low_water
    }
}

// ── Local (private) state ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPrekeyPair {
    pub id: u32,
    pub key: KeyPair,
    #[serde(with = "b64_bytes")]
    pub signature: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl SignedPrekeyPair {
    fn public(&self) -> SignedPrekey {
        SignedPrekey {
            id: self.id,
            public_key: self.key.public,
            signature: self.signature.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Private counterpart of the published bundle. Never published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPrekeyState {
    pub identity: IdentityKeyPair,
    pub signed_prekey: SignedPrekeyPair,
    #[serde(default)]
    pub previous_signed_prekey: Option<SignedPrekeyPair>,
    pub one_time_prekeys: BTreeMap<u32, KeyPair>,
    pub next_prekey_id: u32,
    /// Set whenever the published view changes.
    pub bundle_timestamp: DateTime<Utc>,
}

impl LocalPrekeyState {
    /// Fresh state: new signed prekey plus a full one-time prekey pool.
    pub fn generate(
        dh: &dyn DhPrimitive,
        identity: IdentityKeyPair,
        config: &PrekeyConfig,
        now: DateTime<Utc>,
    ) -> Result<Self, CryptoError> {
        let spk = new_signed_prekey(dh, &identity, 0, now);
        let mut state = Self {
            identity,
            signed_prekey: spk,
            previous_signed_prekey: None,
            one_time_prekeys: BTreeMap::new(),
            next_prekey_id: 1,
            bundle_timestamp: now,
        };
        state.replenish(dh, config.one_time_prekey_pool_size, now)?;
        Ok(state)
    }

    /// Ids still available from the counter.
    fn ids_left(&self) -> u64 {
        u64::from(u32::MAX - self.next_prekey_id)
    }

    fn allocate_id(&mut self) -> Result<u32, CryptoError> {
        let id = self.next_prekey_id;
        self.next_prekey_id = id.checked_add(1).ok_or(CryptoError::PrekeyIdsExhausted)?;
        Ok(id)
    }

    pub fn bundle(&self) -> PrekeyBundle {
        PrekeyBundle {
            version: BUNDLE_VERSION,
            identity_key: Some(self.identity.exchange.public),
            signing_key: Some(self.identity.signing_public),
            signed_prekey: Some(self.signed_prekey.public()),
            one_time_prekeys: self
                .one_time_prekeys
                .iter()
                .map(|(id, kp)| OneTimePrekey { id: *id, public_key: kp.public })
                .collect(),
            timestamp: self.bundle_timestamp,
        }
    }

    pub fn needs_refresh(&self, config: &PrekeyConfig, now: DateTime<Utc>) -> bool {
        now - self.signed_prekey.timestamp > config.lifetime()
            || self.one_time_prekeys.len() < config.one_time_prekey_low_water
    }

    /// Replace the active signed prekey. The outgoing one is retained as
    /// `previous_signed_prekey`; anything older is dropped.
    pub fn rotate_signed_prekey(
        &mut self,
        dh: &dyn DhPrimitive,
        now: DateTime<Utc>,
    ) -> Result<(), CryptoError> {
        let id = self.allocate_id()?;
        let fresh = new_signed_prekey(dh, &self.identity, id, now);
        let old = std::mem::replace(&mut self.signed_prekey, fresh);
        self.previous_signed_prekey = Some(old);
        self.bundle_timestamp = now;
        tracing::info!(target: "styx_crypto", event = "spk_rotated", spk_id = id);
        Ok(())
    }

    /// Top the one-time pool up to `target` keys. Returns how many were added.
    ///
    /// Fails without adding anything when the id counter cannot cover the
    /// whole shortfall.
    pub fn replenish(
        &mut self,
        dh: &dyn DhPrimitive,
        target: usize,
        now: DateTime<Utc>,
    ) -> Result<usize, CryptoError> {
        let missing = target.saturating_sub(self.one_time_prekeys.len());
        if missing as u64 > self.ids_left() {
            return Err(CryptoError::PrekeyIdsExhausted);
        }
        for _ in 0..missing {
            let id = self.allocate_id()?;
            self.one_time_prekeys.insert(id, KeyPair::generate(dh));
        }
        if missing > 0 {
            self.bundle_timestamp = now;
            tracing::debug!(target: "styx_crypto", event = "opk_replenished", added = missing);
        }
        Ok(missing)
    }

    /// Remove and return the one-time prekey `id` (exactly-once consumption).
    pub fn take_one_time_prekey(&mut self, id: u32) -> Option<KeyPair> {
        self.one_time_prekeys.remove(&id)
    }

    pub fn signed_prekey_by_id(&self, id: u32) -> Option<&SignedPrekeyPair> {
        if self.signed_prekey.id == id {
            return Some(&self.signed_prekey);
        }
        self.previous_signed_prekey.as_ref().filter(|spk| spk.id == id)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn new_signed_prekey(
    dh: &dyn DhPrimitive,
    identity: &IdentityKeyPair,
    id: u32,
    now: DateTime<Utc>,
) -> SignedPrekeyPair {
    let key = KeyPair::generate(dh);
    let signature = identity.sign(key.public.as_bytes());
    SignedPrekeyPair { id, key, signature, timestamp: now }
}

// ── Manager ──────────────────────────────────────────────────────────────────

/// Single-writer wrapper around `LocalPrekeyState`.
pub struct PrekeyManager {
    dh: Arc<dyn DhPrimitive>,
    config: PrekeyConfig,
    state: Mutex<LocalPrekeyState>,
}

impl PrekeyManager {
    /// Create a brand new identity with a full prekey pool.
    pub fn generate(dh: Arc<dyn DhPrimitive>, config: PrekeyConfig) -> Result<Self, CryptoError> {
        let identity = IdentityKeyPair::generate(dh.as_ref());
        let state = LocalPrekeyState::generate(dh.as_ref(), identity, &config, Utc::now())?;
        Ok(Self::from_state(dh, config, state))
    }

    pub fn from_state(dh: Arc<dyn DhPrimitive>, config: PrekeyConfig, state: LocalPrekeyState) -> Self {
        Self { dh, config, state: Mutex::new(state) }
    }

    pub fn bundle(&self) -> PrekeyBundle {
        self.state.lock().bundle()
    }

    /// Copy of the current state, for persistence.
    pub fn snapshot(&self) -> LocalPrekeyState {
        self.state.lock().clone()
    }

    pub fn one_time_prekey_count(&self) -> usize {
        self.state.lock().one_time_prekeys.len()
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.state.lock().needs_refresh(&self.config, now)
    }

    pub fn rotate_signed_prekey(&self) -> Result<(), CryptoError> {
        self.state.lock().rotate_signed_prekey(self.dh.as_ref(), Utc::now())
    }

    pub fn replenish(&self) -> Result<usize, CryptoError> {
        let target = self.config.one_time_prekey_pool_size;
        self.state.lock().replenish(self.dh.as_ref(), target, Utc::now())
    }

    /// Rotate the SPK if stale and refill the OPK pool if below low water.
    /// Returns true when the published bundle changed and must be re-published.
    pub fn maintain(&self) -> Result<bool, CryptoError> {
        self.maintain_at(Utc::now())
    }

    pub fn maintain_at(&self, now: DateTime<Utc>) -> Result<bool, CryptoError> {
        let mut state = self.state.lock();
        let mut changed = false;
        if now - state.signed_prekey.timestamp > self.config.lifetime() {
            state.rotate_signed_prekey(self.dh.as_ref(), now)?;
            changed = true;
        }
        if state.one_time_prekeys.len() < self.config.one_time_prekey_low_water {
            let target = self.config.one_time_prekey_pool_size;
            changed |= state.replenish(self.dh.as_ref(), target, now)? > 0;
        }
        Ok(changed)
    }

    /// Responder side of X3DH; consumes the referenced one-time prekey.
    pub fn respond(&self, header: &InitialMessageHeader) -> Result<X3dhOutput, CryptoError> {
        let mut state = self.state.lock();
        x3dh::respond(self.dh.as_ref(), &mut state, header)
    }
}
