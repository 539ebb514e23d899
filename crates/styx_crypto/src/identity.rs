//! Identity key management
//!
//! Each *user* has one long-term `IdentityKeyPair`, made of two halves:
//!   - an Ed25519 signing pair, used to sign the signed prekey;
//!   - an X25519 exchange pair, used in the X3DH DH1/DH2 terms.
//!
//! Identity keys are created once and persisted indefinitely. They are never
//! rotated automatically; rotation of medium-term material lives in `prekeys`.
//!
//! Key bytes travel as base64url (no padding) strings in every serialised form.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{dh::DhPrimitive, error::CryptoError};

// ── Newtype wrappers ──────────────────────────────────────────────────────────

fn decode_32(s: &str, what: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = URL_SAFE_NO_PAD.decode(s)?;
    bytes.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidKey(format!("{what} must be 32 bytes, got {}", bytes.len()))
    })
}

/// 32-byte public key (X25519 or Ed25519 depending on context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        decode_32(s, "Public key").map(Self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("Public key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Human-readable fingerprint: BLAKE3 of the key truncated to 20 bytes,
    /// hex in groups of 4.
    ///
    /// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789 0abc def0"
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_b64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_b64(&s).map_err(serde::de::Error::custom)
    }
}

/// 32-byte secret scalar / seed. Cleared on drop; never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(pub(crate) [u8; 32]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut s = String::deserialize(deserializer)?;
        let out = decode_32(&s, "Secret key").map(Self).map_err(serde::de::Error::custom);
        s.zeroize();
        out
    }
}

/// Base64url serde for variable-length byte fields (signatures).
pub(crate) mod b64_bytes {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// A DH key pair produced by a [`DhPrimitive`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn generate(dh: &dyn DhPrimitive) -> Self {
        let secret = dh.generate();
        let public = dh.public_key(&secret);
        Self { secret, public }
    }
}

// ── Identity keypair ──────────────────────────────────────────────────────────

/// Long-term identity: one signing pair and one key-exchange pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityKeyPair {
    /// Ed25519 verifying key.
    pub signing_public: PublicKey,
    signing_secret: SecretKey,
    /// X25519 (or injected-primitive) exchange pair.
    pub exchange: KeyPair,
}

impl IdentityKeyPair {
    pub fn generate(dh: &dyn DhPrimitive) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            signing_public: PublicKey(signing_key.verifying_key().to_bytes()),
            signing_secret: SecretKey(signing_key.to_bytes()),
            exchange: KeyPair::generate(dh),
        }
    }

    /// Rebuild from stored secrets.
    pub fn from_secrets(
        dh: &dyn DhPrimitive,
        signing_secret: [u8; 32],
        exchange_secret: [u8; 32],
    ) -> Self {
        let signing_key = SigningKey::from_bytes(&signing_secret);
        let exchange_secret = SecretKey(exchange_secret);
        Self {
            signing_public: PublicKey(signing_key.verifying_key().to_bytes()),
            signing_secret: SecretKey(signing_secret),
            exchange: KeyPair {
                public: dh.public_key(&exchange_secret),
                secret: exchange_secret,
            },
        }
    }

    /// Identity key used in DH terms.
    pub fn exchange_public(&self) -> &PublicKey {
        &self.exchange.public
    }

    /// Sign arbitrary bytes; returns the 64-byte raw Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        SigningKey::from_bytes(&self.signing_secret.0)
            .sign(msg)
            .to_bytes()
            .to_vec()
    }

    /// Verify a signature made by any Ed25519 public key.
    pub fn verify(public: &PublicKey, msg: &[u8], sig_bytes: &[u8]) -> Result<(), CryptoError> {
        let vk = VerifyingKey::from_bytes(&public.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig = Signature::from_bytes(
            sig_bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("Bad sig len".into()))?,
        );
        vk.verify(msg, &sig).map_err(|_| CryptoError::SignatureVerification)
    }
}
