//! Diffie-Hellman primitive seam.
//!
//! The key-agreement engine never touches curve arithmetic directly; it calls
//! a [`DhPrimitive`]. Production code uses [`X25519`] (RFC 7748).

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::{
    error::CryptoError,
    identity::{PublicKey, SecretKey},
};

pub trait DhPrimitive: Send + Sync {
    /// Fresh random secret.
    fn generate(&self) -> SecretKey;

    /// Public half of `secret`.
    fn public_key(&self, secret: &SecretKey) -> PublicKey;

    /// Shared 32-byte output of `secret` × `public`.
    ///
    /// Fails with `KeyAgreementFailed` for inputs the primitive rejects
    /// (e.g. low-order points).
    fn diffie_hellman(&self, secret: &SecretKey, public: &PublicKey)
        -> Result<[u8; 32], CryptoError>;
}

/// X25519 via `x25519-dalek`.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519;

impl DhPrimitive for X25519 {
    fn generate(&self) -> SecretKey {
        SecretKey::from_bytes(StaticSecret::random_from_rng(OsRng).to_bytes())
    }

    fn public_key(&self, secret: &SecretKey) -> PublicKey {
        let s = StaticSecret::from(*secret.as_bytes());
        PublicKey(X25519Public::from(&s).to_bytes())
    }

    fn diffie_hellman(
        &self,
        secret: &SecretKey,
        public: &PublicKey,
    ) -> Result<[u8; 32], CryptoError> {
        let s = StaticSecret::from(*secret.as_bytes());
        let shared = s.diffie_hellman(&X25519Public::from(public.0));
        // An all-zero output means the peer sent a low-order point.
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreementFailed(
                "non-contributory DH output (low-order public key)".into(),
            ));
        }
        Ok(shared.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_is_commutative() {
        let a = X25519.generate();
        let b = X25519.generate();
        let ab = X25519.diffie_hellman(&a, &X25519.public_key(&b)).unwrap();
        let ba = X25519.diffie_hellman(&b, &X25519.public_key(&a)).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn rejects_low_order_point() {
        let a = X25519.generate();
        let err = X25519.diffie_hellman(&a, &PublicKey([0u8; 32])).unwrap_err();
        assert!(matches!(err, CryptoError::KeyAgreementFailed(_)));
    }
}
