//! Key derivation functions
//!
//! `hkdf_expand`: HKDF-SHA256, used for all session key material.
//! `derive_shared_secret`: the X3DH output KDF.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Protocol info string binding the X3DH KDF to this protocol.
pub const X3DH_INFO: &[u8] = b"styx-x3dh-v1";

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be `None` (HKDF will use a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// SK = HKDF(salt = 0×32, ikm = 0xFF×32 ‖ DH1 ‖ DH2 ‖ DH3 ‖ DH4, info = X3DH_INFO)
///
/// The DH terms must already be in the fixed initiator order; an absent
/// one-time prekey contributes a zero block as DH4.
pub fn derive_shared_secret(dh_terms: &[[u8; 32]; 4]) -> Result<[u8; 32], CryptoError> {
    let mut ikm = Vec::with_capacity(32 * 5);
    ikm.extend_from_slice(&[0xFFu8; 32]);
    for term in dh_terms {
        ikm.extend_from_slice(term);
    }

    let mut sk = [0u8; 32];
    let result = hkdf_expand(&ikm, Some(&[0u8; 32]), X3DH_INFO, &mut sk);
    ikm.zeroize();
    result.map(|_| sk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_secret_depends_on_every_term() {
        let base = [[1u8; 32], [2u8; 32], [3u8; 32], [0u8; 32]];
        let sk = derive_shared_secret(&base).unwrap();
        assert_eq!(sk, derive_shared_secret(&base).unwrap());

        for i in 0..4 {
            let mut changed = base;
            changed[i][0] ^= 0x01;
            assert_ne!(sk, derive_shared_secret(&changed).unwrap(), "term {i}");
        }
    }
}
