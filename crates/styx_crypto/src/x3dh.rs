//! X3DH asynchronous key agreement.
//!
//! References:
//!   - Signal X3DH spec: <https://signal.org/docs/specifications/x3dh/>
//!   - RFC 7748 (X25519): <https://datatracker.ietf.org/doc/html/rfc7748>
//!   - RFC 5869 (HKDF):  <https://datatracker.ietf.org/doc/html/rfc5869>
//!
//! Protocol:
//!   Alice (initiator) fetches Bob's published `PrekeyBundle`:
//!     IK_B  (identity exchange key) + Ed25519 signing key
//!     SPK_B (signed prekey) + signature over SPK_B
//!     OPK_B (first listed one-time prekey, if any)
//!
//!   Alice generates ONE ephemeral keypair EK_A.
//!
//! ```text
//!     DH1 = DH(IK_A, SPK_B)
//!     DH2 = DH(EK_A, IK_B)
//!     DH3 = DH(EK_A, SPK_B)
//!     DH4 = DH(EK_A, OPK_B), or 32 zero bytes when no OPK was used
//! ```
//!
//!   SK = HKDF(salt=0, ikm = 0xFF*32 || DH1 || DH2 || DH3 || DH4, info="styx-x3dh-v1")
//!   AD = IK_A || IK_B || EK_A || (OPK_B or 32 zero bytes)
//!
//! Bob mirrors each term with his private halves, so both sides concatenate
//! byte-identical input. If the OPK Alice referenced is gone (already consumed
//! or rotated away) Bob substitutes the zero block. That degrades to a
//! three-DH handshake and yields a different SK than Alice's; it is reported
//! through `one_time_prekey_missing`, not as an error.
//!
//! Cryptographic failures are deterministic and never retried.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    dh::DhPrimitive,
    error::CryptoError,
    identity::{IdentityKeyPair, KeyPair, PublicKey},
    kdf,
    prekeys::{LocalPrekeyState, PrekeyBundle},
};

const ZERO_BLOCK: [u8; 32] = [0u8; 32];

// ── Init message header ──────────────────────────────────────────────────────

/// Sent with the first ciphertext so the responder can derive SK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialMessageHeader {
    /// Initiator's identity exchange key.
    pub identity_key: PublicKey,
    /// Initiator's Ed25519 key, so the responder can pin the identity.
    pub signing_key: PublicKey,
    pub ephemeral_key: PublicKey,
    /// Which SPK the initiator used.
    pub signed_prekey_id: u32,
    /// Which OPK was consumed (`None` if the bundle had none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_prekey_id: Option<u32>,
}

impl InitialMessageHeader {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── Output ───────────────────────────────────────────────────────────────────

/// Result of one side of the handshake.
pub struct X3dhOutput {
    /// 32-byte SK; feeds the external message ratchet.
    pub shared_secret: [u8; 32],
    pub ephemeral_public_key: PublicKey,
    /// The OPK actually mixed into SK.
    pub used_one_time_prekey_id: Option<u32>,
    /// Channel-binding data for outer AEAD. Never transmitted.
    pub associated_data: Vec<u8>,
    /// Responder only: the initiator referenced an OPK that is no longer held.
    pub one_time_prekey_missing: bool,
}

impl Drop for X3dhOutput {
    fn drop(&mut self) {
        self.shared_secret.zeroize();
    }
}

/// Initiator output plus the header to transmit.
pub struct InitiatorResult {
    pub output: X3dhOutput,
    pub header: InitialMessageHeader,
}

fn associated_data(
    initiator_ik: &PublicKey,
    responder_ik: &PublicKey,
    ephemeral: &PublicKey,
    opk: Option<&PublicKey>,
) -> Vec<u8> {
    let mut ad = Vec::with_capacity(128);
    ad.extend_from_slice(initiator_ik.as_bytes());
    ad.extend_from_slice(responder_ik.as_bytes());
    ad.extend_from_slice(ephemeral.as_bytes());
    ad.extend_from_slice(opk.map(PublicKey::as_bytes).unwrap_or(&ZERO_BLOCK));
    ad
}

fn finish(mut terms: [[u8; 32]; 4]) -> Result<[u8; 32], CryptoError> {
    let sk = kdf::derive_shared_secret(&terms);
    terms.zeroize();
    sk.map_err(|e| CryptoError::KeyAgreementFailed(e.to_string()))
}

// ── Initiator (Alice) ────────────────────────────────────────────────────────

/// Alice initiates a session against Bob's published bundle.
///
/// Steps:
///   1. Validate the bundle and verify the SPK signature.
///   2. Generate ONE ephemeral keypair EK_A.
///   3. Compute DH1..DH4 (DH4 over the first listed OPK, else zero block).
///   4. Derive SK via HKDF.
pub fn initiate(
    dh: &dyn DhPrimitive,
    identity: &IdentityKeyPair,
    bundle: &PrekeyBundle,
) -> Result<InitiatorResult, CryptoError> {
    let valid = bundle.validate()?;
    let spk_b = &valid.signed_prekey.public_key;
    let ik_b = valid.identity_key;

    let ek_a = KeyPair::generate(dh);

    let dh1 = dh.diffie_hellman(&identity.exchange.secret, spk_b)?;
    let dh2 = dh.diffie_hellman(&ek_a.secret, ik_b)?;
    let dh3 = dh.diffie_hellman(&ek_a.secret, spk_b)?;
    let dh4 = match valid.one_time_prekey {
        Some(opk) => dh.diffie_hellman(&ek_a.secret, &opk.public_key)?,
        None => ZERO_BLOCK,
    };

    let shared_secret = finish([dh1, dh2, dh3, dh4])?;
    let opk_pub = valid.one_time_prekey.map(|o| &o.public_key);
    let used = valid.one_time_prekey.map(|o| o.id);

    tracing::debug!(
        target: "styx_crypto",
        event = "x3dh_initiate",
        spk_id = valid.signed_prekey.id,
        opk_id = ?used
    );

    Ok(InitiatorResult {
        output: X3dhOutput {
            shared_secret,
            ephemeral_public_key: ek_a.public,
            used_one_time_prekey_id: used,
            associated_data: associated_data(identity.exchange_public(), ik_b, &ek_a.public, opk_pub),
            one_time_prekey_missing: false,
        },
        header: InitialMessageHeader {
            identity_key: *identity.exchange_public(),
            signing_key: identity.signing_public,
            ephemeral_key: ek_a.public,
            signed_prekey_id: valid.signed_prekey.id,
            one_time_prekey_id: used,
        },
    })
}

// ── Responder (Bob) ──────────────────────────────────────────────────────────

/// Bob reconstructs SK from an init header.
///
/// The referenced OPK leaves `state` only once SK has been derived, so a
/// handshake that fails on any term keeps it for the next attempt. Callers
/// must hold `state` exclusively for the whole call.
pub fn respond(
    dh: &dyn DhPrimitive,
    state: &mut LocalPrekeyState,
    header: &InitialMessageHeader,
) -> Result<X3dhOutput, CryptoError> {
    let spk = state
        .signed_prekey_by_id(header.signed_prekey_id)
        .ok_or(CryptoError::UnknownSignedPrekey(header.signed_prekey_id))?;
    let opk = header
        .one_time_prekey_id
        .and_then(|id| state.one_time_prekeys.get(&id).map(|kp| (id, kp)));
    let one_time_prekey_missing = header.one_time_prekey_id.is_some() && opk.is_none();
    let ik_b = &state.identity.exchange;
    let ik_a = &header.identity_key;
    let ek_a = &header.ephemeral_key;

    //   DH1 = IK_A × SPK_B   →  Bob: SPK_B × IK_A  (commutative)
    //   DH2 = EK_A × IK_B    →  Bob: IK_B × EK_A
    //   DH3 = EK_A × SPK_B   →  Bob: SPK_B × EK_A
    //   DH4 = EK_A × OPK_B   →  Bob: OPK_B × EK_A
    let dh1 = dh.diffie_hellman(&spk.key.secret, ik_a)?;
    let dh2 = dh.diffie_hellman(&ik_b.secret, ek_a)?;
    let dh3 = dh.diffie_hellman(&spk.key.secret, ek_a)?;
    let dh4 = match opk {
        Some((_, kp)) => dh.diffie_hellman(&kp.secret, ek_a)?,
        None => ZERO_BLOCK,
    };

    let shared_secret = finish([dh1, dh2, dh3, dh4])?;
    let associated_data = associated_data(ik_a, &ik_b.public, ek_a, opk.map(|(_, kp)| &kp.public));
    let used_one_time_prekey_id = opk.map(|(id, _)| id);

    if let Some(id) = used_one_time_prekey_id {
        state.take_one_time_prekey(id);
    }
    if one_time_prekey_missing {
        tracing::warn!(
            target: "styx_crypto",
            event = "opk_missing",
            opk_id = ?header.one_time_prekey_id,
            "referenced one-time prekey not held; falling back to zero block"
        );
    }

    Ok(X3dhOutput {
        shared_secret,
        ephemeral_public_key: *ek_a,
        used_one_time_prekey_id,
        associated_data,
        one_time_prekey_missing,
    })
}
