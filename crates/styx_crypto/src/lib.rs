//! styx_crypto: key material and asynchronous key agreement for Styx
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - The Diffie-Hellman primitive is injected through [`dh::DhPrimitive`];
//!   [`dh::X25519`] is the production implementation.
//!
//! # Module layout
//! - `identity`: long-term identity (Ed25519 signing + X25519 exchange) and key newtypes
//! - `dh`: Diffie-Hellman primitive seam
//! - `prekeys`: signed / one-time prekeys, publishable bundle, local state, manager
//! - `x3dh`: X3DH initiator and responder computations
//! - `kdf`: HKDF-SHA256 derivations
//! - `hash`: BLAKE3 utilities (message ids, content hashes)
//! - `aead`: XChaCha20-Poly1305 sealing helpers
//! - `error`: unified error type

pub mod aead;
pub mod dh;
pub mod error;
pub mod hash;
pub mod identity;
pub mod kdf;
pub mod prekeys;
pub mod x3dh;

pub use dh::{DhPrimitive, X25519};
pub use error::CryptoError;
pub use identity::{IdentityKeyPair, KeyPair, PublicKey, SecretKey};
pub use prekeys::{
    LocalPrekeyState, OneTimePrekey, PrekeyBundle, PrekeyConfig, PrekeyManager, SignedPrekey,
};
pub use x3dh::{InitialMessageHeader, InitiatorResult, X3dhOutput};
