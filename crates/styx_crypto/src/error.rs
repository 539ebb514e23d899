use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key agreement failed: {0}")]
    KeyAgreementFailed(String),

    #[error("Prekey bundle is missing the identity key")]
    MissingIdentityKey,

    #[error("Prekey bundle is missing the signed prekey")]
    MissingSignedPrekey,

    #[error("Unknown signed prekey id {0}")]
    UnknownSignedPrekey(u32),

    #[error("Prekey id counter exhausted")]
    PrekeyIdsExhausted,

    #[error("Unsupported prekey bundle version {0}")]
    UnsupportedBundleVersion(u8),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed")]
    AeadDecrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
