//! Crypto error types.

/// Errors from tunnel key handling and envelope sealing.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Envelope too short: {0} bytes")]
    EnvelopeTooShort(usize),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,
}
