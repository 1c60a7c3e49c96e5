//! Endpoint-side tunnel cryptography.
//!
//! Used by the device and container endpoints. The relay imports only
//! [`decode_public_key`] to check key format; it never derives or holds a
//! session key.

pub mod envelope;
pub mod error;
pub mod keys;

pub use envelope::SessionCipher;
pub use error::CryptoError;
pub use keys::{decode_public_key, EphemeralKeyPair, PUBLIC_KEY_LEN};
