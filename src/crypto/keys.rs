//! X25519 ephemeral key exchange.
//!
//! Each tunnel endpoint generates a fresh keypair per session, publishes the
//! base64 public half through the relay, and derives the session key from the
//! peer's public half. The relay only ever sees public keys.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::envelope::SessionCipher;
use crate::crypto::error::CryptoError;

pub const PUBLIC_KEY_LEN: usize = 32;

const HKDF_SALT: &[u8] = b"inference-relay-tunnel-salt-v1";
const HKDF_INFO: &[u8] = b"inference-relay-tunnel-session-v1";

/// Decode and length-check a base64 X25519 public key.
pub fn decode_public_key(encoded: &str) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    <[u8; PUBLIC_KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: PUBLIC_KEY_LEN,
            actual: bytes.len(),
        }
    })
}

/// One side's ephemeral keypair.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Default for EphemeralKeyPair {
    fn default() -> Self {
        Self::generate()
    }
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// Complete the exchange with the peer's base64 public key.
    ///
    /// ECDH output goes through HKDF-SHA256 before use as a cipher key.
    pub fn derive_session(&self, peer_public: &str) -> Result<SessionCipher, CryptoError> {
        let peer = PublicKey::from(decode_public_key(peer_public)?);
        let shared = self.secret.diffie_hellman(&peer);

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(SessionCipher::new(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_key() {
        let device = EphemeralKeyPair::generate();
        let container = EphemeralKeyPair::generate();

        let to_container = device
            .derive_session(&container.public_key_base64())
            .unwrap();
        let from_device = container
            .derive_session(&device.public_key_base64())
            .unwrap();

        let sealed = to_container.seal(b"hello container").unwrap();
        assert_eq!(from_device.open(&sealed).unwrap(), b"hello container");
    }

    #[test]
    fn wrong_length_key_is_rejected() {
        let short = STANDARD.encode([7u8; 16]);
        assert!(matches!(
            decode_public_key(&short),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
        assert!(matches!(
            decode_public_key("not base64!"),
            Err(CryptoError::InvalidEncoding(_))
        ));
    }
}
