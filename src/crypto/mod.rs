//! Symmetric encryption for secrets at rest.
//!
//! Contributed API tokens are ciphered before they touch Redis so that a
//! storage dump does not leak working credentials. Uses AES-256-GCM with a
//! random 96-bit nonce per encryption; the wire form is
//! `base64(nonce || ciphertext || tag)`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_LEN} base64-encoded bytes")]
    InvalidKey,

    #[error("encryption failed: {0}")]
    EncryptionFailed(&'static str),

    #[error("decryption failed: wrong key or corrupted ciphertext")]
    DecryptionFailed,

    #[error("ciphertext is not valid base64 or is truncated")]
    MalformedCiphertext,
}

/// A single-use nonce sequence.
///
/// `ring` wants a [`NonceSequence`] for sealing/opening keys. Every call
/// here uses a fresh random nonce, so the sequence yields exactly once.
struct SingleNonce(Option<[u8; NONCE_LEN]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// String-level cipher shared by the token pool and contributor storage.
///
/// Cloning is cheap; the key is copied by value.
#[derive(Clone)]
pub struct Crypto {
    key: [u8; KEY_LEN],
}

impl Crypto {
    /// Build from a base64-encoded 256-bit key (e.g. the `CRYPTO_KEY` env var).
    pub fn from_base64_key(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKey)?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { key })
    }

    /// Encrypt a plaintext string into the base64 wire form.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        let rng = SystemRandom::new();
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut nonce)
            .map_err(|_| CryptoError::EncryptionFailed("nonce generation failed"))?;

        let unbound = UnboundKey::new(&aead::AES_256_GCM, &self.key)
            .map_err(|_| CryptoError::EncryptionFailed("key rejected"))?;
        let mut sealing = SealingKey::new(unbound, SingleNonce(Some(nonce)));

        // ring seals in place and appends the 128-bit tag.
        let mut in_out = plaintext.as_bytes().to_vec();
        sealing
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::EncryptionFailed("seal failed"))?;

        let mut packed = Vec::with_capacity(NONCE_LEN + in_out.len());
        packed.extend_from_slice(&nonce);
        packed.extend_from_slice(&in_out);
        Ok(BASE64.encode(packed))
    }

    /// Decrypt the base64 wire form back into the plaintext string.
    ///
    /// Fails loudly on a wrong key, tampering, or malformed input; callers
    /// must never see garbage plaintext.
    pub fn decrypt_str(&self, encoded: &str) -> Result<String, CryptoError> {
        let packed = BASE64
            .decode(encoded.trim())
            .map_err(|_| CryptoError::MalformedCiphertext)?;
        if packed.len() <= NONCE_LEN {
            return Err(CryptoError::MalformedCiphertext);
        }
        let (nonce_bytes, ciphertext) = packed.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce_bytes.try_into().expect("split at NONCE_LEN");

        let unbound = UnboundKey::new(&aead::AES_256_GCM, &self.key)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let mut opening = OpeningKey::new(unbound, SingleNonce(Some(nonce)));

        let mut in_out = ciphertext.to_vec();
        let plaintext = opening
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Crypto").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_crypto() -> Crypto {
        Crypto::from_base64_key(&BASE64.encode([7u8; KEY_LEN])).unwrap()
    }

    #[test]
    fn roundtrip_ascii_and_utf8() {
        let crypto = test_crypto();
        for sample in ["sk-abc123", "", "a", "спасибо", "日本語のトークン", "emoji 🔑 key"] {
            let ciphered = crypto.encrypt_str(sample).unwrap();
            assert_ne!(ciphered, sample);
            assert_eq!(crypto.decrypt_str(&ciphered).unwrap(), sample);
        }
    }

    #[test]
    fn ciphertexts_differ_per_encryption() {
        let crypto = test_crypto();
        let a = crypto.encrypt_str("same input").unwrap();
        let b = crypto.encrypt_str("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let crypto = test_crypto();
        let other = Crypto::from_base64_key(&BASE64.encode([9u8; KEY_LEN])).unwrap();
        let ciphered = crypto.encrypt_str("secret").unwrap();
        assert!(matches!(
            other.decrypt_str(&ciphered),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let crypto = test_crypto();
        let ciphered = crypto.encrypt_str("secret").unwrap();
        let mut bytes = BASE64.decode(&ciphered).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        assert!(crypto.decrypt_str(&tampered).is_err());
    }

    #[test]
    fn malformed_input_fails() {
        let crypto = test_crypto();
        assert!(matches!(
            crypto.decrypt_str("not base64 at all!!!"),
            Err(CryptoError::MalformedCiphertext)
        ));
        // Valid base64 but shorter than a nonce.
        assert!(matches!(
            crypto.decrypt_str(&BASE64.encode([0u8; 4])),
            Err(CryptoError::MalformedCiphertext)
        ));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(Crypto::from_base64_key("???").is_err());
        assert!(Crypto::from_base64_key(&BASE64.encode([1u8; 16])).is_err());
    }
}
