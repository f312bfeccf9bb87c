//! Symmetric AEAD encryption of opaque payloads.

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::crypto::envelope::{CipherEnvelope, IV_LEN, TAG_LEN};

/// Key length shared by every supported cipher (256 bits).
pub const KEY_LEN: usize = 32;

/// Errors from encryption and decryption.
#[derive(Debug, Error)]
pub enum CipherError {
    /// Authentication failed: wrong key, wrong IV or tampered data.
    #[error("decryption failed: authentication tag mismatch")]
    Decryption,

    /// Input could not be parsed as an envelope.
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    /// Key material has the wrong size or encoding.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The system RNG or the cipher itself failed.
    #[error("encryption failed")]
    Encryption,

    #[error("unsupported cipher algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}

/// Supported authenticated ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherAlgorithm {
    fn aead(&self) -> &'static aead::Algorithm {
        match self {
            CipherAlgorithm::Aes256Gcm => &aead::AES_256_GCM,
            CipherAlgorithm::ChaCha20Poly1305 => &aead::CHACHA20_POLY1305,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "aes-256-gcm",
            CipherAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-256-gcm" => Ok(CipherAlgorithm::Aes256Gcm),
            "chacha20-poly1305" => Ok(CipherAlgorithm::ChaCha20Poly1305),
            other => Err(CipherError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// A 256-bit symmetric key. Debug output never shows the material.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey([u8; KEY_LEN]);

impl CipherKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CipherError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(s.trim()).map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Draw a fresh key from the system RNG.
    pub fn generate() -> Result<Self, CipherError> {
        let mut key = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| CipherError::Encryption)?;
        Ok(Self(key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

/// Encrypts and decrypts payloads with the configured algorithm.
#[derive(Clone)]
pub struct CipherCodec {
    algorithm: CipherAlgorithm,
    rng: SystemRandom,
}

impl fmt::Debug for CipherCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherCodec")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl Default for CipherCodec {
    fn default() -> Self {
        Self::new(CipherAlgorithm::default())
    }
}

impl CipherCodec {
    pub fn new(algorithm: CipherAlgorithm) -> Self {
        Self {
            algorithm,
            rng: SystemRandom::new(),
        }
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    fn sealing_key(&self, key: &CipherKey) -> Result<LessSafeKey, CipherError> {
        let unbound = UnboundKey::new(self.algorithm.aead(), key.as_bytes())
            .map_err(|_| CipherError::InvalidKey("rejected by cipher".into()))?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypt `plaintext` under `key` with a freshly generated IV.
    pub fn encrypt(&self, plaintext: &[u8], key: &CipherKey) -> Result<CipherEnvelope, CipherError> {
        let sealing = self.sealing_key(key)?;

        let mut iv = [0u8; IV_LEN];
        self.rng.fill(&mut iv).map_err(|_| CipherError::Encryption)?;

        let mut in_out = plaintext.to_vec();
        let tag = sealing
            .seal_in_place_separate_tag(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
            .map_err(|_| CipherError::Encryption)?;

        let mut tag_buf = [0u8; TAG_LEN];
        tag_buf.copy_from_slice(tag.as_ref());

        Ok(CipherEnvelope {
            iv,
            ciphertext: in_out,
            tag: Some(tag_buf),
        })
    }

    /// Decrypt an envelope. Fails if the tag is missing or does not verify.
    pub fn decrypt(&self, envelope: &CipherEnvelope, key: &CipherKey) -> Result<Vec<u8>, CipherError> {
        let tag = envelope
            .tag
            .ok_or_else(|| CipherError::Malformed("missing authentication tag".into()))?;
        let opening = self.sealing_key(key)?;

        let mut in_out = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(&envelope.ciphertext);
        in_out.extend_from_slice(&tag);

        let plaintext = opening
            .open_in_place(Nonce::assume_unique_for_key(envelope.iv), Aad::empty(), &mut in_out)
            .map_err(|_| CipherError::Decryption)?;
        Ok(plaintext.to_vec())
    }

    /// Encrypt and encode in one step (`iv || tag || ciphertext`).
    pub fn seal(&self, plaintext: &[u8], key: &CipherKey) -> Result<Vec<u8>, CipherError> {
        Ok(self.encrypt(plaintext, key)?.to_bytes())
    }

    /// Parse and decrypt in one step.
    pub fn open(&self, bytes: &[u8], key: &CipherKey) -> Result<Vec<u8>, CipherError> {
        self.decrypt(&CipherEnvelope::from_bytes(bytes)?, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> CipherKey {
        CipherKey::from_bytes(&[byte; KEY_LEN]).unwrap()
    }

    #[test]
    fn round_trip_both_algorithms() {
        for algorithm in [CipherAlgorithm::Aes256Gcm, CipherAlgorithm::ChaCha20Poly1305] {
            let codec = CipherCodec::new(algorithm);
            let k = key(7);
            for payload in [&b""[..], b"hello", &[0u8; 4096][..]] {
                let env = codec.encrypt(payload, &k).unwrap();
                assert_eq!(codec.decrypt(&env, &k).unwrap(), payload);
            }
        }
    }

    #[test]
    fn wrong_key_fails() {
        let codec = CipherCodec::default();
        let env = codec.encrypt(b"secret", &key(1)).unwrap();
        assert!(matches!(codec.decrypt(&env, &key(2)), Err(CipherError::Decryption)));
    }

    #[test]
    fn tampering_is_detected() {
        let codec = CipherCodec::default();
        let k = key(3);
        let env = codec.encrypt(b"payload", &k).unwrap();

        let mut flipped = env.clone();
        flipped.ciphertext[0] ^= 0x01;
        assert!(matches!(codec.decrypt(&flipped, &k), Err(CipherError::Decryption)));

        let mut wrong_iv = env.clone();
        wrong_iv.iv[0] ^= 0x01;
        assert!(matches!(codec.decrypt(&wrong_iv, &k), Err(CipherError::Decryption)));

        let mut no_tag = env;
        no_tag.tag = None;
        assert!(matches!(codec.decrypt(&no_tag, &k), Err(CipherError::Malformed(_))));
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let codec = CipherCodec::default();
        let k = key(4);
        let a = codec.encrypt(b"same", &k).unwrap();
        let b = codec.encrypt(b"same", &k).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn seal_and_open_bytes() {
        let codec = CipherCodec::new(CipherAlgorithm::ChaCha20Poly1305);
        let k = CipherKey::generate().unwrap();
        let sealed = codec.seal(b"framed", &k).unwrap();
        assert_eq!(codec.open(&sealed, &k).unwrap(), b"framed");
        assert!(codec.open(&sealed[..5], &k).is_err());
    }

    #[test]
    fn key_hex_round_trip() {
        let k = CipherKey::generate().unwrap();
        assert_eq!(CipherKey::from_hex(&k.to_hex()).unwrap(), k);
        assert!(CipherKey::from_hex("abcd").is_err());
        assert!(CipherKey::from_hex("zz").is_err());
        assert_eq!(format!("{:?}", k), "CipherKey(..)");
    }

    #[test]
    fn algorithm_names() {
        assert_eq!("AES-256-GCM".parse::<CipherAlgorithm>().unwrap(), CipherAlgorithm::Aes256Gcm);
        assert_eq!(CipherAlgorithm::ChaCha20Poly1305.to_string(), "chacha20-poly1305");
        assert!("aes-256-cbc".parse::<CipherAlgorithm>().is_err());
    }
}
