//! Encrypted payload container and its byte encoding.

use crate::crypto::cipher::CipherError;

/// Nonce length shared by every supported cipher (96 bits).
pub const IV_LEN: usize = 12;
/// Authentication tag length shared by every supported cipher (128 bits).
pub const TAG_LEN: usize = 16;

/// The output of one encryption: IV, ciphertext and authentication tag.
///
/// Decryption must be given back exactly these three values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherEnvelope {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    /// Required by authenticated modes; an envelope without one never decrypts.
    pub tag: Option<[u8; TAG_LEN]>,
}

impl CipherEnvelope {
    /// Encode as `iv || tag || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let tag_len = if self.tag.is_some() { TAG_LEN } else { 0 };
        let mut out = Vec::with_capacity(IV_LEN + tag_len + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        if let Some(tag) = &self.tag {
            out.extend_from_slice(tag);
        }
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse an authenticated envelope produced by [`CipherEnvelope::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() < IV_LEN + TAG_LEN {
            return Err(CipherError::Malformed(format!(
                "envelope is {} bytes, need at least {}",
                bytes.len(),
                IV_LEN + TAG_LEN
            )));
        }
        let (iv, rest) = bytes.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut iv_buf = [0u8; IV_LEN];
        iv_buf.copy_from_slice(iv);
        let mut tag_buf = [0u8; TAG_LEN];
        tag_buf.copy_from_slice(tag);

        Ok(Self {
            iv: iv_buf,
            ciphertext: ciphertext.to_vec(),
            tag: Some(tag_buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_layout() {
        let env = CipherEnvelope {
            iv: [1; IV_LEN],
            ciphertext: vec![9, 9, 9],
            tag: Some([2; TAG_LEN]),
        };
        let bytes = env.to_bytes();
        assert_eq!(bytes.len(), IV_LEN + TAG_LEN + 3);
        assert_eq!(&bytes[..IV_LEN], &[1; IV_LEN]);
        assert_eq!(&bytes[IV_LEN..IV_LEN + TAG_LEN], &[2; TAG_LEN]);
        assert_eq!(CipherEnvelope::from_bytes(&bytes).unwrap(), env);
    }

    #[test]
    fn short_input_is_malformed() {
        let err = CipherEnvelope::from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, CipherError::Malformed(_)));
    }
}
