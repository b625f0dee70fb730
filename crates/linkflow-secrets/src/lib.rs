//! Linkflow Secrets
//!
//! The coordination layer never calls a crypto library directly. Components
//! that need encrypted-at-rest payloads (webhook auth configs, credentials,
//! secret variables) depend on the [`SecretCipher`] trait; production wires
//! in [`AesGcmCipher`], tests wire in [`PlainCipher`].

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Errors from encrypting or decrypting a secret payload.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
  /// Ciphertext was not valid base64.
  #[error("invalid ciphertext encoding: {message}")]
  Encoding { message: String },

  /// Ciphertext was structurally invalid or failed authentication.
  #[error("decryption failed")]
  Decrypt,

  /// Encryption failed.
  #[error("encryption failed")]
  Encrypt,

  /// Decrypted payload was not valid UTF-8.
  #[error("decrypted payload is not valid utf-8")]
  InvalidUtf8,
}

/// Narrow capability for encrypted-at-rest payloads.
pub trait SecretCipher: Send + Sync {
  /// Decrypt a stored ciphertext into its plaintext.
  fn decrypt(&self, ciphertext: &str) -> Result<String, SecretError>;

  /// Encrypt a plaintext for storage.
  fn encrypt(&self, plaintext: &str) -> Result<String, SecretError>;
}

/// AES-256-GCM cipher. Ciphertexts are base64(nonce || ciphertext) with a
/// 12-byte nonce, freshly generated per encryption.
pub struct AesGcmCipher {
  key: [u8; 32],
}

impl AesGcmCipher {
  /// Create a cipher from a raw 32-byte key.
  pub fn new(key: [u8; 32]) -> Self {
    Self { key }
  }

  /// Derive a key from operator-supplied key material: base64-decoded when it
  /// decodes to at least 32 bytes, otherwise stretched by repetition.
  pub fn from_key_material(material: &str) -> Self {
    let mut key = [0u8; 32];

    if let Ok(decoded) = BASE64.decode(material.trim())
      && decoded.len() >= 32
    {
      key.copy_from_slice(&decoded[..32]);
      return Self { key };
    }

    let bytes = material.as_bytes();
    for (i, slot) in key.iter_mut().enumerate() {
      *slot = bytes[i % bytes.len().max(1)];
    }
    Self { key }
  }
}

impl SecretCipher for AesGcmCipher {
  fn decrypt(&self, ciphertext: &str) -> Result<String, SecretError> {
    let combined = BASE64.decode(ciphertext).map_err(|e| SecretError::Encoding {
      message: e.to_string(),
    })?;

    if combined.len() < 12 {
      return Err(SecretError::Decrypt);
    }
    let (nonce_bytes, payload) = combined.split_at(12);

    let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| SecretError::Decrypt)?;
    let plaintext = cipher
      .decrypt(Nonce::from_slice(nonce_bytes), payload)
      .map_err(|_| SecretError::Decrypt)?;

    String::from_utf8(plaintext).map_err(|_| SecretError::InvalidUtf8)
  }

  fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
    let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| SecretError::Encrypt)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
      .encrypt(&nonce, plaintext.as_bytes())
      .map_err(|_| SecretError::Encrypt)?;

    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(combined))
  }
}

/// Identity cipher for tests: stores plaintext as-is.
#[derive(Debug, Clone, Default)]
pub struct PlainCipher;

impl SecretCipher for PlainCipher {
  fn decrypt(&self, ciphertext: &str) -> Result<String, SecretError> {
    Ok(ciphertext.to_string())
  }

  fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
    Ok(plaintext.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip() {
    let cipher = AesGcmCipher::from_key_material("a short passphrase");
    let encrypted = cipher.encrypt("token=abc123").unwrap();
    assert_ne!(encrypted, "token=abc123");
    assert_eq!(cipher.decrypt(&encrypted).unwrap(), "token=abc123");
  }

  #[test]
  fn nonce_makes_ciphertexts_differ() {
    let cipher = AesGcmCipher::new([7u8; 32]);
    let a = cipher.encrypt("same").unwrap();
    let b = cipher.encrypt("same").unwrap();
    assert_ne!(a, b);
    assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
  }

  #[test]
  fn wrong_key_fails_authentication() {
    let cipher = AesGcmCipher::new([1u8; 32]);
    let other = AesGcmCipher::new([2u8; 32]);
    let encrypted = cipher.encrypt("secret").unwrap();
    assert!(matches!(other.decrypt(&encrypted), Err(SecretError::Decrypt)));
  }

  #[test]
  fn rejects_garbage() {
    let cipher = AesGcmCipher::new([1u8; 32]);
    assert!(cipher.decrypt("not base64!!!").is_err());
    assert!(cipher.decrypt(&BASE64.encode(b"short")).is_err());
  }
}
