//! Envelope encryption for SMTP credentials at rest
//!
//! AES-256-GCM under a process-wide key loaded once from configuration.
//! Ciphertext layout: base64(nonce || ct). Decrypted passwords must never
//! be logged, persisted or serialized into API responses.

use aes_gcm::{
    aead::{Aead, KeyInit},
    AeadCore, Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cadence_common::{Error, Result};

const NONCE_LENGTH: usize = 12;

/// Symmetric cipher for secrets at rest
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Build a cipher from the configured key: either 32 raw bytes or
    /// 64 hex characters.
    pub fn new(configured_key: &str) -> Result<Self> {
        let key_bytes = match configured_key.len() {
            32 => configured_key.as_bytes().to_vec(),
            64 => hex::decode(configured_key)
                .map_err(|e| Error::Crypto(format!("Invalid hex key: {}", e)))?,
            _ => {
                return Err(Error::Crypto(
                    "Encryption key must be 32 raw bytes or 64 hex characters".to_string(),
                ))
            }
        };

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);
        Ok(Self { key })
    }

    /// Encrypt a secret, producing base64(nonce || ciphertext)
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new((&self.key).into());
        let nonce = Aes256Gcm::generate_nonce(&mut aes_gcm::aead::OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        let mut combined = nonce.to_vec();
        combined.extend(ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt)
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let data = BASE64
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("Base64 decode failed: {}", e)))?;

        if data.len() < NONCE_LENGTH {
            return Err(Error::Crypto("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new((&self.key).into());

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Error::Crypto("Decryption failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|_| Error::Crypto("Invalid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "12345678901234567890123456789012";

    #[test]
    fn test_roundtrip() {
        let cipher = SecretCipher::new(KEY).unwrap();
        let encrypted = cipher.encrypt("smtp-password").unwrap();
        assert_ne!(encrypted, "smtp-password");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "smtp-password");
    }

    #[test]
    fn test_hex_key() {
        let hex_key = "000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f";
        let cipher = SecretCipher::new(hex_key).unwrap();
        let encrypted = cipher.encrypt("secret").unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "secret");
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(SecretCipher::new("short").is_err());
    }

    #[test]
    fn test_nonce_makes_ciphertext_unique() {
        let cipher = SecretCipher::new(KEY).unwrap();
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = SecretCipher::new(KEY).unwrap();
        let other = SecretCipher::new("09876543210987654321098765432109").unwrap();
        let encrypted = cipher.encrypt("secret").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_corrupted_ciphertext_fails() {
        let cipher = SecretCipher::new(KEY).unwrap();
        let mut encrypted = cipher.encrypt("secret").unwrap();
        encrypted.pop();
        encrypted.push('A');
        assert!(cipher.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_too_short_ciphertext() {
        let cipher = SecretCipher::new(KEY).unwrap();
        let short = BASE64.encode(b"tiny");
        assert!(cipher.decrypt(&short).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let cipher = SecretCipher::new(KEY).unwrap();
        let debug = format!("{:?}", cipher);
        assert!(!debug.contains(KEY));
    }
}
