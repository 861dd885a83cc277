//! Password-at-rest encryption
//!
//! Connection passwords are sealed with AES-256-GCM under a 32-byte key
//! sourced from the `SLUICE_ENC_KEY` environment variable (base64). The
//! ciphertext layout is `nonce || sealed`; plaintext only ever lives on
//! the stack while a connection string is being assembled.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Environment variable carrying the base64-encoded 32-byte key.
pub const ENC_KEY_ENV: &str = "SLUICE_ENC_KEY";

const NONCE_LEN: usize = 12;

/// Authenticated cipher for connection secrets.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Build a cipher from a raw 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Load the key from `SLUICE_ENC_KEY`.
    pub fn from_env() -> crate::Result<Self> {
        let b64 = std::env::var(ENC_KEY_ENV)
            .map_err(|_| crate::Error::Crypto(format!("{ENC_KEY_ENV} is not set")))?;
        let raw = STANDARD
            .decode(b64.trim())
            .map_err(|e| crate::Error::Crypto(format!("invalid base64 key: {e}")))?;
        let key: [u8; 32] = raw
            .try_into()
            .map_err(|_| crate::Error::Crypto("encryption key must be 32 bytes".to_string()))?;
        Ok(Self::new(&key))
    }

    /// Seal a plaintext password. Output is nonce-prefixed ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> crate::Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| crate::Error::Crypto(format!("encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open nonce-prefixed ciphertext back into the plaintext password.
    pub fn decrypt(&self, data: &[u8]) -> crate::Result<String> {
        if data.len() < NONCE_LEN {
            return Err(crate::Error::Crypto("ciphertext too short".to_string()));
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| crate::Error::Crypto(format!("decrypt failed: {e}")))?;
        String::from_utf8(plain).map_err(|e| crate::Error::Crypto(format!("invalid utf-8: {e}")))
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> SecretCipher {
        SecretCipher::new(&[7u8; 32])
    }

    #[test]
    fn test_round_trip() {
        let cipher = test_cipher();
        let sealed = cipher.encrypt("hunter2").unwrap();
        assert_ne!(sealed.as_slice(), b"hunter2" as &[u8]);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_unique_nonce_per_encryption() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let cipher = test_cipher();
        let mut sealed = cipher.encrypt("secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let cipher = test_cipher();
        assert!(cipher.decrypt(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealed = test_cipher().encrypt("secret").unwrap();
        let other = SecretCipher::new(&[8u8; 32]);
        assert!(other.decrypt(&sealed).is_err());
    }
}
