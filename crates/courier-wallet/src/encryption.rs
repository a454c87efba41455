//! AES-256-GCM encryption of escrow key material.
//!
//! Keys are derived from the secret with Argon2id, so each call costs tens
//! of milliseconds; Bitcoin escrows run it on the [`crate::worker`] thread.
//!
//! # Wire format
//! ```text
//! salt (32 bytes) || nonce (12 bytes) || ciphertext + auth_tag
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use zeroize::Zeroizing;

use crate::error::WalletError;

/// Salt length in bytes.
pub const SALT_LEN: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Minimum encrypted payload size (salt + nonce + auth tag).
const MIN_ENCRYPTED_LEN: usize = SALT_LEN + NONCE_LEN + 16;

/// Derive a 256-bit encryption key from a secret and salt using Argon2id.
pub fn derive_key(secret: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, WalletError> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(secret, salt, &mut key[..])
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    Ok(key)
}

/// Encrypt plaintext under `secret`.
///
/// Generates a random 32-byte salt and 12-byte nonce. Returns
/// `salt || nonce || ciphertext+tag`.
pub fn encrypt(plaintext: &[u8], secret: &[u8]) -> Result<Vec<u8>, WalletError> {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(secret, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt data produced by [`encrypt`].
///
/// An authentication failure means the secret is wrong and maps to
/// [`WalletError::DecryptionFailed`]; no partial plaintext is returned.
pub fn decrypt(encrypted: &[u8], secret: &[u8]) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    if encrypted.len() < MIN_ENCRYPTED_LEN {
        return Err(WalletError::CorruptedEnvelope(format!(
            "encrypted data too short: {} < {MIN_ENCRYPTED_LEN}",
            encrypted.len()
        )));
    }

    let salt = &encrypted[..SALT_LEN];
    let nonce_bytes = &encrypted[SALT_LEN..SALT_LEN + NONCE_LEN];
    let ciphertext = &encrypted[SALT_LEN + NONCE_LEN..];

    let key = derive_key(secret, salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| WalletError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let secret = b"abcbob@x.com";
        let plaintext = b"escrow private key";

        let encrypted = encrypt(plaintext, secret).unwrap();
        let decrypted = decrypt(&encrypted, secret).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn wrong_secret_fails() {
        let encrypted = encrypt(b"secret", b"abcbob@x.com").unwrap();
        let err = decrypt(&encrypted, b"abcmallory@x.com").unwrap_err();
        assert_eq!(err, WalletError::DecryptionFailed);
    }

    #[test]
    fn truncated_data_fails() {
        let err = decrypt(&[0u8; 10], b"secret").unwrap_err();
        assert!(matches!(err, WalletError::CorruptedEnvelope(_)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut encrypted = encrypt(b"secret data", b"secret").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;
        assert_eq!(decrypt(&encrypted, b"secret").unwrap_err(), WalletError::DecryptionFailed);
    }

    #[test]
    fn tampered_nonce_fails() {
        let mut encrypted = encrypt(b"secret", b"secret").unwrap();
        encrypted[SALT_LEN] ^= 0xFF;
        assert_eq!(decrypt(&encrypted, b"secret").unwrap_err(), WalletError::DecryptionFailed);
    }

    #[test]
    fn derive_key_depends_on_salt() {
        let a = derive_key(b"secret", b"salt-one-padding").unwrap();
        let b = derive_key(b"secret", b"salt-two-padding").unwrap();
        let a2 = derive_key(b"secret", b"salt-one-padding").unwrap();
        assert_ne!(*a, *b);
        assert_eq!(*a, *a2);
    }

    #[test]
    fn encrypted_has_correct_overhead() {
        let encrypted = encrypt(b"hello", b"secret").unwrap();
        assert_eq!(encrypted.len(), SALT_LEN + NONCE_LEN + 5 + 16);
    }
}
