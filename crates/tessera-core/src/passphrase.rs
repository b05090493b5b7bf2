//! Passphrase encryption of key shares before they leave the process
//!
//! - **Argon2id** derives the key from the wallet passphrase
//! - **ChaCha20-Poly1305** encrypts the base64 key share
//!
//! The result is a compact JSON document stored as the keychain's
//! `encryptedPrv`.

use argon2::Argon2;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::types::{base64_bytes, KeyShare};

/// Encrypted private material format version
pub const ENCRYPTED_PRV_VERSION: u8 = 1;

const KDF_NAME: &str = "argon2id";
const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;

const ARGON2_MEMORY_KB: u32 = 19 * 1024; // 19 MB
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct EncryptedPrv {
    v: u8,
    kdf: String,
    #[serde(with = "base64_bytes")]
    salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    ct: Vec<u8>,
}

/// Encrypt a key share under `passphrase`
pub fn encrypt_private_material(key_share: &KeyShare, passphrase: &str) -> Result<String> {
    if passphrase.is_empty() {
        return Err(Error::Crypto("Passphrase is required".to_string()));
    }

    let mut rng = rand::rngs::OsRng;

    let mut salt = [0u8; SALT_SIZE];
    rng.fill_bytes(&mut salt);
    let key = derive_key(passphrase, &salt)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce_bytes);

    let plaintext = Zeroizing::new(
        base64::engine::general_purpose::STANDARD.encode(key_share.as_bytes()),
    );

    let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
        .map_err(|e| Error::Crypto(format!("Failed to create cipher: {}", e)))?;
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let encrypted = EncryptedPrv {
        v: ENCRYPTED_PRV_VERSION,
        kdf: KDF_NAME.to_string(),
        salt: salt.to_vec(),
        nonce: nonce_bytes.to_vec(),
        ct,
    };
    Ok(serde_json::to_string(&encrypted)?)
}

/// Recover a key share encrypted by [`encrypt_private_material`]
pub fn decrypt_private_material(encrypted: &str, passphrase: &str) -> Result<KeyShare> {
    let encrypted: EncryptedPrv = serde_json::from_str(encrypted)?;

    if encrypted.v != ENCRYPTED_PRV_VERSION || encrypted.kdf != KDF_NAME {
        return Err(Error::Serialization(format!(
            "Unsupported encrypted key format v{} ({})",
            encrypted.v, encrypted.kdf
        )));
    }
    if encrypted.salt.len() != SALT_SIZE || encrypted.nonce.len() != NONCE_SIZE {
        return Err(Error::Serialization(
            "Invalid salt or nonce length".to_string(),
        ));
    }

    let key = derive_key(passphrase, &encrypted.salt)?;
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
        .map_err(|e| Error::Crypto(format!("Failed to create cipher: {}", e)))?;

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&encrypted.nonce), encrypted.ct.as_slice())
            .map_err(|_| Error::Crypto("Decryption failed - invalid passphrase".to_string()))?,
    );

    let data = base64::engine::general_purpose::STANDARD.decode(plaintext.as_slice())?;
    Ok(KeyShare::new(data))
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = argon2::Params::new(
        ARGON2_MEMORY_KB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|e| Error::Crypto(format!("Invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let share = KeyShare::new(b"key share bytes".to_vec());
        let encrypted = encrypt_private_material(&share, "correct horse").unwrap();

        let value: serde_json::Value = serde_json::from_str(&encrypted).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["kdf"], "argon2id");
        assert!(!encrypted.contains("key share bytes"));

        let decrypted = decrypt_private_material(&encrypted, "correct horse").unwrap();
        assert_eq!(decrypted, share);
    }

    #[test]
    fn test_wrong_passphrase() {
        let share = KeyShare::new(vec![7; 64]);
        let encrypted = encrypt_private_material(&share, "right").unwrap();

        let err = decrypt_private_material(&encrypted, "wrong").unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let share = KeyShare::new(vec![1]);
        assert!(encrypt_private_material(&share, "").is_err());
    }

    #[test]
    fn test_salt_is_random() {
        let share = KeyShare::new(vec![3; 16]);
        let a = encrypt_private_material(&share, "pass").unwrap();
        let b = encrypt_private_material(&share, "pass").unwrap();
        assert_ne!(a, b);
    }
}
