//! Blob encryption for persisted seeds.
//!
//! One blob per wallet: the mnemonic phrase encrypted with
//! ChaCha20-Poly1305 under a key derived from the user password with
//! Argon2id and a per-wallet random salt. The derived key lives on the
//! stack only for the duration of a call and is zeroed afterwards.

use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use arca::error::HostError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// An encrypted seed blob as persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Per-wallet KDF salt, base64.
    pub salt: String,
    /// AEAD nonce, base64.
    pub nonce: String,
    /// Ciphertext with authentication tag, base64.
    pub ciphertext: String,
}

fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, HostError> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, key.as_mut())
        .map_err(|e| HostError::StorageEncryption {
            message: format!("key derivation failed: {e}"),
        })?;
    Ok(key)
}

/// Encrypts plaintext under a password with a fresh salt and nonce.
///
/// # Errors
///
/// Fails with [`HostError::StorageEncryption`] on KDF or cipher failure.
pub fn encrypt(password: &str, plaintext: &[u8]) -> Result<EncryptedBlob, HostError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| HostError::StorageEncryption {
            message: "encryption failed".to_owned(),
        })?;

    Ok(EncryptedBlob {
        salt: BASE64.encode(salt),
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Decrypts a blob with the given password.
///
/// # Errors
///
/// Fails with [`HostError::InvalidArgs`] when the password does not
/// authenticate (wrong password), and [`HostError::StorageEncryption`] for
/// malformed blobs.
pub fn decrypt(password: &str, blob: &EncryptedBlob) -> Result<Zeroizing<Vec<u8>>, HostError> {
    let decode = |field: &str, value: &str| {
        BASE64
            .decode(value)
            .map_err(|_| HostError::StorageEncryption {
                message: format!("corrupted blob: bad {field}"),
            })
    };
    let salt = decode("salt", &blob.salt)?;
    let nonce = decode("nonce", &blob.nonce)?;
    let ciphertext = decode("ciphertext", &blob.ciphertext)?;
    if nonce.len() != NONCE_LEN {
        return Err(HostError::StorageEncryption {
            message: "corrupted blob: bad nonce length".to_owned(),
        });
    }

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| HostError::invalid_args("invalid password"))?;
    Ok(Zeroizing::new(plaintext))
}
