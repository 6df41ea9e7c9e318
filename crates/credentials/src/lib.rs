//! At-rest encryption for provider API keys.
//!
//! A process password plus a persisted random salt derive a 32-byte key via
//! Argon2id (memory-hard, 128 MiB / 3 passes). Each encrypt call seals the
//! plaintext under a fresh 12-byte nonce with ChaCha20-Poly1305; the stored
//! form is `base64(nonce || ciphertext)`, safe to keep next to config.
//!
//! Decrypting a record written under a different password fails with
//! [`Error::CredentialMismatch`]; callers treat that as "no key configured".
//! Plaintext secrets are never logged.

use std::path::Path;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use pl_domain::error::{Error, Result};

/// Argon2id memory cost in KiB (128 MiB).
const KDF_MEMORY_KIB: u32 = 128 * 1024;
/// Argon2id passes.
const KDF_ITERATIONS: u32 = 3;
/// Derived key length.
const KEY_LEN: usize = 32;
/// AEAD nonce length prepended to every ciphertext.
const NONCE_LEN: usize = 12;
/// Salt length stored hex-encoded in the salt file.
const SALT_LEN: usize = 16;

/// Salt file name under the per-user data directory.
pub const SALT_FILE: &str = "salt.txt";

/// Symmetric store for provider credentials.
pub struct SecretStore {
    cipher: ChaCha20Poly1305,
}

impl SecretStore {
    /// Derive the store key from `password` and an explicit salt.
    pub fn with_salt(password: &str, salt: &[u8]) -> Result<Self> {
        let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, 1, Some(KEY_LEN))
            .map_err(|e| Error::Config(format!("argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_LEN];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| Error::Config(format!("key derivation failed: {e}")))?;

        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    /// Derive the store key using the salt file under `dir`, generating the
    /// salt on first use.
    pub fn init_at(password: &str, dir: &Path) -> Result<Self> {
        let salt = load_or_create_salt(&dir.join(SALT_FILE))?;
        Self::with_salt(password, &salt)
    }

    /// Derive the store key using the per-user salt file
    /// (`$USER_DATA/parley/salt.txt`).
    pub fn init(password: &str) -> Result<Self> {
        Self::init_at(password, &pl_domain::config::user_data_dir())
    }

    /// Seal `plaintext` under a fresh nonce. Empty input round-trips as the
    /// empty string without touching the cipher.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::Config("encryption failed".into()))?;

        let mut record = Vec::with_capacity(NONCE_LEN + sealed.len());
        record.extend_from_slice(&nonce_bytes);
        record.extend_from_slice(&sealed);
        Ok(BASE64.encode(record))
    }

    /// Open a record produced by [`Self::encrypt`]. Any failure — bad
    /// base64, truncated record, wrong password — is a credential mismatch.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }
        let record = BASE64
            .decode(ciphertext)
            .map_err(|_| Error::CredentialMismatch)?;
        if record.len() <= NONCE_LEN {
            return Err(Error::CredentialMismatch);
        }
        let (nonce_bytes, sealed) = record.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| Error::CredentialMismatch)?;
        String::from_utf8(plaintext).map_err(|_| Error::CredentialMismatch)
    }
}

/// Read the hex-encoded salt, creating it with fresh random bytes when the
/// file does not exist yet.
fn load_or_create_salt(path: &Path) -> Result<Vec<u8>> {
    if path.exists() {
        let hex_salt = std::fs::read_to_string(path)?;
        let salt = hex::decode(hex_salt.trim())
            .map_err(|e| Error::Config(format!("salt file corrupt: {e}")))?;
        if salt.len() != SALT_LEN {
            return Err(Error::Config(format!(
                "salt file holds {} bytes, expected {SALT_LEN}",
                salt.len()
            )));
        }
        return Ok(salt);
    }

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, hex::encode(salt))?;
    tracing::info!(path = %path.display(), "generated credential salt");
    Ok(salt.to_vec())
}
