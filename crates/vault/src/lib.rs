//! Envelope encryption for upstream credentials.
//!
//! A process-wide 32-byte master key (loaded once at startup, zeroized on
//! drop, never logged) encrypts each resource secret with AES-256-GCM under
//! a fresh 12-byte IV. The stored form is `(ciphertext, iv)` with the GCM
//! tag appended to the ciphertext; both travel as standard base64.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("master key must be 32 bytes of hex, got {0} bytes")]
    BadKeyLength(usize),

    #[error("master key is not valid hex")]
    BadKeyEncoding,

    #[error("stored secret is not valid base64")]
    BadStoredEncoding,

    #[error("IV must be 12 bytes, got {0}")]
    BadIvLength(usize),

    // Deliberately carries no detail: a GCM failure means wrong key or
    // corrupted record, and the distinction is not safe to surface.
    #[error("decryption failed")]
    DecryptFailed,

    #[error("encryption failed")]
    EncryptFailed,
}

pub type Result<T> = std::result::Result<T, VaultError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Master key
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The process-wide vault master key. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; 32],
}

impl MasterKey {
    /// Parse from 64 hex characters (the format `resgate keygen` emits).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let decoded = hex::decode(hex_str.trim()).map_err(|_| VaultError::BadKeyEncoding)?;
        Self::from_bytes(&decoded)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(VaultError::BadKeyLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Generate a fresh random key (for `keygen`).
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut arr = [0u8; 32];
        arr.copy_from_slice(key.as_slice());
        Self { bytes: arr }
    }

    /// Hex form for operator hand-off. Callers must treat the string as
    /// secret material.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([redacted])")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vault
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Encrypted secret as stored on a `ResourceSecret` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    /// Ciphertext with the GCM tag appended, standard base64.
    pub ciphertext_b64: String,
    /// 12-byte IV, standard base64.
    pub iv_b64: String,
}

/// AES-256-GCM envelope over the master key.
pub struct SecretVault {
    cipher: Aes256Gcm,
}

impl SecretVault {
    pub fn new(master_key: &MasterKey) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&master_key.bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt a plaintext credential under a fresh random IV.
    pub fn seal(&self, plaintext: &str) -> Result<SealedSecret> {
        let iv = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&iv, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptFailed)?;
        Ok(SealedSecret {
            ciphertext_b64: STANDARD.encode(&ciphertext),
            iv_b64: STANDARD.encode(iv),
        })
    }

    /// Decrypt a stored `(ciphertext, iv)` pair back to the credential.
    pub fn open(&self, ciphertext_b64: &str, iv_b64: &str) -> Result<String> {
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|_| VaultError::BadStoredEncoding)?;
        let iv_bytes = STANDARD
            .decode(iv_b64)
            .map_err(|_| VaultError::BadStoredEncoding)?;
        if iv_bytes.len() != 12 {
            return Err(VaultError::BadIvLength(iv_bytes.len()));
        }

        let mut plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv_bytes), ciphertext.as_ref())
            .map_err(|_| VaultError::DecryptFailed)?;

        match String::from_utf8(std::mem::take(&mut plaintext)) {
            Ok(s) => Ok(s),
            Err(e) => {
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                Err(VaultError::DecryptFailed)
            }
        }
    }
}
