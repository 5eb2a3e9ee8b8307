//! Cryptographic primitives: AES-256-GCM sealing, key wrappers, base64url codec.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KmsError, Result};

/// AES-256 key size in bytes (256 bits)
pub const AES_256_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// DEK size in bytes
pub const DEK_SIZE: usize = 32;

/// A secret byte string that zeroizes memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey {
    bytes: Vec<u8>,
}

impl SecureKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Generate a new random AES-256 key
    pub fn generate() -> Self {
        Self { bytes: generate_random_bytes(AES_256_KEY_SIZE) }
    }

    /// Get the key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureKey([REDACTED])")
    }
}

/// Sealed bytes: the nonce and the ciphertext (tag included)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    pub fn new(nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self { nonce, ciphertext }
    }

    /// Encode `nonce || ciphertext` as base64url
    pub fn to_base64url(&self) -> String {
        let combined = [self.nonce.as_slice(), self.ciphertext.as_slice()].concat();
        b64url_encode(combined)
    }

    /// Decode `nonce || ciphertext` from base64url
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let decoded = b64url_decode(encoded)
            .map_err(|e| KmsError::Crypto(format!("Base64 decode error: {}", e)))?;

        if decoded.len() < NONCE_SIZE + TAG_SIZE {
            return Err(KmsError::Crypto("Invalid encrypted data length".into()));
        }

        let (nonce, ciphertext) = decoded.split_at(NONCE_SIZE);
        Ok(Self {
            nonce: nonce.to_vec(),
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// AES-256-GCM cipher wrapper
pub struct AesGcmCipher;

impl AesGcmCipher {
    /// Encrypt `plaintext` under `key` with a fresh random nonce.
    pub fn encrypt(key: &SecureKey, plaintext: &[u8]) -> Result<EncryptedData> {
        let cipher = Self::cipher(key)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| KmsError::Crypto(format!("Encryption error: {}", e)))?;

        Ok(EncryptedData::new(nonce_bytes.to_vec(), ciphertext))
    }

    /// Open `encrypted` under `key`.
    pub fn decrypt(key: &SecureKey, encrypted: &EncryptedData) -> Result<Vec<u8>> {
        if encrypted.nonce.len() != NONCE_SIZE {
            return Err(KmsError::Crypto(format!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                encrypted.nonce.len()
            )));
        }

        let cipher = Self::cipher(key)?;
        let nonce = Nonce::from_slice(&encrypted.nonce);

        cipher
            .decrypt(nonce, encrypted.ciphertext.as_slice())
            .map_err(|_| KmsError::Crypto("Decryption failed: authentication error".into()))
    }

    fn cipher(key: &SecureKey) -> Result<Aes256Gcm> {
        if key.len() != AES_256_KEY_SIZE {
            return Err(KmsError::Crypto(format!(
                "Invalid key size: expected {}, got {}",
                AES_256_KEY_SIZE,
                key.len()
            )));
        }
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| KmsError::Crypto(format!("Cipher init error: {}", e)))
    }
}

/// Generate cryptographically secure random bytes
pub fn generate_random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a fresh 256-bit data encryption key
pub fn generate_dek() -> SecureKey {
    SecureKey::new(generate_random_bytes(DEK_SIZE))
}

/// base64url without padding
pub fn b64url_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// base64url decode; trailing `=` padding is tolerated
pub fn b64url_decode(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('='))
}

/// base64url decode that only accepts the unpadded canonical form
pub fn b64url_decode_strict(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded)
}
