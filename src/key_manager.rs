//! Process-wide holder of root secrets.
//!
//! Built once at startup from base64url text and never mutated afterwards, so a
//! `KeyManager` behind an `Arc` can be read from any number of tasks without locking.

use std::collections::HashMap;

use crate::crypto::{b64url_decode, b64url_encode, SecureKey, AES_256_KEY_SIZE};
use crate::error::{KmsError, Result};

/// The named root secrets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretName {
    /// Signs session tokens
    Jwt,
    /// Signs one-time signup grants
    Signup,
    /// Key-encryption key, wraps DEKs at rest
    Kek,
    /// Database field key
    Db,
    /// Blind-index key for key references
    KeyReference,
    /// Blind-index key for usernames
    Username,
}

impl SecretName {
    pub const ALL: [SecretName; 6] = [
        SecretName::Jwt,
        SecretName::Signup,
        SecretName::Kek,
        SecretName::Db,
        SecretName::KeyReference,
        SecretName::Username,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecretName::Jwt => "jwt",
            SecretName::Signup => "signup",
            SecretName::Kek => "kek",
            SecretName::Db => "db",
            SecretName::KeyReference => "keyReference",
            SecretName::Username => "username",
        }
    }

    /// Environment variable the secret is provisioned from
    pub fn env_var(&self) -> &'static str {
        match self {
            SecretName::Jwt => "KMS_JWT_SECRET",
            SecretName::Signup => "KMS_SIGNUP_SECRET",
            SecretName::Kek => "KMS_KEK",
            SecretName::Db => "KMS_DB_KEY",
            SecretName::KeyReference => "KMS_KEY_REFERENCE_SECRET",
            SecretName::Username => "KMS_USERNAME_SECRET",
        }
    }

    /// AES keys must be exactly 32 bytes; the rest are HMAC keys
    fn is_cipher_key(&self) -> bool {
        matches!(self, SecretName::Kek | SecretName::Db)
    }
}

impl std::fmt::Display for SecretName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw base64url secret text as handed over by the configuration loader
#[derive(Clone, Default)]
pub struct SecretsConfig {
    pub jwt: Option<String>,
    pub signup: Option<String>,
    pub kek: Option<String>,
    pub db: Option<String>,
    pub key_reference: Option<String>,
    pub username: Option<String>,
}

impl SecretsConfig {
    pub fn get(&self, name: SecretName) -> Option<&str> {
        let value = match name {
            SecretName::Jwt => &self.jwt,
            SecretName::Signup => &self.signup,
            SecretName::Kek => &self.kek,
            SecretName::Db => &self.db,
            SecretName::KeyReference => &self.key_reference,
            SecretName::Username => &self.username,
        };
        value.as_deref()
    }

    /// Fresh random 32-byte secrets, base64url encoded
    pub fn generate() -> Self {
        let fresh = || Some(b64url_encode(SecureKey::generate().as_bytes()));
        Self {
            jwt: fresh(),
            signup: fresh(),
            kek: fresh(),
            db: fresh(),
            key_reference: fresh(),
            username: fresh(),
        }
    }

    /// `.env` lines for every secret that is set
    pub fn to_env_lines(&self) -> Vec<String> {
        SecretName::ALL
            .iter()
            .filter_map(|name| self.get(*name).map(|v| format!("{}={}", name.env_var(), v)))
            .collect()
    }
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set: Vec<&str> = SecretName::ALL
            .iter()
            .filter(|name| self.get(**name).is_some())
            .map(|name| name.as_str())
            .collect();
        f.debug_struct("SecretsConfig").field("set", &set).finish()
    }
}

/// Root secret store
pub struct KeyManager {
    secrets: HashMap<SecretName, SecureKey>,
}

impl KeyManager {
    /// Build a store holding all six secrets; any missing or malformed one fails.
    pub fn new(config: &SecretsConfig) -> Result<Self> {
        if let Some(missing) = SecretName::ALL.iter().find(|name| config.get(**name).is_none()) {
            return Err(KmsError::Config(format!(
                "secret `{}` is not configured (set {})",
                missing,
                missing.env_var()
            )));
        }
        Self::partial(config)
    }

    /// Build a store from whichever secrets are configured.
    ///
    /// Lookups of the absent ones fail with `KmsError::Config`.
    pub fn partial(config: &SecretsConfig) -> Result<Self> {
        let mut secrets = HashMap::new();
        for name in SecretName::ALL {
            if let Some(text) = config.get(name) {
                secrets.insert(name, Self::decode(name, text)?);
            }
        }
        tracing::debug!(count = secrets.len(), "root secrets loaded");
        Ok(Self { secrets })
    }

    /// Store with freshly generated secrets (tests, demos)
    pub fn generate() -> Self {
        let secrets = SecretName::ALL
            .iter()
            .map(|name| (*name, SecureKey::generate()))
            .collect();
        Self { secrets }
    }

    pub fn secret(&self, name: SecretName) -> Result<&SecureKey> {
        self.secrets
            .get(&name)
            .ok_or_else(|| KmsError::Config(format!("secret `{}` is not configured", name)))
    }

    pub fn has(&self, name: SecretName) -> bool {
        self.secrets.contains_key(&name)
    }

    fn decode(name: SecretName, text: &str) -> Result<SecureKey> {
        let bytes = b64url_decode(text.trim())
            .map_err(|_| KmsError::Decode { secret: name.to_string() })?;

        if name.is_cipher_key() && bytes.len() != AES_256_KEY_SIZE {
            return Err(KmsError::Config(format!(
                "secret `{}` must decode to exactly {} bytes, got {}",
                name,
                AES_256_KEY_SIZE,
                bytes.len()
            )));
        }
        if bytes.is_empty() {
            return Err(KmsError::Config(format!("secret `{}` is empty", name)));
        }

        Ok(SecureKey::new(bytes))
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loaded: Vec<&str> = SecretName::ALL
            .iter()
            .filter(|name| self.has(**name))
            .map(|name| name.as_str())
            .collect();
        f.debug_struct("KeyManager").field("loaded", &loaded).finish()
    }
}
