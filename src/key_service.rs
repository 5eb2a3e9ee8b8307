//! DEK lifecycle: create, fetch and rotate keys addressed by a caller-chosen reference.
//!
//! References never reach storage in plaintext; rows are looked up through the
//! blind index of the reference under the `keyReference` secret, and the DEK
//! itself is sealed under the KEK by the field codec.

use std::sync::Arc;

use tracing::info;

use crate::blind_index::blind_index;
use crate::crypto::{b64url_encode, generate_dek};
use crate::error::{KmsError, Result};
use crate::field_codec::FieldCodec;
use crate::key_manager::{KeyManager, SecretName};
use crate::models::Key;
use crate::storage::KeyStorage;

pub const MAX_KEY_REFERENCE_LEN: usize = 64;

/// Non-empty, at most 64 characters, ASCII letters, digits and `-` only
pub fn validate_key_reference(key_reference: &str) -> Result<()> {
    if key_reference.is_empty() {
        return Err(KmsError::Validation("key reference must not be empty".into()));
    }
    if key_reference.chars().count() > MAX_KEY_REFERENCE_LEN {
        return Err(KmsError::Validation(format!(
            "key reference must be at most {} characters",
            MAX_KEY_REFERENCE_LEN
        )));
    }
    if !key_reference.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(KmsError::Validation(
            "key reference may only contain letters, digits and hyphens".into(),
        ));
    }
    Ok(())
}

pub struct KeyService<S: KeyStorage> {
    storage: Arc<S>,
    keys: Arc<KeyManager>,
    codec: FieldCodec,
}

impl<S: KeyStorage> KeyService<S> {
    pub fn new(storage: Arc<S>, keys: Arc<KeyManager>) -> Self {
        let codec = FieldCodec::new(Arc::clone(&keys));
        Self { storage, keys, codec }
    }

    /// Generate and persist a fresh DEK under `key_reference`.
    ///
    /// A second create for the same `(user, reference)` fails with `Conflict`.
    pub async fn create_key(&self, user_id: i64, key_reference: &str) -> Result<Key> {
        let reference_hash = self.reference_hash(key_reference)?;
        let key = Key::new(user_id, reference_hash, fresh_dek());

        let sealed = self.codec.encrypt_fields(&key)?;
        let stored = self.storage.create_key(sealed).await?;
        let created = self.codec.decrypt_fields(&stored)?;

        info!(target: "kms::audit", action = "create_key", key_id = created.id, user_id, "key created");
        Ok(created)
    }

    /// Fetch the DEK stored under `key_reference`
    pub async fn get_key(&self, user_id: i64, key_reference: &str) -> Result<Key> {
        let reference_hash = self.reference_hash(key_reference)?;
        let stored = self.storage.get_key(user_id, &reference_hash).await?;
        let key = self.codec.decrypt_fields(&stored)?;

        info!(target: "kms::audit", action = "get_key", key_id = key.id, user_id, "key retrieved");
        Ok(key)
    }

    /// Replace the DEK under `key_reference` with a fresh one, keeping the row.
    ///
    /// The previous DEK is not retained.
    pub async fn renew_key(&self, user_id: i64, key_reference: &str) -> Result<Key> {
        let reference_hash = self.reference_hash(key_reference)?;
        let existing = self.storage.get_key(user_id, &reference_hash).await?;

        let renewed = Key { id: existing.id, ..Key::new(user_id, reference_hash, fresh_dek()) };

        let sealed = self.codec.encrypt_fields(&renewed)?;
        let stored = self.storage.update_key(sealed).await?;
        let key = self.codec.decrypt_fields(&stored)?;

        info!(target: "kms::audit", action = "renew_key", key_id = key.id, user_id, "key renewed");
        Ok(key)
    }

    /// Every key owned by `user_id`
    pub async fn list_keys(&self, user_id: i64) -> Result<Vec<Key>> {
        let stored = self.storage.get_all_keys(user_id).await?;
        let keys = self.codec.decrypt_all(&stored)?;

        info!(target: "kms::audit", action = "list_keys", user_id, count = keys.len(), "keys listed");
        Ok(keys)
    }

    fn reference_hash(&self, key_reference: &str) -> Result<String> {
        validate_key_reference(key_reference)?;
        blind_index(key_reference.as_bytes(), self.keys.secret(SecretName::KeyReference)?)
    }
}

fn fresh_dek() -> String {
    b64url_encode(generate_dek().as_bytes())
}
