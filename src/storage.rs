//! Storage collaborator interfaces
//!
//! Services hand these traits at-rest (already field-encrypted) records and
//! get at-rest records back. Backends enforce the uniqueness rules:
//! `(user_id, key_reference_hash)` for keys and `hashed_username` for users.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StorageError;
use crate::models::{Key, User};

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Persistence for DEK rows
#[async_trait]
pub trait KeyStorage: Send + Sync {
    /// Insert a key row; the backend assigns `id`
    async fn create_key(&self, key: Key) -> StorageResult<Key>;

    /// Fetch by owner and reference blind index
    async fn get_key(&self, user_id: i64, key_reference_hash: &str) -> StorageResult<Key>;

    /// Overwrite `dek` and `encoding` of the existing row with `key.id`
    async fn update_key(&self, key: Key) -> StorageResult<Key>;

    /// All key rows of one user
    async fn get_all_keys(&self, user_id: i64) -> StorageResult<Vec<Key>>;
}

/// Persistence for user accounts
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Insert a user; the backend assigns `id`.
    ///
    /// When the table is empty the row is stored with `first_user_role`
    /// instead of `user.role`, decided atomically with the insert.
    async fn create_user(&self, user: User, first_user_role: &str) -> StorageResult<User>;

    async fn get_user(&self, id: i64) -> StorageResult<User>;

    /// Login lookup by username blind index
    async fn find_by_blind_index(&self, hashed_username: &str) -> StorageResult<User>;

    /// Replace the (sealed) role
    async fn update_role(&self, id: i64, role: &str) -> StorageResult<()>;

    /// The (sealed) role
    async fn get_role(&self, id: i64) -> StorageResult<String>;

    async fn get_all_users(&self) -> StorageResult<Vec<User>>;

    async fn count_users(&self) -> StorageResult<i64>;
}

#[derive(Default)]
struct State {
    keys: BTreeMap<i64, Key>,
    users: BTreeMap<i64, User>,
    next_key_id: i64,
    next_user_id: i64,
}

/// In-memory implementation of both storage traits
///
/// Suitable for development and tests. Data is lost when the process terminates.
#[derive(Default)]
pub struct InMemoryStorage {
    state: RwLock<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStorage for InMemoryStorage {
    async fn create_key(&self, mut key: Key) -> StorageResult<Key> {
        let mut state = self.state.write();
        let duplicate = state.keys.values().any(|k| {
            k.user_id == key.user_id && k.key_reference_hash == key.key_reference_hash
        });
        if duplicate {
            return Err(StorageError::UniqueViolation("keys(user_id, key_reference_hash)".into()));
        }

        state.next_key_id += 1;
        key.id = state.next_key_id;
        state.keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn get_key(&self, user_id: i64, key_reference_hash: &str) -> StorageResult<Key> {
        let state = self.state.read();
        state
            .keys
            .values()
            .find(|k| k.user_id == user_id && k.key_reference_hash == key_reference_hash)
            .cloned()
            .ok_or_else(|| StorageError::NotFound("key".into()))
    }

    async fn update_key(&self, key: Key) -> StorageResult<Key> {
        let mut state = self.state.write();
        let stored = state
            .keys
            .get_mut(&key.id)
            .filter(|k| k.user_id == key.user_id)
            .ok_or_else(|| StorageError::NotFound(format!("key {}", key.id)))?;

        stored.dek = key.dek;
        stored.encoding = key.encoding;
        Ok(stored.clone())
    }

    async fn get_all_keys(&self, user_id: i64) -> StorageResult<Vec<Key>> {
        let state = self.state.read();
        Ok(state.keys.values().filter(|k| k.user_id == user_id).cloned().collect())
    }
}

#[async_trait]
impl UserStorage for InMemoryStorage {
    async fn create_user(&self, mut user: User, first_user_role: &str) -> StorageResult<User> {
        let mut state = self.state.write();
        if state.users.values().any(|u| u.hashed_username == user.hashed_username) {
            return Err(StorageError::UniqueViolation("users(hashed_username)".into()));
        }
        if state.users.is_empty() {
            user.role = first_user_role.to_string();
        }

        state.next_user_id += 1;
        user.id = state.next_user_id;
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> StorageResult<User> {
        let state = self.state.read();
        state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))
    }

    async fn find_by_blind_index(&self, hashed_username: &str) -> StorageResult<User> {
        let state = self.state.read();
        state
            .users
            .values()
            .find(|u| u.hashed_username == hashed_username)
            .cloned()
            .ok_or_else(|| StorageError::NotFound("user".into()))
    }

    async fn update_role(&self, id: i64, role: &str) -> StorageResult<()> {
        let mut state = self.state.write();
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))?;
        user.role = role.to_string();
        Ok(())
    }

    async fn get_role(&self, id: i64) -> StorageResult<String> {
        self.get_user(id).await.map(|u| u.role)
    }

    async fn get_all_users(&self) -> StorageResult<Vec<User>> {
        let state = self.state.read();
        Ok(state.users.values().cloned().collect())
    }

    async fn count_users(&self) -> StorageResult<i64> {
        Ok(self.state.read().users.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(hashed: &str) -> User {
        User {
            id: 0,
            username: "sealed-name".into(),
            hashed_username: hashed.into(),
            password: "hash".into(),
            role: "sealed-role".into(),
        }
    }

    #[tokio::test]
    async fn test_key_ids_assigned() {
        let storage = InMemoryStorage::new();
        let a = storage.create_key(Key::new(1, "a".into(), "dek".into())).await.unwrap();
        let b = storage.create_key(Key::new(1, "b".into(), "dek".into())).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(storage.get_key(1, "b").await.unwrap(), b);
    }

    #[tokio::test]
    async fn test_key_unique_per_user() {
        let storage = InMemoryStorage::new();
        storage.create_key(Key::new(1, "ref".into(), "dek".into())).await.unwrap();

        let err = storage.create_key(Key::new(1, "ref".into(), "dek2".into())).await.unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation(_)));

        // same reference under another user is fine
        assert!(storage.create_key(Key::new(2, "ref".into(), "dek".into())).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_key_in_place() {
        let storage = InMemoryStorage::new();
        let created = storage.create_key(Key::new(1, "ref".into(), "old".into())).await.unwrap();

        let updated = storage
            .update_key(Key { dek: "new".into(), ..created.clone() })
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(storage.get_key(1, "ref").await.unwrap().dek, "new");
        assert_eq!(storage.get_all_keys(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_other_users_key_not_found() {
        let storage = InMemoryStorage::new();
        let created = storage.create_key(Key::new(1, "ref".into(), "old".into())).await.unwrap();
        let err = storage.update_key(Key { user_id: 2, ..created }).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_users() {
        let storage = InMemoryStorage::new();
        let alice = storage.create_user(user("alice-idx"), "first").await.unwrap();
        assert_eq!(alice.role, "first");
        assert!(matches!(
            storage.create_user(user("alice-idx"), "first").await,
            Err(StorageError::UniqueViolation(_))
        ));

        assert_eq!(storage.find_by_blind_index("alice-idx").await.unwrap().id, alice.id);
        assert!(matches!(
            storage.find_by_blind_index("bob-idx").await,
            Err(StorageError::NotFound(_))
        ));

        storage.update_role(alice.id, "other-role").await.unwrap();
        assert_eq!(storage.get_role(alice.id).await.unwrap(), "other-role");
        assert_eq!(storage.count_users().await.unwrap(), 1);
        assert_eq!(storage.get_all_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_first_user_role_only_applies_to_empty_table() {
        let storage = InMemoryStorage::new();
        let first = storage.create_user(user("a-idx"), "first").await.unwrap();
        let second = storage.create_user(user("b-idx"), "first").await.unwrap();

        assert_eq!(first.role, "first");
        assert_eq!(second.role, user("b-idx").role);
    }
}
