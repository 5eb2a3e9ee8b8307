//! Persisted records and their field-encryption policies.

use serde::{Deserialize, Serialize};

use crate::error::{KmsError, Result};
use crate::field_codec::{FieldPolicy, FieldSlot, KeyKind, Record};

/// Encoding label stored with every DEK
pub const DEK_ENCODING: &str = "base64url (RFC 4648)";

/// A data-encryption key owned by a user under a caller-chosen reference.
///
/// `dek` holds base64url text in plaintext form and the KEK-sealed value at rest.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub id: i64,
    pub key_reference_hash: String,
    pub dek: String,
    pub user_id: i64,
    pub encoding: String,
}

impl Key {
    /// New, not yet persisted key row
    pub fn new(user_id: i64, key_reference_hash: String, dek: String) -> Self {
        Self {
            id: 0,
            key_reference_hash,
            dek,
            user_id,
            encoding: DEK_ENCODING.to_string(),
        }
    }
}

impl Record for Key {
    const NAME: &'static str = "Key";
    const POLICIES: &'static [FieldPolicy] = &[
        FieldPolicy::plain("id"),
        FieldPolicy::plain("keyReferenceHash"),
        FieldPolicy::encrypted_pre_encoded("dek", KeyKind::Kek),
        FieldPolicy::plain("userId"),
        FieldPolicy::plain("encoding"),
    ];

    fn slots(&mut self) -> Vec<FieldSlot<'_>> {
        vec![
            FieldSlot::Other,
            FieldSlot::Text(&mut self.key_reference_hash),
            FieldSlot::Text(&mut self.dek),
            FieldSlot::Other,
            FieldSlot::Text(&mut self.encoding),
        ]
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("key_reference_hash", &self.key_reference_hash)
            .field("dek", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// The two roles a user can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(KmsError::Validation(format!("unknown role `{}`", other))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account. `username` and `role` are sealed under the db key at rest,
/// `password` is a bcrypt hash and `hashed_username` the login blind index.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hashed_username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: String,
}

impl User {
    pub fn role(&self) -> Result<Role> {
        Role::parse(&self.role)
    }
}

impl Record for User {
    const NAME: &'static str = "User";
    const POLICIES: &'static [FieldPolicy] = &[
        FieldPolicy::plain("id"),
        FieldPolicy::encrypted("username", KeyKind::Db),
        FieldPolicy::plain("hashedUsername"),
        FieldPolicy::plain("password"),
        FieldPolicy::encrypted("role", KeyKind::Db),
    ];

    fn slots(&mut self) -> Vec<FieldSlot<'_>> {
        vec![
            FieldSlot::Other,
            FieldSlot::Text(&mut self.username),
            FieldSlot::Text(&mut self.hashed_username),
            FieldSlot::Text(&mut self.password),
            FieldSlot::Text(&mut self.role),
        ]
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("hashed_username", &self.hashed_username)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::crypto::{b64url_encode, generate_dek};
    use crate::field_codec::FieldCodec;
    use crate::key_manager::KeyManager;

    fn codec() -> FieldCodec {
        FieldCodec::new(Arc::new(KeyManager::generate()))
    }

    #[test]
    fn test_key_roundtrip_only_seals_dek() {
        let codec = codec();
        let key = Key {
            id: 7,
            ..Key::new(1, "ref-hash".into(), b64url_encode(generate_dek().as_bytes()))
        };

        let sealed = codec.encrypt_fields(&key).unwrap();
        assert_eq!(sealed.id, 7);
        assert_eq!(sealed.user_id, 1);
        assert_eq!(sealed.key_reference_hash, "ref-hash");
        assert_eq!(sealed.encoding, DEK_ENCODING);
        assert_ne!(sealed.dek, key.dek);

        assert_eq!(codec.decrypt_fields(&sealed).unwrap(), key);
    }

    #[test]
    fn test_user_roundtrip_leaves_password_hash() {
        let codec = codec();
        let user = User {
            id: 3,
            username: "alice".into(),
            hashed_username: "idx".into(),
            password: "$2b$04$abcdefghijklmnopqrstuv".into(),
            role: Role::Admin.to_string(),
        };

        let sealed = codec.encrypt_fields(&user).unwrap();
        assert_eq!(sealed.password, user.password);
        assert_eq!(sealed.hashed_username, user.hashed_username);
        assert_ne!(sealed.username, "alice");
        assert_ne!(sealed.role, "admin");

        let opened = codec.decrypt_fields(&sealed).unwrap();
        assert_eq!(opened, user);
        assert_eq!(opened.role().unwrap(), Role::Admin);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let key = Key::new(1, "h".into(), "super-secret-dek".into());
        assert!(!format!("{:?}", key).contains("super-secret-dek"));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("user").unwrap(), Role::User);
        assert!(matches!(Role::parse("root"), Err(KmsError::Validation(_))));
    }
}
