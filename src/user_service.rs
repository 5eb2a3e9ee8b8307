//! Accounts: signup via one-time grants, login, session authentication and roles.

use std::sync::Arc;

use tracing::{debug, info};

use crate::blind_index::blind_index;
use crate::error::{KmsError, Result, StorageError};
use crate::field_codec::FieldCodec;
use crate::key_manager::{KeyManager, SecretName};
use crate::models::{Role, User};
use crate::password::{validate_password, CredentialHasher};
use crate::storage::UserStorage;
use crate::token::{self, SESSION_TOKEN_TYPE, SIGNUP_TOKEN_TYPE};

pub const MAX_USERNAME_LEN: usize = 64;

/// Default lifetime of a session token (1h)
pub const DEFAULT_SESSION_TTL_MS: i64 = 60 * 60 * 1000;

/// 1 to 64 characters of ASCII letters, digits, `-`, `_` or `.`
pub fn validate_username(username: &str) -> Result<()> {
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if username.is_empty() || username.len() > MAX_USERNAME_LEN || !valid_chars {
        return Err(KmsError::Validation(format!(
            "username must be 1 to {} letters, digits, '-', '_' or '.'",
            MAX_USERNAME_LEN
        )));
    }
    Ok(())
}

/// The authenticated caller of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<()> {
        if !self.is_admin() {
            return Err(KmsError::Forbidden("admin role required".into()));
        }
        Ok(())
    }
}

pub struct UserService<S: UserStorage> {
    storage: Arc<S>,
    keys: Arc<KeyManager>,
    codec: FieldCodec,
    hasher: CredentialHasher,
    session_ttl_ms: i64,
}

impl<S: UserStorage> UserService<S> {
    pub fn new(storage: Arc<S>, keys: Arc<KeyManager>, session_ttl_ms: i64) -> Self {
        let codec = FieldCodec::new(Arc::clone(&keys));
        Self {
            storage,
            keys,
            codec,
            hasher: CredentialHasher::default(),
            session_ttl_ms,
        }
    }

    pub fn with_hasher(mut self, hasher: CredentialHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Mint a one-time signup grant for `username`
    pub fn issue_signup_token(&self, username: &str, ttl_ms: i64) -> Result<String> {
        validate_username(username)?;
        let token = token::generate(self.keys.secret(SecretName::Signup)?, SIGNUP_TOKEN_TYPE, username, ttl_ms)?;
        info!(target: "kms::audit", action = "issue_signup_token", ttl_ms, "signup grant issued");
        Ok(token)
    }

    /// Redeem a signup grant. The first account ever created becomes admin;
    /// storage makes that decision under the same lock as the insert.
    pub async fn signup(&self, signup_token: &str, username: &str, password: &str) -> Result<User> {
        let grant = token::verify(self.keys.secret(SecretName::Signup)?, signup_token)?;
        grant.expect_type(SIGNUP_TOKEN_TYPE)?;
        if grant.subject() != username {
            return Err(KmsError::Unauthorized("signup grant was issued for another username".into()));
        }

        validate_username(username)?;
        validate_password(password)?;

        let user = User {
            id: 0,
            username: username.to_string(),
            hashed_username: self.username_index(username)?,
            password: self.hasher.hash(password)?,
            role: Role::User.to_string(),
        };

        let sealed = self.codec.encrypt_fields(&user)?;
        let first_user_role = self.codec.encrypt_value::<User>("role", Role::Admin.as_str())?;
        let stored = self.storage.create_user(sealed, &first_user_role).await?;
        let created = self.codec.decrypt_fields(&stored)?;

        info!(target: "kms::audit", action = "signup", user_id = created.id, role = %created.role, "user created");
        Ok(created)
    }

    /// Check credentials and issue a session token.
    ///
    /// Unknown usernames and wrong passwords fail the same way.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let rejected = || KmsError::Unauthorized("invalid username or password".into());

        let hashed_username = self.username_index(username)?;
        let user = match self.storage.find_by_blind_index(&hashed_username).await {
            Ok(user) => user,
            Err(StorageError::NotFound(_)) => {
                self.hasher.verify_absent(password);
                debug!("login for unknown username");
                return Err(rejected());
            }
            Err(e) => return Err(e.into()),
        };

        if !self.hasher.verify(password, &user.password)? {
            debug!(user_id = user.id, "login with wrong password");
            return Err(rejected());
        }

        let session = token::generate(
            self.keys.secret(SecretName::Jwt)?,
            SESSION_TOKEN_TYPE,
            &user.id.to_string(),
            self.session_ttl_ms,
        )?;
        info!(target: "kms::audit", action = "login", user_id = user.id, "session issued");
        Ok(session)
    }

    /// Resolve a session token to the caller
    pub async fn authenticate(&self, session_token: &str) -> Result<Principal> {
        let session = token::verify(self.keys.secret(SecretName::Jwt)?, session_token)?;
        session.expect_type(SESSION_TOKEN_TYPE)?;

        let user_id: i64 = session
            .subject()
            .parse()
            .map_err(|_| KmsError::Unauthorized("session subject is not a user id".into()))?;

        let role = match self.get_role(user_id).await {
            Err(KmsError::NotFound(_)) => {
                return Err(KmsError::Unauthorized("session user no longer exists".into()))
            }
            other => other?,
        };
        Ok(Principal { user_id, role })
    }

    pub async fn get_role(&self, user_id: i64) -> Result<Role> {
        let sealed = self.storage.get_role(user_id).await?;
        Role::parse(&self.codec.decrypt_value::<User>("role", &sealed)?)
    }

    /// Admins may read anyone, users only themselves
    pub async fn get_user(&self, caller: &Principal, user_id: i64) -> Result<User> {
        if caller.user_id != user_id {
            caller.require_admin()?;
        }
        let stored = self.storage.get_user(user_id).await?;
        self.codec.decrypt_fields(&stored)
    }

    pub async fn list_users(&self, caller: &Principal) -> Result<Vec<User>> {
        caller.require_admin()?;
        let stored = self.storage.get_all_users().await?;
        self.codec.decrypt_all(&stored)
    }

    pub async fn update_role(&self, caller: &Principal, user_id: i64, role: Role) -> Result<()> {
        caller.require_admin()?;
        let sealed = self.codec.encrypt_value::<User>("role", role.as_str())?;
        self.storage.update_role(user_id, &sealed).await?;

        info!(
            target: "kms::audit",
            action = "update_role",
            user_id,
            by = caller.user_id,
            role = %role,
            "role updated"
        );
        Ok(())
    }

    fn username_index(&self, username: &str) -> Result<String> {
        blind_index(username.as_bytes(), self.keys.secret(SecretName::Username)?)
    }
}
