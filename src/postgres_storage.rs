use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::error::StorageError;
use crate::models::{Key, User};
use crate::storage::{KeyStorage, StorageResult, UserStorage};

/// PostgreSQL storage
///
/// Rows arrive here already field-encrypted:
/// - `users.username` / `users.role` sealed under the db key
/// - `keys.dek` sealed under the KEK
/// - lookups go through the blind-index columns only
pub struct PostgresStorage {
    pool: PgPool,
}

const CREATE_USERS: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL,
        hashed_username TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        role TEXT NOT NULL
    )
"#;

const CREATE_KEYS: &str = r#"
    CREATE TABLE IF NOT EXISTS keys (
        id BIGSERIAL PRIMARY KEY,
        key_reference_hash TEXT NOT NULL,
        dek TEXT NOT NULL,
        user_id BIGINT NOT NULL REFERENCES users (id),
        encoding TEXT NOT NULL,
        UNIQUE (user_id, key_reference_hash)
    )
"#;

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| storage_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `users` and `keys` tables if they do not exist yet
    pub async fn bootstrap(&self) -> StorageResult<()> {
        for statement in [CREATE_USERS, CREATE_KEYS] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| storage_error("bootstrap", e))?;
        }
        tracing::info!("database tables ready");
        Ok(())
    }
}

fn storage_error(context: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::RowNotFound => StorageError::NotFound(context.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::UniqueViolation(context.to_string())
        }
        other => StorageError::Backend(format!("{}: {}", context, other)),
    }
}

fn key_from_row(r: &PgRow) -> Key {
    Key {
        id: r.get("id"),
        key_reference_hash: r.get("key_reference_hash"),
        dek: r.get("dek"),
        user_id: r.get("user_id"),
        encoding: r.get("encoding"),
    }
}

fn user_from_row(r: &PgRow) -> User {
    User {
        id: r.get("id"),
        username: r.get("username"),
        hashed_username: r.get("hashed_username"),
        password: r.get("password"),
        role: r.get("role"),
    }
}

#[async_trait]
impl KeyStorage for PostgresStorage {
    async fn create_key(&self, key: Key) -> StorageResult<Key> {
        let row = sqlx::query(
            r#"
            INSERT INTO keys (key_reference_hash, dek, user_id, encoding)
            VALUES ($1, $2, $3, $4)
            RETURNING id, key_reference_hash, dek, user_id, encoding
            "#,
        )
        .bind(&key.key_reference_hash)
        .bind(&key.dek)
        .bind(key.user_id)
        .bind(&key.encoding)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("create key", e))?;

        Ok(key_from_row(&row))
    }

    async fn get_key(&self, user_id: i64, key_reference_hash: &str) -> StorageResult<Key> {
        let row = sqlx::query(
            r#"
            SELECT id, key_reference_hash, dek, user_id, encoding
            FROM keys
            WHERE user_id = $1 AND key_reference_hash = $2
            "#,
        )
        .bind(user_id)
        .bind(key_reference_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("get key", e))?;

        Ok(key_from_row(&row))
    }

    async fn update_key(&self, key: Key) -> StorageResult<Key> {
        let row = sqlx::query(
            r#"
            UPDATE keys
            SET dek = $3, encoding = $4
            WHERE id = $1 AND user_id = $2
            RETURNING id, key_reference_hash, dek, user_id, encoding
            "#,
        )
        .bind(key.id)
        .bind(key.user_id)
        .bind(&key.dek)
        .bind(&key.encoding)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("update key", e))?;

        Ok(key_from_row(&row))
    }

    async fn get_all_keys(&self, user_id: i64) -> StorageResult<Vec<Key>> {
        let rows = sqlx::query(
            r#"
            SELECT id, key_reference_hash, dek, user_id, encoding
            FROM keys
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list keys", e))?;

        Ok(rows.iter().map(key_from_row).collect())
    }
}

#[async_trait]
impl UserStorage for PostgresStorage {
    async fn create_user(&self, user: User, first_user_role: &str) -> StorageResult<User> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin create user", e))?;

        // serializes concurrent signups so only one of them can see an empty table
        sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error("lock users", e))?;

        let row = sqlx::query(
            r#"
            INSERT INTO users (username, hashed_username, password, role)
            SELECT $1, $2, $3,
                   CASE WHEN EXISTS (SELECT 1 FROM users) THEN $4 ELSE $5 END
            RETURNING id, username, hashed_username, password, role
            "#,
        )
        .bind(&user.username)
        .bind(&user.hashed_username)
        .bind(&user.password)
        .bind(&user.role)
        .bind(first_user_role)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| storage_error("create user", e))?;

        tx.commit().await.map_err(|e| storage_error("commit create user", e))?;
        Ok(user_from_row(&row))
    }

    async fn get_user(&self, id: i64) -> StorageResult<User> {
        let row = sqlx::query(
            "SELECT id, username, hashed_username, password, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("get user", e))?;

        Ok(user_from_row(&row))
    }

    async fn find_by_blind_index(&self, hashed_username: &str) -> StorageResult<User> {
        let row = sqlx::query(
            "SELECT id, username, hashed_username, password, role FROM users WHERE hashed_username = $1",
        )
        .bind(hashed_username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("find user", e))?;

        Ok(user_from_row(&row))
    }

    async fn update_role(&self, id: i64, role: &str) -> StorageResult<()> {
        let result = sqlx::query("UPDATE users SET role = $2 WHERE id = $1")
            .bind(id)
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("update role", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    async fn get_role(&self, id: i64) -> StorageResult<String> {
        let row = sqlx::query("SELECT role FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("get role", e))?;

        Ok(row.get("role"))
    }

    async fn get_all_users(&self) -> StorageResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, username, hashed_username, password, role FROM users ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list users", e))?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn count_users(&self) -> StorageResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("count users", e))?;

        Ok(row.get("count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert_eq!(
            storage_error("get key", sqlx::Error::RowNotFound),
            StorageError::NotFound("get key".into())
        );
    }

    #[test]
    fn test_other_errors_are_backend() {
        assert!(matches!(
            storage_error("get key", sqlx::Error::PoolTimedOut),
            StorageError::Backend(msg) if msg.starts_with("get key")
        ));
    }
}
