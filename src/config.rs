//! Command line and environment configuration.
//!
//! Every flag can also come from an environment variable; `main` loads `.env`
//! with dotenvy before parsing.

use clap::{Args, Parser, Subcommand};

use crate::error::{KmsError, Result};
use crate::key_manager::SecretsConfig;
use crate::token::MAX_TTL_MS;

/// Default lifetime of a signup grant (24h)
pub const DEFAULT_SIGNUP_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Key management service operator tool
#[derive(Parser, Debug, Clone)]
#[command(name = "kms")]
#[command(about = "Key management service: secrets, database bootstrap and signup grants")]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print six fresh root secrets as .env lines
    GenSecrets,

    /// Check the secrets and create the database tables
    InitDb {
        #[command(flatten)]
        database: DatabaseArgs,

        #[command(flatten)]
        secrets: SecretArgs,
    },

    /// Mint a one-time signup grant for a username
    SignupToken {
        /// Username the grant is bound to
        #[arg(long)]
        username: String,

        /// Grant lifetime in milliseconds
        #[arg(long, env = "SIGNUP_TTL_MS", default_value_t = DEFAULT_SIGNUP_TTL_MS)]
        ttl_ms: i64,

        #[command(flatten)]
        secrets: SecretArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Connection pool size
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
}

/// Root secrets, base64url encoded
#[derive(Args, Clone, Default)]
pub struct SecretArgs {
    #[arg(long, env = "KMS_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    #[arg(long, env = "KMS_SIGNUP_SECRET", hide_env_values = true)]
    pub signup_secret: Option<String>,

    #[arg(long, env = "KMS_KEK", hide_env_values = true)]
    pub kek: Option<String>,

    #[arg(long, env = "KMS_DB_KEY", hide_env_values = true)]
    pub db_key: Option<String>,

    #[arg(long, env = "KMS_KEY_REFERENCE_SECRET", hide_env_values = true)]
    pub key_reference_secret: Option<String>,

    #[arg(long, env = "KMS_USERNAME_SECRET", hide_env_values = true)]
    pub username_secret: Option<String>,
}

impl SecretArgs {
    pub fn to_secrets_config(&self) -> SecretsConfig {
        SecretsConfig {
            jwt: self.jwt_secret.clone(),
            signup: self.signup_secret.clone(),
            kek: self.kek.clone(),
            db: self.db_key.clone(),
            key_reference: self.key_reference_secret.clone(),
            username: self.username_secret.clone(),
        }
    }
}

impl std::fmt::Debug for SecretArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_secrets_config().fmt(f)
    }
}

/// Reject TTLs outside `1..=MAX_TTL_MS`
pub fn validate_ttl(name: &str, ttl_ms: i64) -> Result<()> {
    if ttl_ms <= 0 || ttl_ms > MAX_TTL_MS {
        return Err(KmsError::Config(format!(
            "{} must be between 1 and {} ms, got {}",
            name, MAX_TTL_MS, ttl_ms
        )));
    }
    Ok(())
}
