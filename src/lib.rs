pub mod blind_index;
pub mod config;
pub mod crypto;
pub mod error;
pub mod field_codec;
pub mod key_manager;
pub mod key_service;
pub mod models;
pub mod password;
pub mod storage;
pub mod telemetry;
pub mod token;
pub mod user_service;

// PostgreSQL backend
pub mod postgres_storage;

pub use blind_index::blind_index;
pub use crypto::{AesGcmCipher, EncryptedData, SecureKey, AES_256_KEY_SIZE, NONCE_SIZE};
pub use error::{KmsError, Result, StorageError};
pub use field_codec::{FieldCodec, FieldPolicy, FieldSlot, KeyKind, Record};
pub use key_manager::{KeyManager, SecretName, SecretsConfig};
pub use key_service::{validate_key_reference, KeyService};
pub use models::{Key, Role, User};
pub use password::CredentialHasher;
pub use storage::{InMemoryStorage, KeyStorage, UserStorage};
pub use token::{Header, Payload, Token};
pub use user_service::{Principal, UserService};

pub use postgres_storage::PostgresStorage;
