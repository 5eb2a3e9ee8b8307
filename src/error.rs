//! Error kinds for the key management service

use thiserror::Error;

/// Result type alias for KMS operations
pub type Result<T> = std::result::Result<T, KmsError>;

/// Errors surfaced by the cryptographic core and the services built on it.
///
/// Cipher variants carry the field name only; plaintext and key bytes never
/// end up in an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KmsError {
    /// Missing or unusable secret / setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured secret is not valid base64url
    #[error("Secret `{secret}` is not valid base64url")]
    Decode { secret: String },

    /// Caller input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A field marked for encryption does not hold a string
    #[error("Field `{field}` is marked for encryption but is not a string")]
    NotAString { field: String },

    /// Record declaration does not match its policy table
    #[error("Record `{record}` declares {expected} field policies but exposes {found} fields")]
    FieldTypeMismatch {
        record: &'static str,
        expected: usize,
        found: usize,
    },

    /// Encrypting a field failed
    #[error("Failed to encrypt field `{field}`")]
    Encrypt { field: String },

    /// Decrypting a field failed (corrupted ciphertext, wrong key, truncated nonce)
    #[error("Failed to decrypt field `{field}`")]
    Decrypt { field: String },

    /// Token is not three dot-separated base64url segments of valid JSON
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Token signature does not match
    #[error("Token signature is invalid")]
    Signature,

    /// Token is past `iat + ttl`
    #[error("Token has expired")]
    ExpiredToken,

    /// Token verified but carries the wrong `typ`
    #[error("Wrong token type: expected `{expected}`, found `{found}`")]
    WrongTokenType { expected: String, found: String },

    /// Bad credentials or a token whose subject does not fit the request
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Record not found in storage
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage unique constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Primitive failure outside a record field
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other storage or runtime failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KmsError {
    /// Token failures that a transport should answer with "unauthorized".
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            KmsError::MalformedToken(_)
                | KmsError::Signature
                | KmsError::ExpiredToken
                | KmsError::WrongTokenType { .. }
                | KmsError::Unauthorized(_)
        )
    }

    /// HTTP-style status code a transport layer would map this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            e if e.is_unauthorized() => 401,
            KmsError::Validation(_) => 400,
            KmsError::Forbidden(_) => 403,
            KmsError::NotFound(_) => 404,
            KmsError::Conflict(_) => 409,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for KmsError {
    fn from(err: serde_json::Error) -> Self {
        KmsError::Serialization(err.to_string())
    }
}

/// Errors returned by storage collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A unique constraint rejected the write
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// No row matched
    #[error("row not found: {0}")]
    NotFound(String),

    /// Anything else the backend reported
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for KmsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UniqueViolation(what) => KmsError::Conflict(what),
            StorageError::NotFound(what) => KmsError::NotFound(what),
            StorageError::Backend(msg) => KmsError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_kinds() {
        assert_eq!(
            KmsError::from(StorageError::UniqueViolation("keys".into())),
            KmsError::Conflict("keys".into())
        );
        assert_eq!(
            KmsError::from(StorageError::NotFound("key".into())),
            KmsError::NotFound("key".into())
        );
        assert!(matches!(
            KmsError::from(StorageError::Backend("io".into())),
            KmsError::Internal(_)
        ));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(KmsError::Signature.status_code(), 401);
        assert_eq!(KmsError::ExpiredToken.status_code(), 401);
        assert_eq!(
            KmsError::WrongTokenType { expected: "jwt".into(), found: "signup".into() }.status_code(),
            401
        );
        assert_eq!(KmsError::Validation("bad".into()).status_code(), 400);
        assert_eq!(KmsError::Conflict("dup".into()).status_code(), 409);
        assert_eq!(KmsError::Decrypt { field: "dek".into() }.status_code(), 500);
    }
}
