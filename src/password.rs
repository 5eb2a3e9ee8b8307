//! Password hashing and verification using bcrypt

use crate::error::{KmsError, Result};

/// bcrypt only looks at the first 72 bytes of its input
pub const MAX_PASSWORD_BYTES: usize = 72;

pub const MIN_PASSWORD_BYTES: usize = 8;

/// Hashes and verifies passwords with a fixed bcrypt cost
#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    cost: u32,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self { cost: bcrypt::DEFAULT_COST }
    }
}

impl CredentialHasher {
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }

    /// Returns the modular-crypt formatted hash (salt included)
    pub fn hash(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| KmsError::Crypto(format!("Failed to hash password: {e}")))
    }

    /// A malformed stored hash is an internal error, a mismatch is `Ok(false)`
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        bcrypt::verify(password, hash)
            .map_err(|e| KmsError::Internal(format!("Invalid password hash format: {e}")))
    }

    /// Spends one full-cost verify on a hash no password matches.
    ///
    /// Used when there is no stored hash to check against, so that path
    /// takes as long as a real mismatch.
    pub fn verify_absent(&self, password: &str) {
        let _ = bcrypt::verify(password, &self.placeholder_hash());
    }

    /// Well-formed `$2b$` hash at this hasher's cost; salt and digest decode to all-zero-tail bytes
    fn placeholder_hash(&self) -> String {
        format!("$2b${:02}${}", self.cost, "O".repeat(53))
    }
}

/// Shape check done before hashing
pub fn validate_password(password: &str) -> Result<()> {
    let len = password.len();
    if !(MIN_PASSWORD_BYTES..=MAX_PASSWORD_BYTES).contains(&len) {
        return Err(KmsError::Validation(format!(
            "password must be {} to {} bytes long",
            MIN_PASSWORD_BYTES, MAX_PASSWORD_BYTES
        )));
    }
    Ok(())
}
