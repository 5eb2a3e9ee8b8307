//! Deterministic keyed hashes for equality lookup over encrypted columns.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::{b64url_encode, SecureKey};
use crate::error::{KmsError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 tag of `message` under `key`
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| KmsError::Crypto(format!("HMAC init error: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `base64url(HMAC-SHA256(purpose_key, value))`
pub fn blind_index(value: &[u8], purpose_key: &SecureKey) -> Result<String> {
    hmac_sha256(purpose_key.as_bytes(), value).map(b64url_encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let key = SecureKey::generate();
        assert_eq!(
            blind_index(b"alice", &key).unwrap(),
            blind_index(b"alice", &key).unwrap()
        );
    }

    #[test]
    fn test_distinct_values_and_keys() {
        let key = SecureKey::generate();
        let other = SecureKey::generate();
        assert_ne!(blind_index(b"alice", &key).unwrap(), blind_index(b"bob", &key).unwrap());
        assert_ne!(blind_index(b"alice", &key).unwrap(), blind_index(b"alice", &other).unwrap());
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let key = SecureKey::new(b"Jefe".to_vec());
        let tag = hmac_sha256(key.as_bytes(), b"what do ya want for nothing?").unwrap();
        let hex: String = tag.iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843");

        let index = blind_index(b"what do ya want for nothing?", &key).unwrap();
        assert_eq!(index.len(), 43);
        assert!(!index.contains('='));
    }
}
