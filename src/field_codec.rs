//! Declarative field-level encryption for persisted records.
//!
//! Each record type lists a static [`FieldPolicy`] per field, in declaration
//! order, and exposes its fields as [`FieldSlot`]s in the same order. The
//! [`FieldCodec`] walks both lists side by side: unmarked fields are left
//! alone, marked fields are sealed with AES-256-GCM under the policy's root key
//! and stored as base64url(`nonce || ciphertext`).

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{b64url_decode, b64url_encode, AesGcmCipher, EncryptedData, SecureKey};
use crate::error::{KmsError, Result};
use crate::key_manager::{KeyManager, SecretName};

/// Which root key protects a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyKind {
    #[default]
    Db,
    Kek,
}

impl KeyKind {
    pub fn secret_name(&self) -> SecretName {
        match self {
            KeyKind::Db => SecretName::Db,
            KeyKind::Kek => SecretName::Kek,
        }
    }
}

/// Per-field encryption policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    pub name: &'static str,
    pub encrypt: bool,
    /// Plaintext value is itself base64url (e.g. a DEK)
    pub pre_encoded: bool,
    pub key: KeyKind,
}

impl FieldPolicy {
    /// Field that passes through untouched
    pub const fn plain(name: &'static str) -> Self {
        Self { name, encrypt: false, pre_encoded: false, key: KeyKind::Db }
    }

    /// Field whose raw string bytes are encrypted
    pub const fn encrypted(name: &'static str, key: KeyKind) -> Self {
        Self { name, encrypt: true, pre_encoded: false, key }
    }

    /// Field holding base64url text whose decoded bytes are encrypted
    pub const fn encrypted_pre_encoded(name: &'static str, key: KeyKind) -> Self {
        Self { name, encrypt: true, pre_encoded: true, key }
    }
}

/// Mutable view of one record field
pub enum FieldSlot<'a> {
    Text(&'a mut String),
    Other,
}

/// A record the codec can transform.
///
/// `slots` must yield exactly one slot per entry of `POLICIES`, in the same order.
pub trait Record: Clone {
    const NAME: &'static str;
    const POLICIES: &'static [FieldPolicy];

    fn slots(&mut self) -> Vec<FieldSlot<'_>>;
}

#[derive(Clone, Copy)]
enum Direction {
    Seal,
    Open,
}

/// Encrypts and decrypts record fields according to their policies
#[derive(Clone)]
pub struct FieldCodec {
    keys: Arc<KeyManager>,
}

impl FieldCodec {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    /// Plaintext record -> at-rest record
    pub fn encrypt_fields<R: Record>(&self, src: &R) -> Result<R> {
        self.transform(src, Direction::Seal)
    }

    /// At-rest record -> plaintext record
    pub fn decrypt_fields<R: Record>(&self, src: &R) -> Result<R> {
        self.transform(src, Direction::Open)
    }

    /// Decrypt every record of a batch, failing on the first bad one
    pub fn decrypt_all<R: Record>(&self, src: &[R]) -> Result<Vec<R>> {
        src.iter().map(|r| self.decrypt_fields(r)).collect()
    }

    /// Seal a single field value of `R` as it would be sealed inside the record
    pub fn encrypt_value<R: Record>(&self, field: &str, value: &str) -> Result<String> {
        self.transform_value::<R>(field, value, Direction::Seal)
    }

    /// Open a single at-rest field value of `R`
    pub fn decrypt_value<R: Record>(&self, field: &str, value: &str) -> Result<String> {
        self.transform_value::<R>(field, value, Direction::Open)
    }

    fn transform_value<R: Record>(&self, field: &str, value: &str, direction: Direction) -> Result<String> {
        let policy = R::POLICIES
            .iter()
            .find(|p| p.name == field)
            .ok_or_else(|| KmsError::Internal(format!("record `{}` has no field `{}`", R::NAME, field)))?;
        if !policy.encrypt {
            return Ok(value.to_string());
        }

        let key = self.keys.secret(policy.key.secret_name())?;
        match direction {
            Direction::Seal => seal(policy, key, value),
            Direction::Open => open(policy, key, value),
        }
    }

    fn transform<R: Record>(&self, src: &R, direction: Direction) -> Result<R> {
        let mut dst = src.clone();
        {
            let slots = dst.slots();
            if slots.len() != R::POLICIES.len() {
                return Err(KmsError::FieldTypeMismatch {
                    record: R::NAME,
                    expected: R::POLICIES.len(),
                    found: slots.len(),
                });
            }

            for (policy, slot) in R::POLICIES.iter().zip(slots) {
                if !policy.encrypt {
                    continue;
                }
                let value = match slot {
                    FieldSlot::Text(value) => value,
                    FieldSlot::Other => {
                        return Err(KmsError::NotAString { field: policy.name.to_string() })
                    }
                };
                let key = self.keys.secret(policy.key.secret_name())?;
                let transformed = match direction {
                    Direction::Seal => seal(policy, key, value.as_str())?,
                    Direction::Open => open(policy, key, value.as_str())?,
                };
                *value = transformed;
            }
        }
        Ok(dst)
    }
}

fn seal(policy: &FieldPolicy, key: &SecureKey, value: &str) -> Result<String> {
    let field_error = || KmsError::Encrypt { field: policy.name.to_string() };

    let plaintext = if policy.pre_encoded {
        Zeroizing::new(b64url_decode(value).map_err(|_| field_error())?)
    } else {
        Zeroizing::new(value.as_bytes().to_vec())
    };

    let sealed = AesGcmCipher::encrypt(key, &plaintext).map_err(|_| field_error())?;
    Ok(sealed.to_base64url())
}

fn open(policy: &FieldPolicy, key: &SecureKey, value: &str) -> Result<String> {
    let field_error = || KmsError::Decrypt { field: policy.name.to_string() };

    let sealed = EncryptedData::from_base64url(value).map_err(|_| field_error())?;
    let plaintext = Zeroizing::new(AesGcmCipher::decrypt(key, &sealed).map_err(|_| field_error())?);

    if policy.pre_encoded {
        Ok(b64url_encode(plaintext.as_slice()))
    } else {
        String::from_utf8(plaintext.to_vec()).map_err(|_| field_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Secretive {
        id: i64,
        note: String,
        token: String,
        lookup: String,
    }

    impl Record for Secretive {
        const NAME: &'static str = "Secretive";
        const POLICIES: &'static [FieldPolicy] = &[
            FieldPolicy::plain("id"),
            FieldPolicy::encrypted("note", KeyKind::Db),
            FieldPolicy::encrypted_pre_encoded("token", KeyKind::Kek),
            FieldPolicy::plain("lookup"),
        ];

        fn slots(&mut self) -> Vec<FieldSlot<'_>> {
            vec![
                FieldSlot::Other,
                FieldSlot::Text(&mut self.note),
                FieldSlot::Text(&mut self.token),
                FieldSlot::Text(&mut self.lookup),
            ]
        }
    }

    #[derive(Debug, Clone)]
    struct Misdeclared {
        count: i64,
    }

    impl Record for Misdeclared {
        const NAME: &'static str = "Misdeclared";
        const POLICIES: &'static [FieldPolicy] = &[FieldPolicy::encrypted("count", KeyKind::Db)];

        fn slots(&mut self) -> Vec<FieldSlot<'_>> {
            let _ = self.count;
            vec![FieldSlot::Other]
        }
    }

    #[derive(Debug, Clone)]
    struct ShortSlots {
        a: String,
    }

    impl Record for ShortSlots {
        const NAME: &'static str = "ShortSlots";
        const POLICIES: &'static [FieldPolicy] =
            &[FieldPolicy::plain("a"), FieldPolicy::plain("b")];

        fn slots(&mut self) -> Vec<FieldSlot<'_>> {
            vec![FieldSlot::Text(&mut self.a)]
        }
    }

    fn sample() -> Secretive {
        Secretive {
            id: 42,
            note: "hello wörld".into(),
            token: b64url_encode([5u8; 32]),
            lookup: "abc".into(),
        }
    }

    fn codec() -> FieldCodec {
        FieldCodec::new(Arc::new(KeyManager::generate()))
    }

    #[test]
    fn test_roundtrip() {
        let codec = codec();
        let plain = sample();
        let sealed = codec.encrypt_fields(&plain).unwrap();
        assert_eq!(codec.decrypt_fields(&sealed).unwrap(), plain);
    }

    #[test]
    fn test_unmarked_fields_untouched() {
        let codec = codec();
        let plain = sample();
        let sealed = codec.encrypt_fields(&plain).unwrap();

        assert_eq!(sealed.id, plain.id);
        assert_eq!(sealed.lookup, plain.lookup);
        assert_ne!(sealed.note, plain.note);
        assert_ne!(sealed.token, plain.token);

        let opened = codec.decrypt_fields(&sealed).unwrap();
        assert_eq!(opened.lookup, sealed.lookup);
    }

    #[test]
    fn test_sealed_values_are_base64url() {
        let sealed = codec().encrypt_fields(&sample()).unwrap();
        for value in [&sealed.note, &sealed.token] {
            let bytes = b64url_decode(value).unwrap();
            // nonce + 16-byte tag + plaintext
            assert!(bytes.len() >= 12 + 16);
        }
        // pre-encoded DEK is sealed as its 32 raw bytes
        assert_eq!(b64url_decode(&sealed.token).unwrap().len(), 12 + 32 + 16);
    }

    #[test]
    fn test_encryption_is_randomized() {
        let codec = codec();
        let a = codec.encrypt_fields(&sample()).unwrap();
        let b = codec.encrypt_fields(&sample()).unwrap();
        assert_ne!(a.note, b.note);
    }

    #[test]
    fn test_fields_use_their_declared_key() {
        let keys = Arc::new(KeyManager::generate());
        let codec = FieldCodec::new(keys.clone());
        let sealed = codec.encrypt_fields(&sample()).unwrap();

        let kek = keys.secret(SecretName::Kek).unwrap();
        let db = keys.secret(SecretName::Db).unwrap();
        let token = EncryptedData::from_base64url(&sealed.token).unwrap();
        assert!(AesGcmCipher::decrypt(kek, &token).is_ok());
        assert!(AesGcmCipher::decrypt(db, &token).is_err());
    }

    #[test]
    fn test_wrong_key_is_decrypt_error() {
        let sealed = codec().encrypt_fields(&sample()).unwrap();
        let err = codec().decrypt_fields(&sealed).unwrap_err();
        assert_eq!(err, KmsError::Decrypt { field: "note".into() });
    }

    #[test]
    fn test_corrupted_ciphertext_is_decrypt_error() {
        let codec = codec();
        let mut sealed = codec.encrypt_fields(&sample()).unwrap();
        let mut bytes = b64url_decode(&sealed.token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        sealed.token = b64url_encode(bytes);

        assert_eq!(
            codec.decrypt_fields(&sealed).unwrap_err(),
            KmsError::Decrypt { field: "token".into() }
        );
    }

    #[test]
    fn test_truncated_value_is_decrypt_error() {
        let codec = codec();
        let mut sealed = codec.encrypt_fields(&sample()).unwrap();
        sealed.note = b64url_encode([0u8; 8]);
        assert_eq!(
            codec.decrypt_fields(&sealed).unwrap_err(),
            KmsError::Decrypt { field: "note".into() }
        );
    }

    #[test]
    fn test_non_utf8_plaintext_is_decrypt_error() {
        let keys = Arc::new(KeyManager::generate());
        let codec = FieldCodec::new(keys.clone());
        let mut sealed = codec.encrypt_fields(&sample()).unwrap();

        let db = keys.secret(SecretName::Db).unwrap();
        sealed.note = AesGcmCipher::encrypt(db, &[0xff, 0xfe, 0xfd]).unwrap().to_base64url();

        assert_eq!(
            codec.decrypt_fields(&sealed).unwrap_err(),
            KmsError::Decrypt { field: "note".into() }
        );
    }

    #[test]
    fn test_invalid_pre_encoded_plaintext_is_encrypt_error() {
        let mut plain = sample();
        plain.token = "not*base64".into();
        assert_eq!(
            codec().encrypt_fields(&plain).unwrap_err(),
            KmsError::Encrypt { field: "token".into() }
        );
    }

    #[test]
    fn test_non_string_field_rejected() {
        let err = codec().encrypt_fields(&Misdeclared { count: 3 }).unwrap_err();
        assert_eq!(err, KmsError::NotAString { field: "count".into() });
    }

    #[test]
    fn test_policy_table_mismatch_rejected() {
        let err = codec().decrypt_fields(&ShortSlots { a: "x".into() }).unwrap_err();
        assert!(matches!(err, KmsError::FieldTypeMismatch { expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_single_value_matches_record_policy() {
        let codec = codec();
        let sealed = codec.encrypt_value::<Secretive>("note", "just this").unwrap();

        assert_eq!(codec.decrypt_value::<Secretive>("note", &sealed).unwrap(), "just this");

        let mut record = codec.encrypt_fields(&sample()).unwrap();
        record.note = sealed;
        assert_eq!(codec.decrypt_fields(&record).unwrap().note, "just this");

        assert_eq!(codec.encrypt_value::<Secretive>("lookup", "abc").unwrap(), "abc");
        assert!(matches!(
            codec.decrypt_value::<Secretive>("missing", "abc"),
            Err(KmsError::Internal(_))
        ));
    }

    #[test]
    fn test_missing_root_key_is_config_error() {
        let codec = FieldCodec::new(Arc::new(KeyManager::partial(&Default::default()).unwrap()));
        assert!(matches!(codec.encrypt_fields(&sample()), Err(KmsError::Config(_))));
    }
}
