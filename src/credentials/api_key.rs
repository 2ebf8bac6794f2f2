use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use super::{CredentialError, PasswordHasher};

/// Raw key length before encoding
pub const API_KEY_BYTES: usize = 32;

/// Length of the non-secret lookup prefix
pub const KEY_PREFIX_LEN: usize = 8;

/// A freshly issued key
///
/// `Debug` never prints the plaintext.
#[derive(Clone)]
pub struct GeneratedKey {
    plaintext: String,
    pub hash: String,
    pub prefix: String,
}

impl GeneratedKey {
    pub fn plaintext(&self) -> &str {
        &self.plaintext
    }

    /// Hand the plaintext over for the one response that discloses it.
    pub fn into_plaintext(self) -> String {
        self.plaintext
    }
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("plaintext", &"<redacted>")
            .field("prefix", &self.prefix)
            .finish()
    }
}

fn random_bytes(len: usize) -> Result<Vec<u8>, CredentialError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CredentialError::Entropy(e.to_string()))?;
    Ok(bytes)
}

/// Random URL-safe token of `len` raw bytes
pub fn random_token(len: usize) -> Result<String, CredentialError> {
    Ok(URL_SAFE.encode(random_bytes(len)?))
}

pub(super) fn generate(hasher: &PasswordHasher) -> Result<GeneratedKey, CredentialError> {
    let raw = random_bytes(API_KEY_BYTES)?;
    let plaintext = URL_SAFE.encode(&raw);
    let hash = hasher.hash(&raw)?;
    let prefix = key_prefix(&plaintext).to_string();

    Ok(GeneratedKey {
        plaintext,
        hash,
        prefix,
    })
}

pub(super) fn hash_existing(
    hasher: &PasswordHasher,
    plaintext: &str,
) -> Result<String, CredentialError> {
    let raw = URL_SAFE
        .decode(plaintext)
        .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
    hasher.hash(&raw)
}

pub(super) fn verify(hasher: &PasswordHasher, plaintext: &str, hash: &str) -> bool {
    let Ok(raw) = URL_SAFE.decode(plaintext) else {
        return false;
    };
    hasher.verify(&raw, hash).unwrap_or(false)
}

/// First [`KEY_PREFIX_LEN`] characters of a key, or the whole key when shorter.
pub fn key_prefix(plaintext: &str) -> &str {
    match plaintext.char_indices().nth(KEY_PREFIX_LEN) {
        Some((end, _)) => &plaintext[..end],
        None => plaintext,
    }
}

/// Constant-time string equality for secrets that are not slow-hashed.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// A key without an expiry never expires.
pub fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    is_expired_at(expires_at, Utc::now())
}

pub fn is_expired_at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expiry| now > expiry)
}
