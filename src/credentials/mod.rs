//! Credential primitives: API keys and passwords.
//!
//! API keys are 32 random bytes rendered as URL-safe base64. Only an argon2id
//! hash of the raw bytes and an 8-character lookup prefix are ever stored.
//! Passwords go through the same [`PasswordHasher`].
//!
//! ```rust
//! use hostbus::credentials::{Credentials, PasswordConfig, key_prefix};
//!
//! let credentials = Credentials::new(PasswordConfig::fast());
//! let key = credentials.generate_api_key().unwrap();
//!
//! assert_eq!(key.prefix, key_prefix(key.plaintext()));
//! assert!(credentials.verify_api_key(key.plaintext(), &key.hash));
//! ```

mod api_key;
mod password;

pub use api_key::{
    API_KEY_BYTES, GeneratedKey, KEY_PREFIX_LEN, constant_time_eq, is_expired, is_expired_at,
    key_prefix, random_token,
};
pub use password::{PasswordConfig, PasswordHasher};

use std::sync::{Arc, OnceLock};

use crate::error::AppError;

/// Credential failures. Apart from `InvalidKey`, these come from the primitives themselves.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid API key format: {0}")]
    InvalidKey(String),

    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("hashing failure: {0}")]
    Hashing(String),

    #[error("malformed hash: {0}")]
    MalformedHash(String),
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidKey(_) => AppError::BadRequest(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

/// Issues and checks API keys and passwords
///
/// Cheap to clone; hashing parameters are shared.
#[derive(Clone, Default)]
pub struct Credentials {
    hasher: PasswordHasher,
    decoy: Arc<OnceLock<Option<String>>>,
}

impl Credentials {
    pub fn new(config: PasswordConfig) -> Self {
        Self {
            hasher: PasswordHasher::new(config),
            decoy: Arc::default(),
        }
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Draw a fresh key. The plaintext must be shown to the caller once and then dropped.
    pub fn generate_api_key(&self) -> Result<GeneratedKey, CredentialError> {
        api_key::generate(&self.hasher)
    }

    /// Hash an existing plaintext key, e.g. when importing keys from another system.
    pub fn hash_api_key(&self, plaintext: &str) -> Result<String, CredentialError> {
        api_key::hash_existing(&self.hasher, plaintext)
    }

    /// Check a presented key against a stored hash.
    ///
    /// Returns false for anything that does not decode or does not match.
    pub fn verify_api_key(&self, plaintext: &str, hash: &str) -> bool {
        api_key::verify(&self.hasher, plaintext, hash)
    }

    /// Run one key verification against a throwaway hash and report a mismatch.
    ///
    /// Used when no stored key shares the presented prefix, so that an unknown
    /// prefix costs as much as a wrong secret.
    pub fn verify_api_key_decoy(&self, plaintext: &str) -> bool {
        let decoy = self
            .decoy
            .get_or_init(|| self.hasher.hash(&[0u8; API_KEY_BYTES]).ok());
        if let Some(hash) = decoy {
            let _ = api_key::verify(&self.hasher, plaintext, hash);
        }
        false
    }

    pub fn hash_password(&self, password: &str) -> Result<String, CredentialError> {
        self.hasher.hash(password.as_bytes())
    }

    /// Check a login password. A malformed stored hash counts as a mismatch.
    pub fn check_password(&self, password: &str, hash: &str) -> bool {
        match self.hasher.verify(password.as_bytes(), hash) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash could not be parsed");
                false
            }
        }
    }
}
