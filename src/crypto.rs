//! Cryptographic logics.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;

use crate::config::Argon2 as ArgonConfig;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2 {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    ///
    /// An unparsable stored digest counts as a failed verification.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> bool {
        match PasswordHash::new(phc_hash) {
            Ok(parsed) => self
                .argon2()
                .verify_password(password.as_ref(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PasswordManager {
        // Low-cost parameters so tests stay fast.
        PasswordManager::new(Some(ArgonConfig {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }))
        .unwrap()
    }

    #[test]
    fn test_hash_then_verify() {
        let pwd = manager();
        let hash = pwd.hash_password("P$soW%920$n&").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(pwd.verify_password("P$soW%920$n&", &hash));
        assert!(!pwd.verify_password("wrong_password", &hash));
    }

    #[test]
    fn test_salted_hashes_differ() {
        let pwd = manager();
        let first = pwd.hash_password("secret").unwrap();
        let second = pwd.hash_password("secret").unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_garbage_digest_rejected() {
        let pwd = manager();

        assert!(!pwd.verify_password("secret", "not-a-phc-string"));
        assert!(!pwd.verify_password("secret", ""));
    }
}
