//! services/api/src/adapters/passwords.rs
//!
//! Argon2 password hashing. Implements the `PasswordService` port.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use ruleset_chat_core::ports::{PasswordService, PortError, PortResult};

#[derive(Default)]
pub struct Argon2PasswordService {
    argon2: Argon2<'static>,
}

impl Argon2PasswordService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PasswordService for Argon2PasswordService {
    fn hash_password(&self, password: &str) -> PortResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PortError::Unexpected(format!("failed to hash password: {}", e)))
    }

    fn verify_password(&self, password: &str, hashed_password: &str) -> PortResult<bool> {
        let parsed = PasswordHash::new(hashed_password)
            .map_err(|e| PortError::Integrity(format!("stored password hash is invalid: {}", e)))?;
        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}
