//! crates/ruleset_chat_core/src/identity.rs
//!
//! User registration, login and bearer credential resolution. Hashing and
//! token signing are delegated to the `PasswordService` and `CredentialService` ports.

use crate::domain::{Claims, Credential, User};
use crate::ports::{CredentialService, DatabaseService, PasswordService, PortError, PortResult};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Default lifetime of an issued credential.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

pub struct IdentityService {
    db: Arc<dyn DatabaseService>,
    passwords: Arc<dyn PasswordService>,
    credentials: Arc<dyn CredentialService>,
    token_ttl: Duration,
}

impl IdentityService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        passwords: Arc<dyn PasswordService>,
        credentials: Arc<dyn CredentialService>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            db,
            passwords,
            credentials,
            token_ttl,
        }
    }

    /// Creates an account and returns a credential for it.
    /// Fails with `Conflict` if the email (or username) is taken.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> PortResult<Credential> {
        let username = username.trim();
        let email = normalize_email(email);
        require("username", username)?;
        require("email", &email)?;
        require("password", password)?;

        let hashed = self.passwords.hash_password(password)?;
        let user = self.db.create_user(username, &email, &hashed).await?;
        info!("Registered user {}", user.user_id);
        self.issue(user)
    }

    /// Checks the password and returns a fresh credential.
    /// Unknown emails and wrong passwords are indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str) -> PortResult<Credential> {
        let email = normalize_email(email);
        let creds = match self.db.get_user_by_email(&email).await {
            Ok(creds) => creds,
            Err(PortError::NotFound(_)) => return Err(PortError::Unauthorized),
            Err(e) => return Err(e),
        };

        if !self.passwords.verify_password(password, &creds.hashed_password)? {
            warn!("Rejected login for user {}", creds.user_id);
            return Err(PortError::Unauthorized);
        }
        self.issue(creds.to_user())
    }

    /// Maps a bearer token back to the user it was issued for.
    pub async fn resolve(&self, token: &str) -> PortResult<User> {
        let claims = self.credentials.verify(token)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(PortError::Unauthorized);
        }
        match self.db.get_user_by_email(&claims.sub).await {
            Ok(creds) => Ok(creds.to_user()),
            Err(PortError::NotFound(_)) => Err(PortError::Unauthorized),
            Err(e) => Err(e),
        }
    }

    fn issue(&self, user: User) -> PortResult<Credential> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.email.clone(),
            iat: now.timestamp(),
            exp: (now + self.token_ttl).timestamp(),
        };
        let token = self.credentials.sign(&claims)?;
        let expires_at = claims
            .expires_at()
            .ok_or_else(|| PortError::Unexpected("credential expiry out of range".to_string()))?;
        Ok(Credential {
            token,
            expires_at,
            user,
        })
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn require(field: &str, value: &str) -> PortResult<()> {
    if value.is_empty() {
        return Err(PortError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}
