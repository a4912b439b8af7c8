//! services/api/src/adapters/credentials.rs
//!
//! HS256 bearer tokens via `jsonwebtoken`. Implements the `CredentialService` port.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ruleset_chat_core::domain::Claims;
use ruleset_chat_core::ports::{CredentialService, PortError, PortResult};
use tracing::debug;

pub struct JwtCredentialService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCredentialService {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl CredentialService for JwtCredentialService {
    fn sign(&self, claims: &Claims) -> PortResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| PortError::Unexpected(format!("failed to sign token: {}", e)))
    }

    fn verify(&self, token: &str) -> PortResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Rejected bearer token: {:?}", e.kind());
                PortError::Unauthorized
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn claims(ttl: Duration) -> Claims {
        let now = Utc::now();
        Claims {
            sub: "ada@example.com".to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    #[test]
    fn signed_tokens_verify_to_the_same_claims() {
        let service = JwtCredentialService::new(b"test-secret");
        let claims = claims(Duration::hours(24));
        let token = service.sign(&claims).unwrap();
        assert_eq!(service.verify(&token).unwrap(), claims);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let service = JwtCredentialService::new(b"test-secret");
        let token = service.sign(&claims(Duration::hours(-1))).unwrap();
        assert!(matches!(service.verify(&token), Err(PortError::Unauthorized)));
    }

    #[test]
    fn tokens_from_another_secret_or_garbage_are_rejected() {
        let ours = JwtCredentialService::new(b"test-secret");
        let theirs = JwtCredentialService::new(b"other-secret");
        let token = theirs.sign(&claims(Duration::hours(1))).unwrap();

        assert!(matches!(ours.verify(&token), Err(PortError::Unauthorized)));
        assert!(matches!(ours.verify("a.b.c"), Err(PortError::Unauthorized)));
        assert!(matches!(ours.verify(""), Err(PortError::Unauthorized)));
    }
}
