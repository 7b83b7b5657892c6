//! Signed token codec.
//!
//! Encodes and verifies compact HS256 JWTs carrying a subject, issue and
//! expiration timestamps, and an extensible claim map. Access and refresh
//! tokens share the encoding and differ only in TTL; the symmetric signing
//! key is loaded once from configuration and immutable afterwards.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::config::AuthConfig;

#[derive(Debug, Error)]
pub enum TokenError {
    /// The configured signing key is not valid base64
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// Signature, structure, or claim decoding failure
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Claims embedded in every issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the username the token asserts
    pub sub: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiration, seconds since epoch
    pub exp: i64,
    /// Unique token id, so two tokens issued within the same second for
    /// the same subject never serialize identically
    pub jti: String,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenCodec {
    /// Build a codec from a base64-encoded symmetric secret.
    pub fn new(
        base64_secret: &str,
        access_ttl_seconds: i64,
        refresh_ttl_seconds: i64,
    ) -> Result<Self, TokenError> {
        let encoding_key = EncodingKey::from_base64_secret(base64_secret)
            .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
        let decoding_key = DecodingKey::from_base64_secret(base64_secret)
            .map_err(|e| TokenError::InvalidKey(e.to_string()))?;

        Ok(Self {
            encoding_key,
            decoding_key,
            access_ttl_seconds,
            refresh_ttl_seconds,
        })
    }

    pub fn from_config(auth: &AuthConfig) -> Result<Self, TokenError> {
        Self::new(
            &auth.token_secret,
            auth.access_token_ttl_seconds,
            auth.refresh_token_ttl_seconds,
        )
    }

    /// Sign a token embedding `subject`, `iat = now`, `exp = now + ttl`,
    /// and the supplied extra claims.
    pub fn build_token(
        &self,
        extra: HashMap<String, serde_json::Value>,
        subject: &str,
        ttl_seconds: i64,
    ) -> Result<String, TokenError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + ttl_seconds,
            jti: uuid::Uuid::new_v4().to_string(),
            extra,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    pub fn generate_access_token(&self, subject: &str) -> Result<String, TokenError> {
        self.build_token(HashMap::new(), subject, self.access_ttl_seconds)
    }

    /// Refresh tokens carry no extra claims, only a longer TTL.
    pub fn generate_refresh_token(&self, subject: &str) -> Result<String, TokenError> {
        self.build_token(HashMap::new(), subject, self.refresh_ttl_seconds)
    }

    /// Decode and verify the signature, returning the claims without
    /// judging expiry. Fails on signature or structural corruption.
    pub fn extract_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }

    pub fn extract_subject(&self, token: &str) -> Result<String, TokenError> {
        Ok(self.extract_claims(token)?.sub)
    }

    /// Validity predicate: decode succeeds, subject matches exactly, and
    /// the current time is strictly before the embedded expiration.
    /// Decode failures and mismatches yield false, never an error.
    #[must_use]
    pub fn is_valid(&self, token: &str, expected_subject: &str) -> bool {
        match self.extract_claims(token) {
            Ok(claims) => {
                claims.sub == expected_subject && chrono::Utc::now().timestamp() < claims.exp
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64("unit-test-signing-key-0123456789abcdef")
    const TEST_SECRET: &str = "dW5pdC10ZXN0LXNpZ25pbmcta2V5LTAxMjM0NTY3ODlhYmNkZWY=";

    fn codec() -> TokenCodec {
        TokenCodec::new(TEST_SECRET, 900, 604_800).unwrap()
    }

    #[test]
    fn test_subject_round_trip() {
        let codec = codec();
        let token = codec
            .build_token(HashMap::new(), "alice", 3600)
            .unwrap();

        assert_eq!(codec.extract_subject(&token).unwrap(), "alice");
        assert!(codec.is_valid(&token, "alice"));
    }

    #[test]
    fn test_extra_claims_round_trip() {
        let codec = codec();
        let mut extra = HashMap::new();
        extra.insert("role".to_string(), serde_json::json!("ORDINARY"));

        let token = codec.build_token(extra, "alice", 3600).unwrap();
        let claims = codec.extract_claims(&token).unwrap();

        assert_eq!(claims.extra["role"], serde_json::json!("ORDINARY"));
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_subject_mismatch_is_false_not_error() {
        let codec = codec();
        let token = codec.generate_access_token("alice").unwrap();

        assert!(!codec.is_valid(&token, "bob"));
    }

    #[test]
    fn test_zero_ttl_token_is_expired() {
        let codec = codec();
        let token = codec.build_token(HashMap::new(), "alice", 0).unwrap();

        // exp == now: equality at the expiration instant counts as expired,
        // but the claims are still extractable.
        assert!(!codec.is_valid(&token, "alice"));
        assert_eq!(codec.extract_subject(&token).unwrap(), "alice");
    }

    #[test]
    fn test_garbage_token_fails_extraction() {
        let codec = codec();

        assert!(codec.extract_subject("not-a-token").is_err());
        assert!(!codec.is_valid("not-a-token", "alice"));
    }

    #[test]
    fn test_wrong_key_fails_extraction() {
        let codec = codec();
        // base64("another-secret-key-used-by-somebody-else")
        let other =
            TokenCodec::new("YW5vdGhlci1zZWNyZXQta2V5LXVzZWQtYnktc29tZWJvZHktZWxzZQ==", 900, 900)
                .unwrap();

        let token = other.generate_access_token("alice").unwrap();

        assert!(codec.extract_claims(&token).is_err());
        assert!(!codec.is_valid(&token, "alice"));
    }

    #[test]
    fn test_refresh_token_outlives_access_token() {
        let codec = codec();
        let access = codec.generate_access_token("alice").unwrap();
        let refresh = codec.generate_refresh_token("alice").unwrap();

        let access_claims = codec.extract_claims(&access).unwrap();
        let refresh_claims = codec.extract_claims(&refresh).unwrap();

        assert!(refresh_claims.exp > access_claims.exp);
    }

    #[test]
    fn test_same_second_tokens_are_distinct() {
        let codec = codec();
        let first = codec.generate_access_token("alice").unwrap();
        let second = codec.generate_access_token("alice").unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_base64_secret_rejected() {
        let result = TokenCodec::new("not base64!!!", 900, 900);
        assert!(matches!(result, Err(TokenError::InvalidKey(_))));
    }
}
