use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: u64,
}

impl Claims {
    #[must_use]
    pub fn new(user_id: Uuid, ttl_secs: u64) -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        Self { sub: user_id, exp: now + ttl_secs }
    }

    /// Signs the claims with HS256.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if encoding fails.
    pub fn encode(&self, secret: &str) -> Result<String> {
        encode(&Header::default(), self, &EncodingKey::from_secret(secret.as_bytes())).map_err(|_| AppError::Internal)
    }

    /// Verifies signature and expiry.
    ///
    /// # Errors
    /// Returns `AppError::AuthError` if the token is malformed, forged or expired.
    pub fn decode(token: &str, secret: &str) -> Result<Self> {
        let token_data = decode::<Self>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
            .map_err(|_| AppError::AuthError)?;

        Ok(token_data.claims)
    }
}

/// A signed-in session returned by registration and login.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub(crate) user_id: Uuid,
    pub(crate) token: String,
    pub(crate) expires_at: u64,
}

#[derive(Debug)]
pub struct Password;

impl Password {
    /// # Errors
    /// Returns `AppError::Internal` if hashing fails.
    #[tracing::instrument(skip(password), level = "debug")]
    pub fn hash(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default().hash_password(password.as_bytes(), &salt).map(|h| h.to_string()).map_err(|_| AppError::Internal)
    }

    /// # Errors
    /// Returns `AppError::Internal` if the stored hash cannot be parsed.
    pub fn verify(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| AppError::Internal)?;
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok())
    }
}

/// Extracts the token from an `Authorization: Bearer ...` header value.
#[must_use]
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}
