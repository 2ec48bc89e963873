use crate::config::AuthConfig;
use crate::domain::auth::{AuthSession, Claims, Password};
use crate::error::{AppError, Result};
use uuid::Uuid;

/// Issues and verifies bearer tokens and hashes passwords off the async runtime.
#[derive(Clone, Debug)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    #[must_use]
    pub const fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// # Errors
    /// Returns `AppError::Internal` if the token cannot be signed.
    pub fn issue_session(&self, user_id: Uuid) -> Result<AuthSession> {
        let claims = Claims::new(user_id, self.config.access_token_ttl_secs);
        let token = claims.encode(&self.config.jwt_secret)?;
        Ok(AuthSession { user_id, token, expires_at: claims.exp })
    }

    /// Verifies a bearer token and returns the user ID (subject).
    ///
    /// # Errors
    /// Returns `AppError::AuthError` if the token is invalid or expired.
    pub fn verify_token(&self, token: &str) -> Result<Uuid> {
        Claims::decode(token, &self.config.jwt_secret).map(|claims| claims.sub)
    }

    /// # Errors
    /// Returns `AppError::Internal` if hashing fails or the blocking task panics.
    #[tracing::instrument(err, skip_all)]
    pub async fn hash_password(&self, password: &str) -> Result<String> {
        let password = password.to_string();
        tokio::task::spawn_blocking(move || Password::hash(&password)).await.map_err(|_| AppError::Internal)?
    }

    /// # Errors
    /// Returns `AppError::Internal` if the stored hash is malformed or the blocking task panics.
    #[tracing::instrument(err, skip_all)]
    pub async fn verify_password(&self, password: &str, password_hash: &str) -> Result<bool> {
        let password = password.to_string();
        let password_hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || Password::verify(&password, &password_hash))
            .await
            .map_err(|_| AppError::Internal)?
    }
}
