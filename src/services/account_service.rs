use crate::adapters::UserRepository;
use crate::domain::auth::AuthSession;
use crate::domain::user::validate_credentials;
use crate::error::{AppError, Result};
use crate::services::auth_service::AuthService;
use crate::telemetry::METER_NAME;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    users_registered_total: Counter<u64>,
    login_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter(METER_NAME);
        Self {
            users_registered_total: meter
                .u64_counter("friendsgo_users_registered_total")
                .with_description("Total number of successful user registrations")
                .build(),
            login_total: meter
                .u64_counter("friendsgo_auth_login_total")
                .with_description("Total number of login attempts")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AccountService {
    users: Arc<dyn UserRepository>,
    auth_service: AuthService,
    metrics: Metrics,
}

impl AccountService {
    #[must_use]
    pub fn new(users: Arc<dyn UserRepository>, auth_service: AuthService) -> Self {
        Self { users, auth_service, metrics: Metrics::new() }
    }

    /// Creates an account and signs it in.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` for invalid credentials and `AppError::Conflict` for a taken username.
    #[tracing::instrument(skip(self, password), fields(user_id = tracing::field::Empty), err(level = "warn"))]
    pub async fn register(&self, username: String, password: String) -> Result<AuthSession> {
        validate_credentials(&username, &password).map_err(AppError::BadRequest)?;

        let password_hash = self.auth_service.hash_password(&password).await?;
        let user = self.users.create(&username, &password_hash).await?;
        tracing::Span::current().record("user_id", tracing::field::display(user.id));

        self.metrics.users_registered_total.add(1, &[]);
        self.auth_service.issue_session(user.id)
    }

    /// # Errors
    /// Returns `AppError::AuthError` if the username is unknown or the password is wrong.
    #[tracing::instrument(skip(self, password), fields(user_id = tracing::field::Empty), err(level = "warn"))]
    pub async fn login(&self, username: String, password: String) -> Result<AuthSession> {
        let Some(user) = self.users.find_by_username(&username).await? else {
            tracing::warn!("Login failed: user not found");
            self.metrics.login_total.add(1, &[KeyValue::new("status", "failure")]);
            return Err(AppError::AuthError);
        };

        tracing::Span::current().record("user_id", tracing::field::display(user.id));

        if !self.auth_service.verify_password(&password, &user.password_hash).await? {
            tracing::warn!("Login failed: invalid password");
            self.metrics.login_total.add(1, &[KeyValue::new("status", "failure")]);
            return Err(AppError::AuthError);
        }

        self.metrics.login_total.add(1, &[KeyValue::new("status", "success")]);
        tracing::debug!(username = %user.username, "Login succeeded");
        self.auth_service.issue_session(user.id)
    }

    /// Resolves a bearer token to a user that still exists.
    ///
    /// # Errors
    /// Returns `AppError::AuthError` if the token is invalid or its subject is unknown.
    pub async fn authenticate(&self, token: &str) -> Result<Uuid> {
        let user_id = self.auth_service.verify_token(token)?;
        if self.users.exists(user_id).await? { Ok(user_id) } else { Err(AppError::AuthError) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::config::AuthConfig;

    fn setup_service() -> AccountService {
        let auth = AuthService::new(AuthConfig { jwt_secret: "test_secret".to_string(), access_token_ttl_secs: 3600 });
        AccountService::new(Arc::new(MemoryStore::default()), auth)
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let service = setup_service();
        let registered = service.register("alice".into(), "password123".into()).await.unwrap();
        let session = service.login("alice".into(), "password123".into()).await.unwrap();

        assert_eq!(registered.user_id, session.user_id);
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let service = setup_service();
        service.register("alice".into(), "password123".into()).await.unwrap();

        let res = service.login("alice".into(), "password124".into()).await;
        assert!(matches!(res, Err(AppError::AuthError)));
        let res = service.login("nobody".into(), "password123".into()).await;
        assert!(matches!(res, Err(AppError::AuthError)));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_invalid_input() {
        let service = setup_service();
        service.register("alice".into(), "password123".into()).await.unwrap();

        assert!(matches!(
            service.register("alice".into(), "password123".into()).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(service.register("al".into(), "password123".into()).await, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_authenticate_requires_known_user() {
        let service = setup_service();
        let session = service.register("alice".into(), "password123".into()).await.unwrap();

        assert_eq!(service.authenticate(&session.token).await.unwrap(), session.user_id);

        let ghost = service.auth_service.issue_session(Uuid::new_v4()).unwrap();
        assert!(matches!(service.authenticate(&ghost.token).await, Err(AppError::AuthError)));
        assert!(matches!(service.authenticate("garbage").await, Err(AppError::AuthError)));
    }
}
