use crate::adapters::UserRepository;
use crate::adapters::database::records::UserRecord;
use crate::adapters::database::{DbPool, UNIQUE_VIOLATION};
use crate::domain::user::User;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgUserRepository {
    pool: DbPool,
}

impl PgUserRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[tracing::instrument(level = "debug", skip(self, password_hash))]
    async fn create(&self, username: &str, password_hash: &str) -> Result<User> {
        let result = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, password_hash
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record.into()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(AppError::Conflict("Username already exists".into()))
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, password_hash
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn exists(&self, user_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}
