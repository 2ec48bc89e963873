pub mod database;
pub mod memory;

use crate::domain::message::{Message, ReadTransition};
use crate::domain::user::User;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Keyset cursor over `(created_at, id)`.
pub type MessageCursor = (OffsetDateTime, Uuid);

#[async_trait]
pub trait UserRepository: Send + Sync + std::fmt::Debug {
    /// Stores a new user.
    ///
    /// # Errors
    /// Returns `AppError::Conflict` if the username is taken.
    async fn create(&self, username: &str, password_hash: &str) -> Result<User>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn exists(&self, user_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync + std::fmt::Debug {
    /// Stores a new message.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the receiver does not exist.
    async fn create(&self, message: &Message) -> Result<Message>;

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>>;

    /// Undelivered messages for a receiver, oldest first, strictly after `cursor`.
    async fn fetch_undelivered_batch(
        &self,
        receiver_id: Uuid,
        cursor: Option<MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>>;

    /// Messages exchanged between two users, newest first, strictly before the `before` keyset.
    async fn fetch_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        before: Option<MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>>;

    /// Marks a message delivered. Returns `false` if it already was.
    async fn record_delivery(&self, message_id: Uuid, delivered_at: OffsetDateTime) -> Result<bool>;

    /// Marks a message read (and delivered if needed). Returns `false` if it already was read.
    async fn record_read(&self, message_id: Uuid, transition: ReadTransition) -> Result<bool>;
}

/// The storage backend selected at startup.
#[derive(Clone, Debug)]
pub struct Storage {
    pub users: Arc<dyn UserRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub pool: Option<database::DbPool>,
}

impl Storage {
    #[must_use]
    pub fn postgres(pool: database::DbPool) -> Self {
        Self {
            users: Arc::new(database::user_repo::PgUserRepository::new(pool.clone())),
            messages: Arc::new(database::message_repo::PgMessageRepository::new(pool.clone())),
            pool: Some(pool),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        let store = Arc::new(memory::MemoryStore::default());
        Self { users: store.clone(), messages: store, pool: None }
    }
}
