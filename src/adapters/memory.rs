use crate::adapters::{MessageCursor, MessageRepository, UserRepository};
use crate::domain::message::{Message, ReadTransition};
use crate::domain::user::User;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use uuid::Uuid;

/// Process-local storage used when no database is configured.
///
/// Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    usernames: DashMap<String, Uuid>,
    messages: DashMap<Uuid, Message>,
}

fn page(mut messages: Vec<Message>, limit: i64) -> Vec<Message> {
    messages.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
    messages
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, username: &str, password_hash: &str) -> Result<User> {
        match self.usernames.entry(username.to_string()) {
            Entry::Occupied(_) => Err(AppError::Conflict("Username already exists".into())),
            Entry::Vacant(slot) => {
                let user = User {
                    id: Uuid::new_v4(),
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                };
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let id = self.usernames.get(username).map(|id| *id);
        Ok(id.and_then(|id| self.users.get(&id).map(|u| u.value().clone())))
    }

    async fn exists(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.users.contains_key(&user_id))
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, message: &Message) -> Result<Message> {
        if !self.users.contains_key(&message.receiver_id) {
            return Err(AppError::NotFound);
        }
        match self.messages.entry(message.id) {
            Entry::Occupied(_) => Err(AppError::Conflict("Duplicate message id".into())),
            Entry::Vacant(slot) => {
                slot.insert(message.clone());
                Ok(message.clone())
            }
        }
    }

    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>> {
        Ok(self.messages.get(&message_id).map(|m| m.value().clone()))
    }

    async fn fetch_undelivered_batch(
        &self,
        receiver_id: Uuid,
        cursor: Option<MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let mut pending: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.receiver_id == receiver_id && !m.is_delivered)
            .filter(|m| cursor.is_none_or(|c| (m.created_at, m.id) > c))
            .map(|m| m.value().clone())
            .collect();
        pending.sort_by_key(|m| (m.created_at, m.id));
        Ok(page(pending, limit))
    }

    async fn fetch_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        before: Option<MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let mut history: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == user_id && m.receiver_id == peer_id)
                    || (m.sender_id == peer_id && m.receiver_id == user_id)
            })
            .filter(|m| before.is_none_or(|b| (m.created_at, m.id) < b))
            .map(|m| m.value().clone())
            .collect();
        history.sort_by_key(|m| std::cmp::Reverse((m.created_at, m.id)));
        Ok(page(history, limit))
    }

    async fn record_delivery(&self, message_id: Uuid, delivered_at: OffsetDateTime) -> Result<bool> {
        let mut message = self.messages.get_mut(&message_id).ok_or(AppError::NotFound)?;
        if message.is_delivered {
            return Ok(false);
        }
        message.apply_delivery(delivered_at);
        Ok(true)
    }

    async fn record_read(&self, message_id: Uuid, transition: ReadTransition) -> Result<bool> {
        let mut message = self.messages.get_mut(&message_id).ok_or(AppError::NotFound)?;
        if message.is_read() {
            return Ok(false);
        }
        // Another receipt may have delivered the message since the transition was planned.
        let delivered_at = message.delivered_at.unwrap_or(transition.delivered_at);
        message.apply_read(ReadTransition {
            delivered_at,
            read_at: transition.read_at.max(delivered_at),
            newly_delivered: transition.newly_delivered,
        });
        Ok(true)
    }
}
