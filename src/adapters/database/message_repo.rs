use crate::adapters::database::records::MessageRecord;
use crate::adapters::database::{DbPool, FOREIGN_KEY_VIOLATION};
use crate::adapters::{MessageCursor, MessageRepository};
use crate::domain::message::{Message, ReadTransition};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, is_delivered, delivered_at, read_at, created_at";

#[derive(Clone, Debug)]
pub struct PgMessageRepository {
    pool: DbPool,
}

impl PgMessageRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    #[tracing::instrument(level = "debug", skip(self, message), fields(message_id = %message.id))]
    async fn create(&self, message: &Message) -> Result<Message> {
        let result = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages (id, sender_id, receiver_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(message.id)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.content)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record.into()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                // Foreign key violation: receiver_id does not exist
                Err(AppError::NotFound)
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_by_id(&self, message_id: Uuid) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch_undelivered_batch(
        &self,
        receiver_id: Uuid,
        cursor: Option<MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let records = match cursor {
            Some((last_ts, last_id)) => {
                sqlx::query_as::<_, MessageRecord>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS}
                    FROM messages
                    WHERE receiver_id = $1
                      AND NOT is_delivered
                      AND (created_at, id) > ($2, $3)
                    ORDER BY created_at ASC, id ASC
                    LIMIT $4
                    "#
                ))
                .bind(receiver_id)
                .bind(last_ts)
                .bind(last_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MessageRecord>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS}
                    FROM messages
                    WHERE receiver_id = $1
                      AND NOT is_delivered
                    ORDER BY created_at ASC, id ASC
                    LIMIT $2
                    "#
                ))
                .bind(receiver_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        before: Option<MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let (before_ts, before_id) = before.unzip();
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE ((sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1))
              AND ($3::timestamptz IS NULL OR (created_at, id) < ($3, $4::uuid))
            ORDER BY created_at DESC, id DESC
            LIMIT $5
            "#
        ))
        .bind(user_id)
        .bind(peer_id)
        .bind(before_ts)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn record_delivery(&self, message_id: Uuid, delivered_at: OffsetDateTime) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_delivered = TRUE, delivered_at = $2
            WHERE id = $1 AND NOT is_delivered
            "#,
        )
        .bind(message_id)
        .bind(delivered_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn record_read(&self, message_id: Uuid, transition: ReadTransition) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_delivered = TRUE,
                delivered_at = COALESCE(delivered_at, $2),
                read_at = GREATEST($3, COALESCE(delivered_at, $2))
            WHERE id = $1 AND read_at IS NULL
            "#,
        )
        .bind(message_id)
        .bind(transition.delivered_at)
        .bind(transition.read_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
